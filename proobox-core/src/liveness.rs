//! Liveness detection via `/proc` scan (spec.md §4.7).
//!
//! "A container is `running` iff the host process table contains a process
//! whose command line matches the tracer binary and whose root-redirection
//! argument points at this container's rootfs. ... the supervisor never
//! records or trusts stored PIDs."

use std::fs;
use std::path::Path;

/// Name the tracer binary is invoked as, matched against `/proc/<pid>/cmdline`.
const TRACER_BIN: &str = "proobox-tracer";

/// Returns the PIDs of every live tracer process rooted at `rootfs`.
#[must_use]
pub fn find_tracer_pids(rootfs: &Path) -> Vec<i32> {
    let rootfs_str = rootfs.display().to_string();
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut pids = Vec::new();
    for entry in entries.filter_map(std::result::Result::ok) {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if matches_tracer(entry.path().join("cmdline"), &rootfs_str) {
            pids.push(pid);
        }
    }
    pids
}

/// `true` if the host has any live tracer process rooted at `rootfs`.
#[must_use]
pub fn is_running(rootfs: &Path) -> bool {
    !find_tracer_pids(rootfs).is_empty()
}

/// Reads `/proc/<pid>/cmdline` (NUL-separated argv) and checks it names the
/// tracer binary with a `--root <rootfs>` argument.
fn matches_tracer(cmdline_path: std::path::PathBuf, rootfs: &str) -> bool {
    let Ok(data) = fs::read(&cmdline_path) else {
        return false;
    };
    let args: Vec<&str> = data.split(|&b| b == 0).filter_map(|s| std::str::from_utf8(s).ok()).filter(|s| !s.is_empty()).collect();

    let names_tracer = args.first().is_some_and(|arg0| {
        Path::new(arg0).file_name().and_then(|n| n.to_str()).is_some_and(|name| name == TRACER_BIN)
    });
    if !names_tracer {
        return false;
    }

    args.windows(2).any(|w| w[0] == "--root" && w[1] == rootfs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_tracer_requires_root_flag_match() {
        let dir = tempfile::tempdir().unwrap();
        let cmdline = dir.path().join("cmdline");
        let argv = ["proobox-tracer", "--root", "/data/containers/x/rootfs", "--", "/bin/sh"];
        std::fs::write(&cmdline, argv.join("\0") + "\0").unwrap();

        assert!(matches_tracer(cmdline.clone(), "/data/containers/x/rootfs"));
        assert!(!matches_tracer(cmdline, "/data/containers/other/rootfs"));
    }

    #[test]
    fn matches_tracer_rejects_unrelated_binary() {
        let dir = tempfile::tempdir().unwrap();
        let cmdline = dir.path().join("cmdline");
        let argv = ["bash", "--root", "/data/containers/x/rootfs"];
        std::fs::write(&cmdline, argv.join("\0") + "\0").unwrap();

        assert!(!matches_tracer(cmdline, "/data/containers/x/rootfs"));
    }

    #[test]
    fn is_running_false_for_nonexistent_rootfs() {
        assert!(!is_running(Path::new("/nonexistent/definitely/not/running")));
    }
}
