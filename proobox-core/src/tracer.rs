//! Tracer argument-vector assembly and process spawn (spec.md §4.7 "Tracer
//! invocation contract").
//!
//! Pre-exec hardening (die-with-parent, FD cleanup) is grounded directly on
//! the teacher's `jail::pre_exec` — the same defensive posture this project
//! wants around every tracer invocation, VM or otherwise.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::jail::pre_exec;
use crate::Result;

/// Fixed bind list present on every tracer invocation (spec.md §4.7).
const FIXED_BINDS: &[(&str, &str)] = &[("/dev", "/dev"), ("/proc", "/proc"), ("/sys", "/sys")];

/// Host environment variable names the guest environment is seeded from,
/// after the fixed base set and before image/CLI overrides.
const LOADER_PRELOAD_VAR: &str = "LD_PRELOAD";

/// Distro-specific defaults used when no command is given interactively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distro {
    Alpine,
    Ubuntu,
    Other,
}

impl Distro {
    #[must_use]
    pub fn from_repo(repo: &str) -> Self {
        match repo {
            "alpine" => Self::Alpine,
            "ubuntu" => Self::Ubuntu,
            _ => Self::Other,
        }
    }

    /// Default interactive shell command for this distro.
    #[must_use]
    pub fn default_shell(self) -> Vec<String> {
        match self {
            Self::Alpine => vec!["/bin/sh".to_owned()],
            Self::Ubuntu | Self::Other => vec!["/bin/bash".to_owned(), "--login".to_owned()],
        }
    }

    /// Whether this distro is musl-based and needs the busybox shim
    /// (spec.md §4.7: "if base is musl-based (Alpine), add
    /// `<rootfs>/bin/busybox:/bin/sh` and the same shim for `/usr/bin/env`").
    #[must_use]
    pub fn is_musl(self) -> bool {
        matches!(self, Self::Alpine)
    }
}

/// Everything needed to assemble and spawn a tracer invocation.
#[derive(Debug, Clone)]
pub struct TracerSpec {
    pub rootfs: PathBuf,
    pub distro: Distro,
    pub user_binds: Vec<(String, String)>,
    pub working_dir: String,
    pub env: Vec<String>,
    pub command: Vec<String>,
    pub interactive: bool,
    pub kill_on_exit: bool,
}

/// Path to the tracer binary, resolved via `$PATH` like any other command.
const TRACER_BIN: &str = "proobox-tracer";

/// Builds the deterministic tracer argument vector (spec.md §4.7).
#[must_use]
pub fn build_argv(spec: &TracerSpec) -> Vec<String> {
    let mut argv = Vec::new();

    // Operating mode flag (symlink-fidelity) and user-id override.
    argv.push("--symlink-fidelity".to_owned());
    argv.push("--uid".to_owned());
    argv.push("0".to_owned());

    // Root redirection to the container rootfs.
    argv.push("--root".to_owned());
    argv.push(spec.rootfs.display().to_string());

    for (host, guest) in FIXED_BINDS {
        argv.push("--bind".to_owned());
        argv.push(format!("{host}:{guest}"));
    }
    argv.push("--bind".to_owned());
    argv.push(format!("{}:/tmp", std::env::temp_dir().display()));
    if let Ok(home) = std::env::var("HOME") {
        argv.push("--bind".to_owned());
        argv.push(format!("{home}:{home}"));
    }
    argv.push("--bind".to_owned());
    argv.push("/:/host-rootfs".to_owned());
    for storage_root in ["/sdcard", "/storage", "/mnt"] {
        if Path::new(storage_root).exists() {
            argv.push("--bind".to_owned());
            argv.push(format!("{storage_root}:{storage_root}"));
        }
    }

    if spec.distro.is_musl() {
        let busybox = spec.rootfs.join("bin/busybox");
        argv.push("--bind".to_owned());
        argv.push(format!("{}:/bin/sh", busybox.display()));
        argv.push("--bind".to_owned());
        argv.push(format!("{}:/usr/bin/env", busybox.display()));
    }

    for (host, guest) in &spec.user_binds {
        argv.push("--bind".to_owned());
        argv.push(format!("{host}:{guest}"));
    }

    argv.push("--workdir".to_owned());
    argv.push(spec.working_dir.clone());

    if spec.kill_on_exit {
        argv.push("--kill-on-exit".to_owned());
    }

    argv.push("--".to_owned());
    argv.extend(spec.command.iter().cloned());
    argv
}

/// Resolves the working directory per spec.md §4.7: CLI flag wins, else
/// image `WorkingDir`, else `/root`.
#[must_use]
pub fn resolve_working_dir(cli_workdir: Option<&str>, image_working_dir: Option<&str>) -> String {
    cli_workdir.or(image_working_dir).unwrap_or("/root").to_owned()
}

/// Resolves the command to run per spec.md §4.7: CLI command wins, else
/// image `Cmd`, else the distro default shell when interactive, else none.
#[must_use]
pub fn resolve_command(cli_command: &[String], image_cmd: Option<&[String]>, distro: Distro, interactive: bool) -> Vec<String> {
    if !cli_command.is_empty() {
        return cli_command.to_vec();
    }
    if let Some(cmd) = image_cmd {
        if !cmd.is_empty() {
            return cmd.to_vec();
        }
    }
    if interactive {
        return distro.default_shell();
    }
    Vec::new()
}

/// Builds the sanitized guest environment per spec.md §4.7: fixed base set,
/// then image `Env`, then CLI `-e` additions (later wins on key collision).
#[must_use]
pub fn build_env(image_env: &[String], cli_env: &[String]) -> Vec<String> {
    let mut ordered: Vec<(String, String)> = Vec::new();
    let mut push_kv = |kv: &str, ordered: &mut Vec<(String, String)>| {
        let Some((key, value)) = kv.split_once('=') else { return };
        if key == LOADER_PRELOAD_VAR {
            return;
        }
        if let Some(existing) = ordered.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value.to_owned();
        } else {
            ordered.push((key.to_owned(), value.to_owned()));
        }
    };

    push_kv("HOME=/root", &mut ordered);
    push_kv("PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin", &mut ordered);
    if let Ok(term) = std::env::var("TERM") {
        push_kv(&format!("TERM={term}"), &mut ordered);
    }
    push_kv("LANG=C.UTF-8", &mut ordered);

    for kv in image_env {
        push_kv(kv, &mut ordered);
    }
    for kv in cli_env {
        push_kv(kv, &mut ordered);
    }

    ordered.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Spawns the tracer with a sanitized environment (`env -i` equivalent:
/// only the computed `env` entries are visible to the child), cleared
/// inherited `LD_PRELOAD`, and pre-exec hardening.
///
/// `stdio` selects inherited stdio (foreground/interactive) or piped-to-log
/// redirection (detached); the caller owns log-file wiring.
pub fn spawn(argv: &[String], env: &[String], stdio: Stdio, stdout: Stdio, stderr: Stdio) -> Result<std::process::Child> {
    let mut cmd = Command::new(TRACER_BIN);
    cmd.args(argv);
    cmd.env_clear();
    for kv in env {
        if let Some((key, value)) = kv.split_once('=') {
            cmd.env(key, value);
        }
    }
    cmd.stdin(stdio).stdout(stdout).stderr(stderr);
    pre_exec::apply(&mut cmd, None);

    cmd.spawn().map_err(|e| crate::Error::SpawnFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_workdir_cli_over_image_over_default() {
        assert_eq!(resolve_working_dir(Some("/app"), Some("/srv")), "/app");
        assert_eq!(resolve_working_dir(None, Some("/srv")), "/srv");
        assert_eq!(resolve_working_dir(None, None), "/root");
    }

    #[test]
    fn resolves_command_precedence() {
        assert_eq!(resolve_command(&["echo".to_owned()], Some(&["sh".to_owned()]), Distro::Alpine, false), vec!["echo".to_owned()]);
        assert_eq!(resolve_command(&[], Some(&["sh".to_owned(), "-c".to_owned()]), Distro::Alpine, false), vec!["sh".to_owned(), "-c".to_owned()]);
        assert_eq!(resolve_command(&[], None, Distro::Alpine, true), vec!["/bin/sh".to_owned()]);
        assert_eq!(resolve_command(&[], None, Distro::Ubuntu, true), vec!["/bin/bash".to_owned(), "--login".to_owned()]);
        assert!(resolve_command(&[], None, Distro::Alpine, false).is_empty());
    }

    #[test]
    fn build_env_clears_loader_preload() {
        let env = build_env(&["LD_PRELOAD=/evil.so".to_owned(), "FOO=bar".to_owned()], &[]);
        assert!(!env.iter().any(|kv| kv.starts_with("LD_PRELOAD=")));
        assert!(env.contains(&"FOO=bar".to_owned()));
    }

    #[test]
    fn build_env_cli_wins_over_image() {
        let env = build_env(&["FOO=image".to_owned()], &["FOO=cli".to_owned()]);
        assert!(env.contains(&"FOO=cli".to_owned()));
        assert!(!env.contains(&"FOO=image".to_owned()));
    }

    #[test]
    fn build_env_always_includes_fixed_base() {
        let env = build_env(&[], &[]);
        assert!(env.contains(&"HOME=/root".to_owned()));
        assert!(env.contains(&"LANG=C.UTF-8".to_owned()));
    }

    #[test]
    fn build_argv_roots_into_container_rootfs() {
        let spec = TracerSpec {
            rootfs: PathBuf::from("/data/containers/x/rootfs"),
            distro: Distro::Alpine,
            user_binds: vec![],
            working_dir: "/root".to_owned(),
            env: vec![],
            command: vec!["/bin/sh".to_owned()],
            interactive: true,
            kill_on_exit: true,
        };
        let argv = build_argv(&spec);
        assert!(argv.windows(2).any(|w| w[0] == "--root" && w[1] == "/data/containers/x/rootfs"));
        assert!(argv.contains(&"--kill-on-exit".to_owned()));
    }

    #[test]
    fn build_argv_adds_busybox_shim_for_musl() {
        let spec = TracerSpec {
            rootfs: PathBuf::from("/data/containers/x/rootfs"),
            distro: Distro::Alpine,
            user_binds: vec![],
            working_dir: "/root".to_owned(),
            env: vec![],
            command: vec![],
            interactive: false,
            kill_on_exit: false,
        };
        let argv = build_argv(&spec);
        assert!(argv.iter().any(|a| a.ends_with("bin/busybox:/bin/sh")));
    }
}
