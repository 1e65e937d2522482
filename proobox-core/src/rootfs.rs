//! Rootfs assembly: materialize a container root from a base image or a
//! cached FROM-layer (spec.md §4.6).
//!
//! Grounded on the teacher's `DiskManager::create_base`/`create_vm_disk`
//! staging-then-rename idiom (`bux/src/disk.rs`), adapted from ext4 disk
//! images to plain directory trees, since proobox rootfs is a directory, not
//! a block device.

use std::fs;
use std::path::Path;

use flate2::read::GzDecoder;
use proobox_image::{LayerCache, short_sha256};
use tracing::{info, warn};

use crate::Result;

/// Directories that must exist in every assembled rootfs, with their modes.
const REQUIRED_DIRS: &[(&str, u32)] = &[("dev", 0o755), ("proc", 0o755), ("sys", 0o755), ("tmp", 0o1777), ("run", 0o755), ("etc", 0o755)];

/// Fallback nameservers written to `etc/resolv.conf`.
const RESOLV_CONF: &str = "nameserver 8.8.8.8\nnameserver 8.8.4.4\n";

/// Assembles `rootfs` from `artifact_path`, using the layer cache keyed by
/// `base_image_tag` when possible.
///
/// spec.md §4.6: "if the base-image-tag's FROM-layer cache is populated,
/// copy it; otherwise extract the artifact ... then fill the cache."
pub fn assemble(artifact_path: &Path, base_image_tag: &str, rootfs: &Path, layers: &LayerCache) -> Result<()> {
    let key = short_sha256(base_image_tag.as_bytes());

    if let Some(cached) = layers.lookup(&key) {
        info!(%key, "from-layer cache hit");
        fs::create_dir_all(rootfs)?;
        proobox_image::copy_dir_recursive(&cached, rootfs)?;
    } else {
        info!(%key, "from-layer cache miss, extracting artifact");
        extract_artifact(artifact_path, rootfs)?;
        if let Err(e) = layers.fill(&key, rootfs) {
            warn!(error = %e, "from-layer cache fill failed, continuing");
        }
    }

    ensure_special_dirs(rootfs)?;
    write_resolv_conf(rootfs)?;
    Ok(())
}

/// Extracts a gzipped tar artifact into `dest`, excluding `dev/* proc/* sys/*`
/// and not preserving uid/gid (spec.md §4.6).
fn extract_artifact(artifact_path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let file = fs::File::open(artifact_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive.set_unpack_xattrs(false);
    archive.set_preserve_ownerships(false);

    for entry in archive.entries()? {
        let mut entry = entry.map_err(|e| crate::Error::ExtractFailed(e.to_string()))?;
        let path = entry.path().map_err(|e| crate::Error::ExtractFailed(e.to_string()))?;
        if is_excluded(&path) {
            continue;
        }
        entry.unpack_in(dest).map_err(|e| crate::Error::ExtractFailed(e.to_string()))?;
    }
    Ok(())
}

/// Excludes `dev/*`, `proc/*`, `sys/*` entries from extraction/emission.
fn is_excluded(path: &Path) -> bool {
    path.components().next().is_some_and(|c| {
        let s = c.as_os_str().to_string_lossy();
        s == "dev" || s == "proc" || s == "sys"
    })
}

/// Ensures `dev/ proc/ sys/ tmp/ run/ etc/` exist with their required modes.
fn ensure_special_dirs(rootfs: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    for (name, mode) in REQUIRED_DIRS {
        let dir = rootfs.join(name);
        fs::create_dir_all(&dir)?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(*mode))?;
    }
    Ok(())
}

/// Writes `etc/resolv.conf` with the two fallback nameservers.
fn write_resolv_conf(rootfs: &Path) -> Result<()> {
    let etc = rootfs.join("etc");
    fs::create_dir_all(&etc)?;
    fs::write(etc.join("resolv.conf"), RESOLV_CONF)?;
    Ok(())
}

/// Computes the on-disk size of a rootfs directory, used by `ps --size`.
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_dev_proc_sys_prefixes() {
        assert!(is_excluded(Path::new("dev/null")));
        assert!(is_excluded(Path::new("proc/1/status")));
        assert!(is_excluded(Path::new("sys/kernel")));
        assert!(!is_excluded(Path::new("etc/hostname")));
    }

    #[test]
    fn ensure_special_dirs_creates_all_six() {
        let dir = tempfile::tempdir().unwrap();
        ensure_special_dirs(dir.path()).unwrap();
        for (name, _) in REQUIRED_DIRS {
            assert!(dir.path().join(name).is_dir());
        }
    }

    #[test]
    fn writes_fallback_nameservers() {
        let dir = tempfile::tempdir().unwrap();
        write_resolv_conf(dir.path()).unwrap();
        let content = fs::read_to_string(dir.path().join("etc/resolv.conf")).unwrap();
        assert!(content.contains("8.8.8.8"));
        assert!(content.contains("8.8.4.4"));
    }

    #[test]
    fn dir_size_sums_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"12345").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b"), b"123").unwrap();
        assert_eq!(dir_size(dir.path()), 8);
    }
}
