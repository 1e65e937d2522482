//! Container identifier generation and per-container directory layout.
//!
//! Data-directory-wide concerns (`$BASE`, version normalization, architecture
//! mapping) live in `proobox_image::paths` and are re-exported here so
//! callers of this crate don't need to depend on `proobox-image` directly
//! for path plumbing.

use std::path::{Path, PathBuf};

use rand::Rng;

pub use proobox_image::paths::{base_dir, iso_timestamp, map_architecture};

/// Generates a 64-hex cryptographically random container identifier
/// (spec.md §3: "container ID = 64 hex chars from a cryptographic RNG").
#[must_use]
pub fn new_container_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The first 12 characters of a container ID (spec.md §3 "short form").
#[must_use]
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// Generates a human-friendly container name when none was supplied:
/// `<distro>-<8 random hex>` (spec.md §3).
#[must_use]
pub fn generate_name(distro: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect();
    format!("{distro}-{suffix}")
}

/// `$BASE/containers/` root.
#[must_use]
pub fn containers_dir(base: &Path) -> PathBuf {
    proobox_image::paths::containers_dir(base)
}

/// `$BASE/containers/<name>/` for a specific container.
#[must_use]
pub fn container_dir(base: &Path, name: &str) -> PathBuf {
    containers_dir(base).join(name)
}

/// `$BASE/containers/<name>/rootfs/`.
#[must_use]
pub fn rootfs_path(base: &Path, name: &str) -> PathBuf {
    container_dir(base, name).join("rootfs")
}

/// `$BASE/containers/<name>/metadata.json`.
#[must_use]
pub fn metadata_path(base: &Path, name: &str) -> PathBuf {
    container_dir(base, name).join("metadata.json")
}

/// `$BASE/containers/<name>/container.log`.
#[must_use]
pub fn log_path(base: &Path, name: &str) -> PathBuf {
    container_dir(base, name).join("container.log")
}

/// `$BASE/containers/<name>/exec-<timestamp>.log` for a detached `exec`.
#[must_use]
pub fn exec_log_path(base: &Path, name: &str, timestamp: &str) -> PathBuf {
    container_dir(base, name).join(format!("exec-{timestamp}.log"))
}

/// `$BASE/containers/<name>/step_<n>.log` for a build step.
#[must_use]
pub fn step_log_path(build_dir: &Path, n: usize) -> PathBuf {
    build_dir.join(format!("step_{n}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_container_id_is_64_hex_chars() {
        let id = new_container_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn new_container_id_is_random() {
        assert_ne!(new_container_id(), new_container_id());
    }

    #[test]
    fn short_id_truncates_to_twelve() {
        let id = "a".repeat(64);
        assert_eq!(short_id(&id).len(), 12);
    }

    #[test]
    fn generate_name_has_expected_shape() {
        let name = generate_name("alpine");
        assert!(name.starts_with("alpine-"));
        assert_eq!(name.len(), "alpine-".len() + 8);
    }
}
