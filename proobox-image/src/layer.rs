//! Content-addressed layer cache: `cached_layers/layer-<12-hex>/`.
//!
//! Grounded on the teacher's `DiskManager` (`bux/src/disk.rs`): a
//! staging-directory-then-rename store keyed by a content digest, opened
//! once and reused for every lookup/fill. Unlike `DiskManager`, layers here
//! are directory trees copied with `walkdir`, not ext4 disk images — spec.md
//! §4.3 defines a layer as "a directory snapshot", not a block device.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Directory-per-layer content-addressed cache.
#[derive(Debug, Clone)]
pub struct LayerCache {
    root: PathBuf,
}

impl LayerCache {
    /// Opens (creating if needed) the layer cache rooted at `cached_layers/`.
    pub fn open(root: impl Into<PathBuf>) -> crate::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory for a given cache key (may not exist yet).
    #[must_use]
    pub fn dir_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("layer-{key}"))
    }

    /// Looks up a cache entry. A hit requires the directory to exist and be
    /// non-empty (spec.md §4.3: "hit iff directory exists and is non-empty").
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        let dir = self.dir_for(key);
        let non_empty = fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_some());
        non_empty.then_some(dir)
    }

    /// Snapshots `src_dir` into the cache under `key` via recursive copy,
    /// preserving permissions and symlinks. Best-effort: the caller should
    /// log failures as warnings rather than treat them as fatal (spec.md
    /// §4.3, §7 "cache-fill failures during build are downgraded to
    /// warnings").
    pub fn fill(&self, key: &str, src_dir: &Path) -> std::io::Result<()> {
        let dest = self.dir_for(key);
        let staging = self.root.join(format!("layer-{key}.tmp"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_dir_recursive(src_dir, &staging)?;
        if dest.exists() {
            // Another fill beat us to it — discard our staging copy.
            fs::remove_dir_all(&staging)?;
            return Ok(());
        }
        fs::rename(&staging, &dest)
    }
}

/// Computes the first 12 hex characters of the SHA-256 digest of `data`.
///
/// This is the `short_sha256` primitive spec.md §4.3 composes layer keys
/// from: FROM-layer key = `short_sha256(base_image_tag)`; step-layer key =
/// `short_sha256(line)` (plus `short_sha256(source_bytes)` for `COPY`).
#[must_use]
pub fn short_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex_prefix(&digest, 12)
}

/// Returns the first `n` hex characters of a byte slice's hex encoding.
fn hex_prefix(bytes: &[u8], n: usize) -> String {
    let mut s = String::with_capacity(n);
    for b in bytes {
        if s.len() >= n {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(n);
    s
}

/// Composes a step-layer key from the previous layer's key and this step's key.
///
/// spec.md §4.3: "the per-step key is composed with the previous layer's key
/// as `previous ‖ '-' ‖ step`".
#[must_use]
pub fn compose_key(previous: &str, step: &str) -> String {
    format!("{previous}-{step}")
}

/// Recursively copies a directory tree, preserving permissions and symlinks.
///
/// Shared by the layer cache's `fill` and by callers that need to restore a
/// cache hit or a build snapshot into a plain directory outside the cache
/// (container rootfs assembly, the builder's step-layer walk).
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(src).map_err(std::io::Error::other)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link_target, &target)?;
            #[cfg(not(unix))]
            fs::copy(entry.path(), &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = entry.metadata().map_err(std::io::Error::other)?.permissions().mode();
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sha256_is_twelve_hex_chars() {
        let key = short_sha256(b"FROM alpine:3.20.0");
        assert_eq!(key.len(), 12);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn short_sha256_is_deterministic() {
        assert_eq!(short_sha256(b"hello"), short_sha256(b"hello"));
        assert_ne!(short_sha256(b"hello"), short_sha256(b"world"));
    }

    #[test]
    fn compose_key_joins_with_dash() {
        assert_eq!(compose_key("abc123", "def456"), "abc123-def456");
    }

    #[test]
    fn lookup_misses_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LayerCache::open(dir.path().join("cached_layers")).unwrap();
        fs::create_dir_all(cache.dir_for("deadbeef0000")).unwrap();
        assert!(cache.lookup("deadbeef0000").is_none());
    }

    #[test]
    fn fill_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LayerCache::open(dir.path().join("cached_layers")).unwrap();

        let src = dir.path().join("src");
        fs::create_dir_all(src.join("etc")).unwrap();
        fs::write(src.join("etc/hostname"), b"box").unwrap();

        cache.fill("abcdef012345", &src).unwrap();
        let hit = cache.lookup("abcdef012345").expect("cache hit");
        assert_eq!(fs::read_to_string(hit.join("etc/hostname")).unwrap(), "box");
    }
}
