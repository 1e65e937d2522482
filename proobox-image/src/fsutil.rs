//! Filesystem helpers shared by the metadata store, layer cache, and image store.
//!
//! The atomic-write idiom is grounded directly on the teacher's
//! `bux_oci::store::atomic_write` (write to a sibling `.tmp`, `sync_all`,
//! `rename`), extended with spec.md §4.2's documented fallback: if `rename`
//! fails because the `.tmp` file and the destination are on different
//! filesystems (`EXDEV`), fall back to copy + unlink.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Writes `data` to `path` atomically.
///
/// Writes to a sibling `<path>.tmp` first, `fsync`s it, then renames it into
/// place. If the rename fails with `EXDEV` (destination on a different
/// device), falls back to copy + unlink of the temp file. Any other failure
/// of both paths is returned to the caller, who should report
/// `MetadataWriteFailed` and leave the `.tmp` file in place for inspection.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
    }

    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
            fs::copy(&tmp, path)?;
            fs::remove_file(&tmp)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    atomic_write(path, &data)
}

/// Path of the sibling temp file used during an atomic write.
fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// The `EXDEV` errno value ("cross-device link"), without pulling in `libc`
/// for a single constant on every platform this crate might build for.
const fn libc_exdev() -> i32 {
    18
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn atomic_write_creates_file_and_cleans_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[derive(serde::Serialize)]
    struct Sample {
        x: u32,
    }

    #[test]
    fn atomic_write_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        atomic_write_json(&path, &Sample { x: 7 }).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["x"], 7);
    }
}
