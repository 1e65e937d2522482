//! Data directory layout, identifier normalization, and timestamps.
//!
//! Grounded on the teacher's `bux_oci::dirs_default_store` override idiom
//! (`BUX_HOME` env var checked before the platform default), adapted to the
//! single fixed layout `spec.md` §6 mandates: `$BASE = ~/.proobox`.

use std::path::PathBuf;

/// Returns the data directory root (`$BASE`).
///
/// `PROOBOX_HOME` overrides the default for tests and alternate installs;
/// otherwise resolves to `~/.proobox` from `$HOME` (spec.md §6 "Environment
/// variables read").
#[must_use]
pub fn base_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PROOBOX_HOME") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".proobox")
}

/// `$BASE/images/` — flat store of `<repo>-<version>.{tar.gz,json}` pairs.
#[must_use]
pub fn images_dir(base: &std::path::Path) -> PathBuf {
    base.join("images")
}

/// `$BASE/containers/` — one subdirectory per container.
#[must_use]
pub fn containers_dir(base: &std::path::Path) -> PathBuf {
    base.join("containers")
}

/// `$BASE/cached_layers/` — content-addressed layer cache.
#[must_use]
pub fn cached_layers_dir(base: &std::path::Path) -> PathBuf {
    base.join("cached_layers")
}

/// `$BASE/config.json` — optional backend configuration.
#[must_use]
pub fn config_path(base: &std::path::Path) -> PathBuf {
    base.join("config.json")
}

/// Normalizes a version string per spec.md §3: `N` → `N.0.0`, `N.M` → `N.M.0`,
/// anything else is passed through unchanged. An absent/empty version
/// normalizes to `latest`.
#[must_use]
pub fn normalize_version(version: &str) -> String {
    if version.is_empty() {
        return "latest".to_owned();
    }
    let parts: Vec<&str> = version.split('.').collect();
    let all_numeric = !parts.is_empty() && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if all_numeric {
        match parts.len() {
            1 => return format!("{version}.0.0"),
            2 => return format!("{version}.0"),
            _ => {}
        }
    }
    version.to_owned()
}

/// Splits a `repository:version` tag, defaulting the version to `latest`.
#[must_use]
pub fn split_tag(tag: &str) -> (String, String) {
    match tag.rsplit_once(':') {
        // Guard against mistaking a registry port (`host:5000/repo`) for a tag.
        Some((repo, version)) if !version.contains('/') => (repo.to_owned(), version.to_owned()),
        _ => (tag.to_owned(), "latest".to_owned()),
    }
}

/// Maps the host architecture (`std::env::consts::ARCH`) to one of the three
/// architectures proobox knows how to run: `arm64`, `armhf`, `amd64`.
pub fn map_architecture(host_arch: &str) -> crate::Result<&'static str> {
    match host_arch {
        "aarch64" => Ok("arm64"),
        "arm" => Ok("armhf"),
        "x86_64" => Ok("amd64"),
        other => Err(crate::Error::ArchUnsupported(other.to_owned())),
    }
}

/// Current UTC timestamp, ISO-8601 with millisecond precision.
#[must_use]
pub fn iso_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_major_version() {
        assert_eq!(normalize_version("3"), "3.0.0");
    }

    #[test]
    fn normalizes_major_minor_version() {
        assert_eq!(normalize_version("3.20"), "3.20.0");
    }

    #[test]
    fn passes_through_full_semver() {
        assert_eq!(normalize_version("3.20.1"), "3.20.1");
    }

    #[test]
    fn passes_through_non_numeric_version() {
        assert_eq!(normalize_version("22.04.3"), "22.04.3");
        assert_eq!(normalize_version("latest"), "latest");
    }

    #[test]
    fn empty_version_defaults_to_latest() {
        assert_eq!(normalize_version(""), "latest");
    }

    #[test]
    fn splits_tag_with_version() {
        assert_eq!(split_tag("alpine:3.20"), ("alpine".to_owned(), "3.20".to_owned()));
    }

    #[test]
    fn splits_tag_without_version_defaults_latest() {
        assert_eq!(split_tag("alpine"), ("alpine".to_owned(), "latest".to_owned()));
    }

    #[test]
    fn maps_known_architectures() {
        assert_eq!(map_architecture("x86_64").unwrap(), "amd64");
        assert_eq!(map_architecture("aarch64").unwrap(), "arm64");
        assert_eq!(map_architecture("arm").unwrap(), "armhf");
    }

    #[test]
    fn rejects_unknown_architecture() {
        assert!(map_architecture("riscv64").is_err());
    }
}
