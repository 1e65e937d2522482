//! Image metadata JSON shape (spec.md §4.2, bit-exact).

use serde::{Deserialize, Serialize};

/// On-disk image metadata: `images/<repo>-<version>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Content-derived identifier (opaque 32-hex string).
    #[serde(rename = "Id")]
    pub id: String,
    /// `repo:tag` labels attached to this image.
    #[serde(rename = "RepoTags")]
    pub repo_tags: Vec<String>,
    /// Creation timestamp, UTC ISO-8601 with milliseconds.
    #[serde(rename = "Created")]
    pub created: String,
    /// Compressed artifact byte size.
    #[serde(rename = "Size")]
    pub size: u64,
    /// Directory-content hash used as a layer-cache key (opaque, not a byte count).
    #[serde(rename = "VirtualSize")]
    pub virtual_size: String,
    /// Container defaults inherited by `run`/`exec` unless overridden.
    #[serde(rename = "ContainerConfig")]
    pub container_config: ContainerConfig,
    /// Target operating system (e.g. `linux`).
    #[serde(rename = "Os")]
    pub os: String,
    /// Target architecture (`arm64`, `armhf`, `amd64`).
    #[serde(rename = "Architecture")]
    pub architecture: String,
    /// Filesystem paths related to this image.
    #[serde(rename = "Paths")]
    pub paths: ImagePaths,
}

/// Default command/environment baked into an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Default command as an ordered sequence of strings, absent if unset.
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
    /// Default working directory; defaults to `/root` when absent on parse.
    #[serde(rename = "WorkingDir", default = "default_working_dir")]
    pub working_dir: String,
    /// Always `null` — proobox images never carry a distinct entrypoint field.
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<serde_json::Value>,
    /// Default environment, ordered `KEY=VALUE` strings.
    #[serde(rename = "Env", default)]
    pub env: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            cmd: None,
            working_dir: default_working_dir(),
            entrypoint: None,
            env: Vec::new(),
        }
    }
}

fn default_working_dir() -> String {
    "/root".to_owned()
}

/// Filesystem paths associated with a stored image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePaths {
    /// Absolute path of the `tar.gz` artifact.
    #[serde(rename = "ImagePath")]
    pub image_path: std::path::PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absent_cmd_and_env() {
        let json = serde_json::json!({
            "Id": "a".repeat(32),
            "RepoTags": ["alpine:3.20.0"],
            "Created": "2026-01-01T00:00:00.000Z",
            "Size": 1234,
            "VirtualSize": "deadbeefcafe",
            "ContainerConfig": { "WorkingDir": "/root" },
            "Os": "linux",
            "Architecture": "arm64",
            "Paths": { "ImagePath": "/tmp/x.tar.gz" },
        });
        let meta: ImageMetadata = serde_json::from_value(json).unwrap();
        assert!(meta.container_config.cmd.is_none());
        assert!(meta.container_config.env.is_empty());
        assert_eq!(meta.container_config.working_dir, "/root");
    }

    #[test]
    fn defaults_working_dir_when_absent() {
        let json = serde_json::json!({
            "Id": "a".repeat(32),
            "RepoTags": [],
            "Created": "2026-01-01T00:00:00.000Z",
            "Size": 0,
            "VirtualSize": "unknown",
            "ContainerConfig": {},
            "Os": "linux",
            "Architecture": "amd64",
            "Paths": { "ImagePath": "/tmp/y.tar.gz" },
        });
        let meta: ImageMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(meta.container_config.working_dir, "/root");
    }
}
