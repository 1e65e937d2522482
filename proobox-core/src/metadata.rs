//! Container metadata JSON shape (spec.md §4.2, bit-exact).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// On-disk container metadata: `containers/<name>/metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetadata {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Image")]
    pub image: ImageRef,
    #[serde(rename = "State")]
    pub state: ContainerState,
    #[serde(rename = "Config")]
    pub config: ContainerLaunchConfig,
    #[serde(rename = "HostConfig")]
    pub host_config: HostConfig,
    #[serde(rename = "Mounts", default)]
    pub mounts: Vec<String>,
    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: NetworkSettings,
    #[serde(rename = "Paths")]
    pub paths: ContainerPaths,
}

/// Source image reference recorded at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: String,
}

/// Runtime state, see spec.md §4.7's state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Status")]
    pub status: Status,
    #[serde(rename = "Running")]
    pub running: bool,
    #[serde(rename = "DetachedOriginal")]
    pub detached_original: bool,
    #[serde(rename = "InteractiveOriginal")]
    pub interactive_original: bool,
    #[serde(rename = "StartedAt")]
    pub started_at: String,
    #[serde(rename = "FinishedAt", default)]
    pub finished_at: Option<String>,
    #[serde(rename = "ExitCode", default)]
    pub exit_code: Option<i32>,
}

/// One of the four container lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "exited")]
    Exited,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// Launch configuration carried in a container's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerLaunchConfig {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Domainname", default)]
    pub domainname: String,
    #[serde(rename = "User", default = "default_user")]
    pub user: String,
    #[serde(rename = "Env", default)]
    pub env: Vec<String>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "WorkingDir", default = "default_working_dir")]
    pub working_dir: String,
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<serde_json::Value>,
    #[serde(rename = "Healthcheck", default)]
    pub healthcheck: Option<serde_json::Value>,
}

fn default_user() -> String {
    "root".to_owned()
}

fn default_working_dir() -> String {
    "/root".to_owned()
}

/// Host-side configuration: bind mounts and auto-remove.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(rename = "Binds", default)]
    pub binds: Vec<String>,
    #[serde(rename = "AutoRemove", default)]
    pub auto_remove: bool,
}

/// Network settings, always empty in this design (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "Ports", default)]
    pub ports: serde_json::Map<String, serde_json::Value>,
}

/// Filesystem paths associated with a stored container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerPaths {
    #[serde(rename = "RootfsPath")]
    pub rootfs_path: PathBuf,
    #[serde(rename = "LogFile", default)]
    pub log_file: Option<PathBuf>,
    #[serde(rename = "ImagePath")]
    pub image_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContainerMetadata {
        ContainerMetadata {
            id: "a".repeat(64),
            name: "alpine-deadbeef".to_owned(),
            image: ImageRef {
                name: "alpine:3.20.0".to_owned(),
                id: "b".repeat(32),
            },
            state: ContainerState {
                status: Status::Created,
                running: false,
                detached_original: false,
                interactive_original: true,
                started_at: "2026-01-01T00:00:00.000Z".to_owned(),
                finished_at: None,
                exit_code: None,
            },
            config: ContainerLaunchConfig {
                hostname: "alpine-deadbeef".to_owned(),
                domainname: String::new(),
                user: default_user(),
                env: vec![],
                cmd: None,
                image: "alpine:3.20.0".to_owned(),
                working_dir: default_working_dir(),
                entrypoint: None,
                healthcheck: None,
            },
            host_config: HostConfig::default(),
            mounts: vec![],
            network_settings: NetworkSettings::default(),
            paths: ContainerPaths {
                rootfs_path: PathBuf::from("/tmp/rootfs"),
                log_file: None,
                image_path: PathBuf::from("/tmp/x.tar.gz"),
            },
        }
    }

    #[test]
    fn round_trips_through_json() {
        let meta = sample();
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: ContainerMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, meta.id);
        assert_eq!(parsed.state.status, Status::Created);
    }

    #[test]
    fn status_serializes_to_lowercase_strings() {
        let json = serde_json::to_string(&Status::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn defaults_user_and_working_dir_when_absent() {
        let json = serde_json::json!({
            "Hostname": "x", "Image": "alpine:latest",
        });
        let cfg: ContainerLaunchConfig = serde_json::from_value(json).unwrap();
        assert_eq!(cfg.user, "root");
        assert_eq!(cfg.working_dir, "/root");
    }
}
