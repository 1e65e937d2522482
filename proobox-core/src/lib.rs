//! Container engine core for the proobox rootless container manager.
//!
//! # Architecture
//!
//! ```text
//! Containers (public API)
//!  ├── Supervisor  (lifecycle: run/start/stop/restart/exec/logs/ps/rm)
//!  │    ├── rootfs     (FROM-layer cache + artifact extraction)
//!  │    ├── tracer     (argv assembly, env sanitizing, process spawn)
//!  │    ├── jail       (pre-exec hardening)
//!  │    └── liveness   (/proc-based running check)
//!  └── proobox_image::Images (pull/store fallback, reused directly)
//! ```

#![allow(clippy::missing_docs_in_private_items)]

mod error;
mod jail;
mod liveness;
pub mod metadata;
pub mod paths;
pub mod rootfs;
mod supervisor;
pub mod tracer;

pub use error::{Error, Result};
pub use nix::sys::signal::Signal;
pub use supervisor::{ExecOpts, LogsOpts, PsOpts, PsRow, RmOpts, RunOpts, Supervisor, parse_signal};
pub use tracer::Distro;

use std::path::Path;
use std::time::Duration;

use proobox_image::Images;

/// Ties the container supervisor and image subsystem together behind a
/// single entry point, the way `proobox_image::Images` does for pulls.
pub struct Containers {
    supervisor: Supervisor,
    images: Images,
}

impl Containers {
    /// Opens the engine rooted at `$BASE` (see [`paths::base_dir`]).
    pub fn open(base: &Path) -> Result<Self> {
        let supervisor = Supervisor::open(base.to_path_buf())?;
        let images = Images::open(base)?;
        Ok(Self { supervisor, images })
    }

    #[must_use]
    pub fn images(&self) -> &Images {
        &self.images
    }

    /// Pulls `tag` if needed, then runs a new container from it.
    pub fn run(&self, tag: &str, opts: RunOpts) -> Result<String> {
        self.supervisor.run(tag, opts)
    }

    pub fn start(&self, name_or_id: &str) -> Result<()> {
        self.supervisor.start(name_or_id)
    }

    pub fn stop(&self, name_or_id: &str, timeout: Option<Duration>, signal: Signal, force: bool) -> Result<()> {
        self.supervisor.stop(name_or_id, timeout, signal, force)
    }

    pub fn restart(&self, name_or_id: &str, timeout: Option<Duration>) -> Result<()> {
        self.supervisor.restart(name_or_id, timeout)
    }

    pub fn exec(&self, name_or_id: &str, cmd: Vec<String>, opts: ExecOpts) -> Result<Option<i32>> {
        self.supervisor.exec(name_or_id, cmd, opts)
    }

    pub fn logs(&self, name_or_id: &str, opts: &LogsOpts, out: &mut dyn std::io::Write) -> Result<()> {
        self.supervisor.logs(name_or_id, opts, out)
    }

    pub fn ps(&self, opts: &PsOpts) -> Result<Vec<PsRow>> {
        self.supervisor.ps(opts)
    }

    pub fn rm(&self, names: &[String], opts: RmOpts) -> Result<()> {
        self.supervisor.rm(names, opts)
    }

    /// Resolves a name-or-short-id to stored metadata, for callers that need
    /// more than the summary `ps` rows expose.
    pub fn inspect(&self, name_or_id: &str) -> Result<metadata::ContainerMetadata> {
        self.supervisor.resolve(name_or_id)
    }
}
