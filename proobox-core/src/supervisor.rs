//! Container lifecycle: create, start, stop, restart, exec, logs, ps, rm
//! (spec.md §4.7).

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use proobox_image::Images;
use tracing::{info, warn};

use crate::metadata::{ContainerLaunchConfig, ContainerMetadata, ContainerPaths, ContainerState, HostConfig, ImageRef, NetworkSettings, Status};
use crate::{Error, Result, liveness, paths as core_paths, rootfs, tracer};

/// Default `stop` grace period before escalating to `KILL`.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait after `KILL` before giving up (spec.md §4.7 `stop`).
const KILL_GRACE: Duration = Duration::from_secs(1);
/// Poll interval while waiting for a signaled process to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parses a signal name (`TERM`, `SIGTERM`, `usr1`, ...) for `stop -s`.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let normalized = upper.strip_prefix("SIG").unwrap_or(&upper);
    match normalized {
        "HUP" => Ok(Signal::SIGHUP),
        "INT" => Ok(Signal::SIGINT),
        "QUIT" => Ok(Signal::SIGQUIT),
        "ILL" => Ok(Signal::SIGILL),
        "TRAP" => Ok(Signal::SIGTRAP),
        "ABRT" => Ok(Signal::SIGABRT),
        "BUS" => Ok(Signal::SIGBUS),
        "FPE" => Ok(Signal::SIGFPE),
        "KILL" => Ok(Signal::SIGKILL),
        "USR1" => Ok(Signal::SIGUSR1),
        "SEGV" => Ok(Signal::SIGSEGV),
        "USR2" => Ok(Signal::SIGUSR2),
        "PIPE" => Ok(Signal::SIGPIPE),
        "ALRM" => Ok(Signal::SIGALRM),
        "TERM" => Ok(Signal::SIGTERM),
        "CHLD" => Ok(Signal::SIGCHLD),
        "CONT" => Ok(Signal::SIGCONT),
        "STOP" => Ok(Signal::SIGSTOP),
        "TSTP" => Ok(Signal::SIGTSTP),
        "TTIN" => Ok(Signal::SIGTTIN),
        "TTOU" => Ok(Signal::SIGTTOU),
        "URG" => Ok(Signal::SIGURG),
        "XCPU" => Ok(Signal::SIGXCPU),
        "XFSZ" => Ok(Signal::SIGXFSZ),
        "VTALRM" => Ok(Signal::SIGVTALRM),
        "PROF" => Ok(Signal::SIGPROF),
        "WINCH" => Ok(Signal::SIGWINCH),
        "IO" => Ok(Signal::SIGIO),
        "PWR" => Ok(Signal::SIGPWR),
        "SYS" => Ok(Signal::SIGSYS),
        _ => Err(Error::Invalid(format!("unknown signal {name:?}"))),
    }
}

/// Options accepted by [`Supervisor::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub name: Option<String>,
    pub detach: bool,
    pub interactive: bool,
    pub tty: bool,
    pub auto_remove: bool,
    pub env: Vec<String>,
    pub volumes: Vec<(String, String)>,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
}

/// Options accepted by [`Supervisor::exec`].
#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    pub detach: bool,
    pub interactive: bool,
    pub tty: bool,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub env: Vec<String>,
}

/// Options accepted by [`Supervisor::ps`].
#[derive(Debug, Clone, Default)]
pub struct PsOpts {
    pub all: bool,
    pub quiet: bool,
    pub latest: bool,
    pub last: Option<usize>,
    pub size: bool,
}

/// A single row of `ps` output.
#[derive(Debug, Clone)]
pub struct PsRow {
    pub short_id: String,
    pub name: String,
    pub image: String,
    pub command: String,
    pub status: Status,
    pub running: bool,
    pub started_at: String,
    pub size_bytes: Option<u64>,
}

/// Options accepted by [`Supervisor::rm`].
#[derive(Debug, Clone, Default)]
pub struct RmOpts {
    pub force: bool,
}

/// Options accepted by [`Supervisor::logs`].
#[derive(Debug, Clone, Default)]
pub struct LogsOpts {
    pub follow: bool,
    pub since: Option<String>,
    pub until: Option<String>,
    pub tail: Option<usize>,
    pub timestamps: bool,
    pub details: bool,
}

/// Drives the container lifecycle over a single `$BASE` data directory.
pub struct Supervisor {
    base: PathBuf,
    images: Images,
}

impl Supervisor {
    /// Opens the supervisor rooted at `base` (see [`core_paths::base_dir`]).
    pub fn open(base: PathBuf) -> Result<Self> {
        let images = Images::open(&base)?;
        fs::create_dir_all(core_paths::containers_dir(&base))?;
        Ok(Self { base, images })
    }

    /// Resolves a name-or-short-id to stored metadata.
    pub fn resolve(&self, name_or_id: &str) -> Result<ContainerMetadata> {
        let dir = core_paths::container_dir(&self.base, name_or_id);
        if dir.is_dir() {
            return self.read_metadata(name_or_id);
        }

        let mut matches = Vec::new();
        for entry in fs::read_dir(core_paths::containers_dir(&self.base))? {
            let entry = entry?;
            let Some(candidate_name) = entry.file_name().to_str().map(str::to_owned) else { continue };
            if let Ok(meta) = self.read_metadata(&candidate_name) {
                if meta.id.starts_with(name_or_id) {
                    matches.push(meta);
                }
            }
        }
        match matches.len() {
            0 => Err(Error::NotFound(name_or_id.to_owned())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::Ambiguous(name_or_id.to_owned())),
        }
    }

    fn read_metadata(&self, name: &str) -> Result<ContainerMetadata> {
        let path = core_paths::metadata_path(&self.base, name);
        let data = fs::read_to_string(&path).map_err(Error::Io)?;
        serde_json::from_str(&data).map_err(|source| Error::MetadataMalformed { path, source })
    }

    fn write_metadata(&self, name: &str, meta: &ContainerMetadata) -> Result<()> {
        let path = core_paths::metadata_path(&self.base, name);
        proobox_image::fsutil::atomic_write_json(&path, meta).map_err(|source| Error::MetadataWriteFailed { path, source })
    }

    /// `run(image, opts) -> container_id` (spec.md §4.7).
    pub fn run(&self, image: &str, opts: RunOpts) -> Result<String> {
        if opts.detach && opts.interactive && opts.tty {
            return Err(Error::Invalid("--detach and --interactive --tty are mutually exclusive".to_owned()));
        }

        let image_meta = self.images.ensure(image)?;
        let distro = tracer::Distro::from_repo(&split_repo(image));
        let name = opts.name.clone().unwrap_or_else(|| core_paths::generate_name(&split_repo(image)));
        let container_dir = core_paths::container_dir(&self.base, &name);
        if container_dir.is_dir() {
            return Err(Error::AlreadyExists(name));
        }
        fs::create_dir_all(&container_dir)?;

        let id = core_paths::new_container_id();
        let rootfs_dir = core_paths::rootfs_path(&self.base, &name);
        rootfs::assemble(&self.images.artifact_path(image), image, &rootfs_dir, self.images.layers())?;

        let working_dir = tracer::resolve_working_dir(opts.working_dir.as_deref(), Some(image_meta.container_config.working_dir.as_str()));
        let command = tracer::resolve_command(&opts.command, image_meta.container_config.cmd.as_deref(), distro, opts.interactive);
        let env = tracer::build_env(&image_meta.container_config.env, &opts.env);

        let mut meta = ContainerMetadata {
            id: id.clone(),
            name: name.clone(),
            image: ImageRef { name: image.to_owned(), id: image_meta.id.clone() },
            state: ContainerState {
                status: Status::Created,
                running: false,
                detached_original: opts.detach,
                interactive_original: opts.interactive,
                started_at: core_paths::iso_timestamp(),
                finished_at: None,
                exit_code: None,
            },
            config: ContainerLaunchConfig {
                hostname: name.clone(),
                domainname: String::new(),
                user: "root".to_owned(),
                env: env.clone(),
                cmd: if command.is_empty() { None } else { Some(command.clone()) },
                image: image.to_owned(),
                working_dir: working_dir.clone(),
                entrypoint: None,
                healthcheck: None,
            },
            host_config: HostConfig {
                binds: opts.volumes.iter().map(|(h, g)| format!("{h}:{g}")).collect(),
                auto_remove: opts.auto_remove,
            },
            mounts: vec![],
            network_settings: NetworkSettings::default(),
            paths: ContainerPaths {
                rootfs_path: rootfs_dir.clone(),
                log_file: if opts.detach { Some(core_paths::log_path(&self.base, &name)) } else { None },
                image_path: self.images.artifact_path(image),
            },
        };
        self.write_metadata(&name, &meta)?;

        let spec = tracer::TracerSpec {
            rootfs: rootfs_dir.clone(),
            distro,
            user_binds: opts.volumes.clone(),
            working_dir,
            env: env.clone(),
            command,
            interactive: opts.interactive,
            kill_on_exit: true,
        };
        let argv = tracer::build_argv(&spec);

        meta.state.status = Status::Running;
        meta.state.running = true;
        self.write_metadata(&name, &meta)?;

        let exit_code = if opts.detach {
            let child = spawn_detached(&argv, &env, &core_paths::log_path(&self.base, &name))?;
            info!(%name, pid = child.id(), "container launched detached");
            None
        } else {
            let mut child = tracer::spawn(&argv, &env, Stdio::inherit(), Stdio::inherit(), Stdio::inherit())?;
            let status = child.wait()?;
            status.code()
        };

        if let Some(code) = exit_code {
            meta.state.status = Status::Exited;
            meta.state.running = false;
            meta.state.finished_at = Some(core_paths::iso_timestamp());
            meta.state.exit_code = Some(code);
            self.write_metadata(&name, &meta)?;

            if meta.host_config.auto_remove {
                self.rm(&[name.clone()], RmOpts { force: true })?;
            }
        }

        Ok(id)
    }

    /// `start(name)` — only valid from `exited` (spec.md §4.7).
    pub fn start(&self, name_or_id: &str) -> Result<()> {
        let mut meta = self.resolve(name_or_id)?;
        if meta.state.status != Status::Exited {
            return Err(Error::Invalid(format!("container {name_or_id:?} is not exited")));
        }

        let distro = tracer::Distro::from_repo(&split_repo(&meta.image.name));
        let user_binds: Vec<(String, String)> = meta
            .host_config
            .binds
            .iter()
            .filter_map(|b| b.split_once(':').map(|(h, g)| (h.to_owned(), g.to_owned())))
            .collect();

        let spec = tracer::TracerSpec {
            rootfs: meta.paths.rootfs_path.clone(),
            distro,
            user_binds,
            working_dir: meta.config.working_dir.clone(),
            env: meta.config.env.clone(),
            command: meta.config.cmd.clone().unwrap_or_default(),
            interactive: meta.state.interactive_original,
            kill_on_exit: true,
        };
        let argv = tracer::build_argv(&spec);

        meta.state.status = Status::Running;
        meta.state.running = true;
        meta.state.started_at = core_paths::iso_timestamp();
        meta.state.finished_at = None;
        self.write_metadata(&meta.name, &meta)?;

        if meta.state.detached_original {
            spawn_detached(&argv, &meta.config.env, &core_paths::log_path(&self.base, &meta.name))?;
        } else {
            let mut child = tracer::spawn(&argv, &meta.config.env, Stdio::inherit(), Stdio::inherit(), Stdio::inherit())?;
            let status = child.wait()?;
            meta.state.status = Status::Exited;
            meta.state.running = false;
            meta.state.finished_at = Some(core_paths::iso_timestamp());
            meta.state.exit_code = status.code();
            self.write_metadata(&meta.name, &meta)?;
        }
        Ok(())
    }

    /// `stop(name, timeout, signal, force)` (spec.md §4.7).
    ///
    /// `signal` is the initial signal sent (default `SIGTERM`); `force`
    /// overrides it to `SIGKILL` regardless of what was requested.
    pub fn stop(&self, name_or_id: &str, timeout: Option<Duration>, signal: Signal, force: bool) -> Result<()> {
        let mut meta = self.resolve(name_or_id)?;
        let timeout = timeout.unwrap_or(DEFAULT_STOP_TIMEOUT);
        let pids = liveness::find_tracer_pids(&meta.paths.rootfs_path);

        if pids.is_empty() {
            meta.state.status = Status::Exited;
            meta.state.running = false;
            self.write_metadata(&meta.name, &meta)?;
            return Ok(());
        }

        let signal = if force { Signal::SIGKILL } else { signal };
        for pid in &pids {
            let _ = signal::kill(Pid::from_raw(*pid), signal);
        }

        if !wait_for_exit(&meta.paths.rootfs_path, timeout) {
            warn!(name = %meta.name, "stop timeout exceeded, escalating to KILL");
            for pid in liveness::find_tracer_pids(&meta.paths.rootfs_path) {
                let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
            if !wait_for_exit(&meta.paths.rootfs_path, KILL_GRACE) {
                return Err(Error::StopFailed(meta.name.clone()));
            }
        }

        meta.state.status = Status::Exited;
        meta.state.running = false;
        meta.state.finished_at = Some(core_paths::iso_timestamp());
        self.write_metadata(&meta.name, &meta)?;
        Ok(())
    }

    /// `restart(name, timeout)` = `stop --force` then `start`.
    pub fn restart(&self, name_or_id: &str, timeout: Option<Duration>) -> Result<()> {
        self.stop(name_or_id, timeout, Signal::SIGTERM, true)?;
        self.start(name_or_id)
    }

    /// `exec(name, cmd, opts)` — requires `running` (spec.md §4.7).
    pub fn exec(&self, name_or_id: &str, cmd: Vec<String>, opts: ExecOpts) -> Result<Option<i32>> {
        let meta = self.resolve(name_or_id)?;
        if !liveness::is_running(&meta.paths.rootfs_path) {
            return Err(Error::Invalid(format!("container {name_or_id:?} is not running")));
        }
        if let Some(user) = &opts.user {
            if user != "root" {
                warn!(%user, "--user is advisory only; wrap the command with su inside the guest");
            }
        }

        let distro = tracer::Distro::from_repo(&split_repo(&meta.image.name));
        let user_binds: Vec<(String, String)> = meta
            .host_config
            .binds
            .iter()
            .filter_map(|b| b.split_once(':').map(|(h, g)| (h.to_owned(), g.to_owned())))
            .collect();
        let working_dir = tracer::resolve_working_dir(opts.working_dir.as_deref(), Some(meta.config.working_dir.as_str()));
        let env = tracer::build_env(&meta.config.env, &opts.env);

        let spec = tracer::TracerSpec {
            rootfs: meta.paths.rootfs_path.clone(),
            distro,
            user_binds,
            working_dir,
            env: env.clone(),
            command: cmd,
            interactive: opts.interactive,
            kill_on_exit: true,
        };
        let argv = tracer::build_argv(&spec);

        if opts.detach {
            let log_path = core_paths::exec_log_path(&self.base, &meta.name, &core_paths::iso_timestamp());
            spawn_detached(&argv, &env, &log_path)?;
            Ok(None)
        } else {
            let mut child = tracer::spawn(&argv, &env, Stdio::inherit(), Stdio::inherit(), Stdio::inherit())?;
            let status = child.wait()?;
            Ok(status.code())
        }
    }

    /// `logs(name, opts)` — prints `container.log` to `out` with the
    /// filters spec.md §4.7 describes.
    pub fn logs(&self, name_or_id: &str, opts: &LogsOpts, out: &mut dyn Write) -> Result<()> {
        let meta = self.resolve(name_or_id)?;
        if opts.details {
            writeln!(out, "{}", serde_json::to_string_pretty(&meta)?)?;
            return Ok(());
        }

        let log_path = core_paths::log_path(&self.base, &meta.name);
        if !log_path.is_file() {
            return Ok(());
        }
        let file = fs::File::open(&log_path)?;
        let mut lines: Vec<String> = std::io::BufReader::new(file).lines().collect::<std::io::Result<_>>()?;

        if let Some(since) = &opts.since {
            lines.retain(|l| l.as_str() >= since.as_str());
        }
        if let Some(until) = &opts.until {
            lines.retain(|l| l.as_str() <= until.as_str());
        }
        if let Some(n) = opts.tail {
            let start = lines.len().saturating_sub(n);
            lines = lines.split_off(start);
        }
        for line in &lines {
            writeln!(out, "{}", format_log_line(line, opts.timestamps))?;
        }

        if opts.follow {
            self.follow_log(&log_path, out, opts.timestamps)?;
        }
        Ok(())
    }

    fn follow_log(&self, log_path: &Path, out: &mut dyn Write, timestamps: bool) -> Result<()> {
        let mut pos = fs::metadata(log_path)?.len();
        loop {
            std::thread::sleep(POLL_INTERVAL);
            let len = fs::metadata(log_path)?.len();
            if len > pos {
                use std::io::{Seek, SeekFrom};
                let mut file = fs::File::open(log_path)?;
                file.seek(SeekFrom::Start(pos))?;
                let mut buf = String::new();
                file.read_to_string(&mut buf)?;
                for line in buf.lines() {
                    writeln!(out, "{}", format_log_line(line, timestamps))?;
                }
                pos = len;
            }
        }
    }

    /// `ps(opts)` (spec.md §4.7).
    pub fn ps(&self, opts: &PsOpts) -> Result<Vec<PsRow>> {
        let mut rows = Vec::new();
        for entry in fs::read_dir(core_paths::containers_dir(&self.base))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else { continue };
            let Ok(meta) = self.read_metadata(&name) else { continue };

            let running = liveness::is_running(&meta.paths.rootfs_path);
            if !opts.all && !running {
                continue;
            }

            let size_bytes = opts.size.then(|| rootfs::dir_size(&meta.paths.rootfs_path));
            rows.push(PsRow {
                short_id: core_paths::short_id(&meta.id).to_owned(),
                name: meta.name.clone(),
                image: meta.image.name.clone(),
                command: meta.config.cmd.clone().unwrap_or_default().join(" "),
                status: meta.state.status,
                running,
                started_at: meta.state.started_at.clone(),
                size_bytes,
            });
        }

        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if opts.latest {
            rows.truncate(1);
        } else if let Some(n) = opts.last {
            rows.truncate(n);
        }
        Ok(rows)
    }

    /// `rm(names, opts)` (spec.md §4.7).
    pub fn rm(&self, names: &[String], opts: RmOpts) -> Result<()> {
        for name_or_id in names {
            let meta = self.resolve(name_or_id)?;
            let running = liveness::is_running(&meta.paths.rootfs_path);
            if running && !opts.force {
                return Err(Error::InUse(meta.name.clone()));
            }
            if running {
                self.stop(&meta.name, Some(DEFAULT_STOP_TIMEOUT), Signal::SIGTERM, true)?;
            }
            fs::remove_dir_all(core_paths::container_dir(&self.base, &meta.name))?;
        }
        Ok(())
    }
}

/// Spawns a detached tracer invocation with stdout/stderr captured and
/// written to `log_path` one line at a time, each prefixed with an
/// ISO-8601 timestamp (spec.md §6 "since/until filter by lexicographic
/// prefix match on ISO-8601 lines").
fn spawn_detached(argv: &[String], env: &[String], log_path: &Path) -> Result<std::process::Child> {
    let log = Arc::new(Mutex::new(OpenOptions::new().create(true).append(true).open(log_path)?));
    let mut child = tracer::spawn(argv, env, Stdio::null(), Stdio::piped(), Stdio::piped())?;

    for reader in [child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>), child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>)]
        .into_iter()
        .flatten()
    {
        let log = Arc::clone(&log);
        std::thread::spawn(move || {
            for line in BufReader::new(reader).lines().map_while(std::result::Result::ok) {
                if let Ok(mut file) = log.lock() {
                    let _ = writeln!(file, "{} {line}", core_paths::iso_timestamp());
                }
            }
        });
    }

    Ok(child)
}

/// Renders a stored log line, stripping the leading ISO-8601 timestamp
/// `spawn_detached` prefixed unless `timestamps` asks to keep it.
fn format_log_line(line: &str, timestamps: bool) -> &str {
    if timestamps {
        return line;
    }
    line.split_once(' ').map_or(line, |(_, rest)| rest)
}

/// Extracts the repository part of a `repo:version` reference.
fn split_repo(tag: &str) -> String {
    tag.rsplit_once(':').map_or_else(|| tag.to_owned(), |(repo, _)| repo.to_owned())
}

/// Polls liveness until the rootfs has no tracer processes left, or timeout.
fn wait_for_exit(rootfs: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !liveness::is_running(rootfs) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_repo_drops_version() {
        assert_eq!(split_repo("alpine:3.20.0"), "alpine");
        assert_eq!(split_repo("alpine"), "alpine");
    }
}
