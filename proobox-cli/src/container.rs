//! `run`, `ps`, `rm`, `start`, `stop`, `restart`, `exec`, `logs` subcommands.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use proobox_core::{Containers, ExecOpts, LogsOpts, PsOpts, RmOpts, RunOpts, parse_signal};

/// `proobox run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Image reference, e.g. `alpine:3.20.0`.
    image: String,

    /// Container name; generated from the repository name if omitted.
    #[arg(long)]
    name: Option<String>,

    /// Run detached, printing the container id and returning immediately.
    #[arg(short, long)]
    detach: bool,

    /// Keep stdin open.
    #[arg(short, long)]
    interactive: bool,

    /// Allocate a pseudo-tty (only meaningful with `--interactive`).
    #[arg(short, long)]
    tty: bool,

    /// Remove the container automatically when it exits.
    #[arg(long = "rm")]
    auto_remove: bool,

    /// Additional guest environment variables, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Bind mounts, `host:container`. Repeatable.
    #[arg(short = 'v', long = "volume", value_name = "HOST:CONTAINER")]
    volume: Vec<String>,

    /// Working directory inside the guest.
    #[arg(short, long)]
    workdir: Option<String>,

    /// Command and arguments to run instead of the image default.
    #[arg(last = true)]
    command: Vec<String>,
}

/// `proobox ps`.
#[derive(Debug, Args)]
pub struct PsArgs {
    /// Show stopped containers too.
    #[arg(short, long)]
    all: bool,

    /// Print only container ids.
    #[arg(short, long)]
    quiet: bool,

    /// Show only the most recently started container.
    #[arg(short, long)]
    latest: bool,

    /// Show only the last N containers.
    #[arg(short = 'n', long)]
    last: Option<usize>,

    /// Include rootfs directory size.
    #[arg(short, long)]
    size: bool,
}

/// `proobox rm`.
#[derive(Debug, Args)]
pub struct RmArgs {
    /// Container names or short-ids.
    #[arg(required = true)]
    names: Vec<String>,

    /// Stop a running container first instead of failing.
    #[arg(short, long)]
    force: bool,
}

/// `proobox stop`.
#[derive(Debug, Args)]
pub struct StopArgs {
    /// Container name or short-id.
    name: String,

    /// Seconds to wait for graceful exit before escalating to `KILL`.
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Initial signal to send, e.g. `TERM`, `USR1`, `KILL`.
    #[arg(short, long, default_value = "TERM")]
    signal: String,

    /// Send `KILL` immediately instead of the requested signal.
    #[arg(short, long)]
    force: bool,
}

/// `proobox restart`.
#[derive(Debug, Args)]
pub struct RestartArgs {
    /// Container name or short-id.
    name: String,

    /// Seconds to wait for graceful exit before escalating to `KILL`.
    #[arg(short, long)]
    timeout: Option<u64>,
}

/// `proobox exec`.
#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Container name or short-id.
    name: String,

    /// Run detached.
    #[arg(short, long)]
    detach: bool,

    /// Keep stdin open.
    #[arg(short, long)]
    interactive: bool,

    /// Allocate a pseudo-tty.
    #[arg(short, long)]
    tty: bool,

    /// Run as this user. Only `root` is directly supported; anything else is advisory.
    #[arg(short, long)]
    user: Option<String>,

    /// Working directory inside the guest.
    #[arg(short, long)]
    workdir: Option<String>,

    /// Additional guest environment variables, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Command and arguments to run.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

/// `proobox logs`.
#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Container name or short-id.
    name: String,

    /// Stream new output as it is appended.
    #[arg(short, long)]
    follow: bool,

    /// Only show lines at or after this ISO-8601 prefix.
    #[arg(long)]
    since: Option<String>,

    /// Only show lines at or before this ISO-8601 prefix.
    #[arg(long)]
    until: Option<String>,

    /// Only show the last N lines.
    #[arg(long)]
    tail: Option<usize>,

    /// Prefix each line with its timestamp.
    #[arg(long)]
    timestamps: bool,

    /// Print the full metadata record instead of log lines.
    #[arg(long)]
    details: bool,
}

fn parse_volume(spec: &str) -> Result<(String, String)> {
    spec.split_once(':')
        .map(|(h, c)| (h.to_owned(), c.to_owned()))
        .ok_or_else(|| anyhow::anyhow!("malformed volume {spec:?}, expected HOST:CONTAINER"))
}

pub fn run(base: &Path, args: RunArgs) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    let volumes = args.volume.iter().map(|v| parse_volume(v)).collect::<Result<Vec<_>>>()?;
    let opts = RunOpts {
        name: args.name,
        detach: args.detach,
        interactive: args.interactive,
        tty: args.tty,
        auto_remove: args.auto_remove,
        env: args.env,
        volumes,
        command: args.command,
        working_dir: args.workdir,
    };
    let id = containers.run(&args.image, opts)?;
    println!("{id}");
    Ok(())
}

pub fn ps(base: &Path, args: PsArgs) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    let opts = PsOpts {
        all: args.all,
        quiet: args.quiet,
        latest: args.latest,
        last: args.last,
        size: args.size,
    };
    let rows = containers.ps(&opts)?;

    if args.quiet {
        for row in &rows {
            println!("{}", row.short_id);
        }
        return Ok(());
    }

    if rows.is_empty() {
        println!("No containers.");
        return Ok(());
    }

    if args.size {
        println!("{:<14}{:<20}{:<24}{:<10}{:<26}{:<12}{}", "CONTAINER ID", "NAME", "IMAGE", "STATUS", "STARTED", "SIZE", "COMMAND");
    } else {
        println!("{:<14}{:<20}{:<24}{:<10}{:<26}{}", "CONTAINER ID", "NAME", "IMAGE", "STATUS", "STARTED", "COMMAND");
    }
    for row in &rows {
        let status = if row.running { format!("{} (running)", row.status) } else { row.status.to_string() };
        if let Some(size) = row.size_bytes {
            println!(
                "{:<14}{:<20}{:<24}{:<10}{:<26}{:<12}{}",
                row.short_id, row.name, row.image, status, row.started_at, human_size(size), row.command
            );
        } else {
            println!("{:<14}{:<20}{:<24}{:<10}{:<26}{}", row.short_id, row.name, row.image, status, row.started_at, row.command);
        }
    }
    Ok(())
}

pub fn rm(base: &Path, args: RmArgs) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    containers.rm(&args.names, RmOpts { force: args.force })?;
    for name in &args.names {
        println!("{name}");
    }
    Ok(())
}

pub fn start(base: &Path, name: &str) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    containers.start(name)?;
    println!("{name}");
    Ok(())
}

pub fn stop(base: &Path, args: StopArgs) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    let signal = parse_signal(&args.signal)?;
    containers.stop(&args.name, args.timeout.map(Duration::from_secs), signal, args.force)?;
    println!("{}", args.name);
    Ok(())
}

pub fn restart(base: &Path, args: RestartArgs) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    containers.restart(&args.name, args.timeout.map(Duration::from_secs))?;
    println!("{}", args.name);
    Ok(())
}

pub fn exec(base: &Path, args: ExecArgs) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    let opts = ExecOpts {
        detach: args.detach,
        interactive: args.interactive,
        tty: args.tty,
        user: args.user,
        working_dir: args.workdir,
        env: args.env,
    };
    let code = containers.exec(&args.name, args.command, opts)?;
    if let Some(code) = code {
        if code != 0 {
            std::process::exit(code);
        }
    }
    Ok(())
}

pub fn logs(base: &Path, args: LogsArgs) -> Result<()> {
    let containers = Containers::open(base).context("opening container engine")?;
    let opts = LogsOpts {
        follow: args.follow,
        since: args.since,
        until: args.until,
        tail: args.tail,
        timestamps: args.timestamps,
        details: args.details,
    };
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    containers.logs(&args.name, &opts, &mut lock)?;
    Ok(())
}

/// Formats bytes into a human-readable size string.
#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
