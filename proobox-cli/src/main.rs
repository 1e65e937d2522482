//! CLI for the proobox rootless container manager.

#![allow(clippy::print_stdout, clippy::print_stderr, clippy::missing_docs_in_private_items)]

mod build;
mod container;
mod image;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "proobox", version, about = "Rootless, user-mode container manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull an image into the local store.
    Pull {
        /// Image reference, e.g. `alpine:3.20.0`.
        tag: String,
    },
    /// Manage locally stored images.
    Image {
        #[command(subcommand)]
        action: image::ImageAction,
    },
    /// Run a command in a new container.
    Run(Box<container::RunArgs>),
    /// List containers.
    Ps(container::PsArgs),
    /// Remove one or more containers.
    Rm(container::RmArgs),
    /// Start a stopped container.
    Start {
        /// Container name or short-id.
        name: String,
    },
    /// Stop a running container.
    Stop(container::StopArgs),
    /// Restart a container.
    Restart(container::RestartArgs),
    /// Build an image from a recipe.
    Build(build::BuildArgs),
    /// Push a stored image to the configured registry backend.
    Push {
        /// Image reference to push.
        tag: String,
    },
    /// Execute a command inside a running container.
    Exec(Box<container::ExecArgs>),
    /// Fetch container logs.
    Logs(container::LogsArgs),
    /// Generate shell completion scripts.
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    if let Err(e) = Cli::parse().dispatch() {
        eprintln!("proobox: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        let base = proobox_image::paths::base_dir();
        match self.command {
            Command::Pull { tag } => image::pull(&base, &tag),
            Command::Image { action } => image::dispatch(&base, action),
            Command::Run(args) => container::run(&base, *args),
            Command::Ps(args) => container::ps(&base, args),
            Command::Rm(args) => container::rm(&base, args),
            Command::Start { name } => container::start(&base, &name),
            Command::Stop(args) => container::stop(&base, args),
            Command::Restart(args) => container::restart(&base, args),
            Command::Build(args) => build::run(&base, args),
            Command::Push { tag } => image::push(&base, &tag),
            Command::Exec(args) => container::exec(&base, *args),
            Command::Logs(args) => container::logs(&base, args),
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "proobox", &mut std::io::stdout());
                Ok(())
            }
        }
    }
}
