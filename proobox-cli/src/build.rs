//! `build` subcommand.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use proobox_image::Images;

/// `proobox build`.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Build context directory, the root `COPY` sources are resolved against.
    context: PathBuf,

    /// Path to the recipe file.
    #[arg(short, long, default_value = "Recipe")]
    file: PathBuf,

    /// Image tag to assign the result, `repo:version`.
    #[arg(short, long)]
    tag: String,
}

pub fn run(base: &Path, args: BuildArgs) -> Result<()> {
    let images = Images::open(base).context("opening image store")?;
    let (repo, version) = proobox_image::paths::split_tag(&args.tag);
    let meta = proobox_builder::build(base, &images, &args.file, &args.context, &repo, &version, |line| {
        println!("{line}");
    })?;
    println!("Successfully built {}", meta.repo_tags.join(", "));
    Ok(())
}
