//! `pull`, `image {ls, rm, tag}`, `push` subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use proobox_image::Images;

/// Subcommands for `proobox image`.
#[derive(Debug, Subcommand)]
pub enum ImageAction {
    /// List locally stored images.
    Ls,
    /// Remove a locally stored image and its FROM-layer cache entry.
    Rm {
        /// Image reference to remove.
        tag: String,
    },
    /// Tag an existing image with a new version under the same repository.
    Tag {
        /// Existing `repo:version` reference.
        tag: String,
        /// New version component; the repository cannot change.
        version: String,
    },
}

pub fn pull(base: &Path, tag: &str) -> Result<()> {
    let images = Images::open(base).context("opening image store")?;
    let meta = images.ensure(tag)?;
    println!("{}", meta.repo_tags.join(", "));
    Ok(())
}

pub fn dispatch(base: &Path, action: ImageAction) -> Result<()> {
    match action {
        ImageAction::Ls => ls(base),
        ImageAction::Rm { tag } => rm(base, &tag),
        ImageAction::Tag { tag, version } => tag_cmd(base, &tag, &version),
    }
}

fn ls(base: &Path) -> Result<()> {
    let images = Images::open(base).context("opening image store")?;
    let list = images.store().list()?;

    if list.is_empty() {
        println!("No images.");
        return Ok(());
    }
    println!("{:<40}{:<14}{:>10}  {}", "REPOSITORY:TAG", "IMAGE ID", "SIZE", "CREATED");
    for meta in &list {
        let short_id = &meta.id[..std::cmp::min(12, meta.id.len())];
        let repo_tags = if meta.repo_tags.is_empty() { "<none>".to_owned() } else { meta.repo_tags.join(", ") };
        println!("{:<40}{:<14}{:>10}  {}", repo_tags, short_id, human_size(meta.size), meta.created);
    }
    Ok(())
}

fn rm(base: &Path, tag: &str) -> Result<()> {
    let images = Images::open(base).context("opening image store")?;
    images.store().remove(tag, images.layers())?;
    println!("{tag}");
    Ok(())
}

fn tag_cmd(base: &Path, tag: &str, version: &str) -> Result<()> {
    let images = Images::open(base).context("opening image store")?;
    let meta = images.store().tag(tag, version)?;
    println!("{}", meta.repo_tags.join(", "));
    Ok(())
}

pub fn push(base: &Path, tag: &str) -> Result<()> {
    let images = Images::open(base).context("opening image store")?;
    images.push(tag)?;
    println!("pushed {tag}");
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
