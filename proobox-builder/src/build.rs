//! Cache-keyed step walk and image emission (spec.md §4.8).
//!
//! Grounded on the teacher's staging-dir-then-rename commit pattern
//! (`bux/src/disk.rs`) for the final artifact emission, and on the
//! content-addressed build cache idiom surveyed from
//! `agiletec-inc-airis-workspace`'s docker-build cache
//! (`cache_dir`/`cache_hit`/`cache_store`) for the per-step key chain below.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use flate2::Compression;
use flate2::write::GzEncoder;
use proobox_core::tracer::{self, TracerSpec};
use proobox_core::{paths as core_paths, rootfs};
use proobox_image::{ImageMetadata, Images, compose_key, short_sha256};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::recipe::{self, Directive};
use crate::{Error, Result};

/// Paths excluded from the final tar.gz emission (spec.md §4.8).
const EMIT_EXCLUDE: &[&str] = &["dev", "proc", "sys", "tmp", "run"];

/// Builds an image from `recipe_path` using `context` as the `COPY` source
/// root, tagging the result `<repo>:<version>`.
///
/// `progress` receives one rendered line per step:
/// `[N/TOTAL] <KIND> <ARGS>`, with a `CACHED` marker on cache hit and an
/// elapsed-seconds tail.
pub fn build(base: &Path, images: &Images, recipe_path: &Path, context: &Path, repo: &str, version: &str, mut progress: impl FnMut(&str)) -> Result<ImageMetadata> {
    let parsed = recipe::parse(recipe_path)?;
    let total = parsed.steps.len();

    let from_meta = images.ensure(&parsed.from)?;
    let from_repo = split_repo(&parsed.from);
    let distro = tracer::Distro::from_repo(&from_repo);

    let build_name = format!("build-{}", &core_paths::new_container_id()[..12]);
    let build_dir = core_paths::container_dir(base, &build_name);
    let build_rootfs = core_paths::rootfs_path(base, &build_name);
    fs::create_dir_all(&build_dir)?;

    let result = run_build(
        images,
        &from_meta,
        &parsed.from,
        distro,
        &parsed.steps,
        total,
        &build_dir,
        &build_rootfs,
        context,
        &mut progress,
    );

    let outcome = match result {
        Ok(emitted) => {
            let artifact_path = images.store().artifact_path(repo, version);
            if let Some(parent) = artifact_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tar_gz = emit_tar_gz(&build_rootfs)?;
            let meta = emitted.into_metadata(repo, version, tar_gz.len() as u64);
            images.store().write(repo, version, &tar_gz, &meta)?;
            Ok(meta)
        }
        Err(e) => Err(e),
    };

    fs::remove_dir_all(&build_dir).ok();
    outcome
}

/// Accumulated builder state that becomes the emitted image's `ContainerConfig`.
struct Emitted {
    working_dir: String,
    env: Vec<String>,
    cmd: Option<Vec<String>>,
}

impl Emitted {
    fn into_metadata(self, repo: &str, version: &str, size: u64) -> ImageMetadata {
        let created = core_paths::iso_timestamp();
        ImageMetadata {
            id: format!("{:x}", Sha256::digest(format!("{repo}:{version}:{created}"))),
            repo_tags: vec![format!("{repo}:{version}")],
            created,
            size,
            virtual_size: "unknown".to_owned(),
            container_config: proobox_image::ContainerConfig {
                cmd: self.cmd,
                working_dir: self.working_dir,
                entrypoint: None,
                env: self.env,
            },
            os: "linux".to_owned(),
            architecture: core_paths::map_architecture(std::env::consts::ARCH).unwrap_or("amd64").to_owned(),
            paths: proobox_image::ImagePaths { image_path: PathBuf::new() },
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_build(
    images: &Images,
    from_meta: &ImageMetadata,
    from_tag: &str,
    distro: tracer::Distro,
    steps: &[Directive],
    total: usize,
    build_dir: &Path,
    build_rootfs: &Path,
    context: &Path,
    progress: &mut impl FnMut(&str),
) -> Result<Emitted> {
    let from_artifact = images.artifact_path(from_tag);
    rootfs::assemble(&from_artifact, from_tag, build_rootfs, images.layers())?;

    let mut previous_key = short_sha256(from_tag.as_bytes());
    let mut working_dir = from_meta.container_config.working_dir.clone();
    let mut env = from_meta.container_config.env.clone();
    let mut cmd = from_meta.container_config.cmd.clone();

    for (index, step) in steps.iter().enumerate() {
        let n = index + 1;
        let line = format!("{} {}", step.kind(), step.args());

        match step {
            Directive::Workdir(path) => {
                working_dir = path.clone();
                let composed = compose_key(&previous_key, &short_sha256(line.as_bytes()));
                run_state_step(images, n, total, &line, &composed, build_rootfs, progress);
                previous_key = composed;
            }
            Directive::Env { key, value } => {
                upsert_env(&mut env, key, value);
                let composed = compose_key(&previous_key, &short_sha256(line.as_bytes()));
                run_state_step(images, n, total, &line, &composed, build_rootfs, progress);
                previous_key = composed;
            }
            Directive::Cmd(argv) => {
                cmd = Some(argv.clone());
                let composed = compose_key(&previous_key, &short_sha256(line.as_bytes()));
                run_state_step(images, n, total, &line, &composed, build_rootfs, progress);
                previous_key = composed;
            }
            Directive::Run(shell_cmd) => {
                let step_key = short_sha256(line.as_bytes());
                let composed = compose_key(&previous_key, &step_key);
                run_filesystem_step(
                    images, n, total, &line, &composed, build_rootfs, build_dir, &working_dir, &env,
                    progress, |workdir, env| {
                        let shell = shell_for(distro);
                        let mut argv = shell;
                        argv.push("-c".to_owned());
                        argv.push(shell_cmd.clone());
                        TracerSpec {
                            rootfs: build_rootfs.to_path_buf(),
                            distro,
                            user_binds: vec![],
                            working_dir: workdir.to_owned(),
                            env: env.to_vec(),
                            command: argv,
                            interactive: false,
                            kill_on_exit: true,
                        }
                    },
                )?;
                previous_key = composed;
            }
            Directive::Copy { src, dst } => {
                let src_path = context.join(src);
                if !src_path.exists() {
                    return Err(Error::CopySourceMissing(src.clone()));
                }
                let source_bytes = source_digest(&src_path)?;
                let step_key = format!("{}{}", short_sha256(line.as_bytes()), short_sha256(&source_bytes));
                let composed = compose_key(&previous_key, &step_key);
                let context = context.to_path_buf();
                let dst = dst.clone();
                let src = src.clone();
                run_filesystem_step(
                    images, n, total, &line, &composed, build_rootfs, build_dir, &working_dir, &env,
                    progress, move |workdir, env| {
                        let shell = shell_for(distro);
                        let mut argv = shell;
                        argv.push("-c".to_owned());
                        argv.push(format!("cp -a /host_build_context/{src} {dst}"));
                        TracerSpec {
                            rootfs: build_rootfs.to_path_buf(),
                            distro,
                            user_binds: vec![(context.display().to_string(), "/host_build_context".to_owned())],
                            working_dir: workdir.to_owned(),
                            env: env.to_vec(),
                            command: argv,
                            interactive: false,
                            kill_on_exit: true,
                        }
                    },
                )?;
                previous_key = composed;
            }
        }
    }

    Ok(Emitted { working_dir, env, cmd })
}

/// Runs a state-only step (`WORKDIR`/`ENV`/`CMD`) through the same cache
/// bookkeeping as a filesystem step, even though there's no rootfs content to
/// skip: the `CACHED` marker and key chain must stay uniform across all
/// directive kinds (spec.md §4.8 cache-equality law).
fn run_state_step(images: &Images, n: usize, total: usize, line: &str, composed_key: &str, build_rootfs: &Path, progress: &mut impl FnMut(&str)) {
    if images.layers().lookup(composed_key).is_some() {
        progress(&format!("[{n}/{total}] {line} CACHED"));
        return;
    }
    images.layers().fill(composed_key, build_rootfs).ok();
    progress(&format!("[{n}/{total}] {line}"));
}

/// Runs a filesystem-mutating step (`RUN`/`COPY`) with cache lookup/fill.
#[allow(clippy::too_many_arguments)]
fn run_filesystem_step(
    images: &Images,
    n: usize,
    total: usize,
    line: &str,
    composed_key: &str,
    build_rootfs: &Path,
    build_dir: &Path,
    working_dir: &str,
    env: &[String],
    progress: &mut impl FnMut(&str),
    spec_for: impl FnOnce(&str, &[String]) -> TracerSpec,
) -> Result<()> {
    let started = Instant::now();

    if let Some(cached) = images.layers().lookup(composed_key) {
        fs::remove_dir_all(build_rootfs)?;
        proobox_image::copy_dir_recursive(&cached, build_rootfs)?;
        progress(&format!("[{n}/{total}] {line} CACHED"));
        return Ok(());
    }

    let spec = spec_for(working_dir, env);
    let env_full = tracer::build_env(&spec.env, &[]);
    let argv = tracer::build_argv(&spec);
    let log_path = core_paths::step_log_path(build_dir, n);
    let log = fs::File::create(&log_path)?;
    let mut child = tracer::spawn(&argv, &env_full, Stdio::null(), Stdio::from(log.try_clone()?), Stdio::from(log))?;
    let status = child.wait()?;

    if !status.success() {
        let log = fs::read_to_string(&log_path).unwrap_or_default();
        return Err(Error::StepFailed {
            step: n,
            kind: "RUN/COPY",
            args: line.to_owned(),
            exit_code: status.code(),
            log,
        });
    }

    images.layers().fill(composed_key, build_rootfs).ok();
    progress(&format!("[{n}/{total}] {line} ({}s)", started.elapsed().as_secs()));
    info!(step = n, "build step committed to cache");
    Ok(())
}

/// Shell invocation prefix per distro (spec.md §4.8).
fn shell_for(distro: tracer::Distro) -> Vec<String> {
    match distro {
        tracer::Distro::Alpine => vec!["/bin/sh".to_owned()],
        tracer::Distro::Ubuntu | tracer::Distro::Other => vec!["/bin/bash".to_owned()],
    }
}

/// Updates an `Env` accumulator in place, replacing an existing `key`.
fn upsert_env(env: &mut Vec<String>, key: &str, value: &str) {
    let entry = format!("{key}={value}");
    if let Some(existing) = env.iter_mut().find(|kv| kv.split_once('=').is_some_and(|(k, _)| k == key)) {
        *existing = entry;
    } else {
        env.push(entry);
    }
}

/// Extracts the repository part of a `repo:version` reference.
fn split_repo(tag: &str) -> String {
    tag.rsplit_once(':').map_or_else(|| tag.to_owned(), |(repo, _)| repo.to_owned())
}

/// Digest of a `COPY` source's content: raw bytes for a file, or a
/// path-then-content hash walk for a directory.
fn source_digest(path: &Path) -> Result<Vec<u8>> {
    if path.is_file() {
        return Ok(fs::read(path)?);
    }

    let mut hasher = Sha256::new();
    let mut entries: Vec<_> = walkdir::WalkDir::new(path)
        .min_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .collect();
    entries.sort_by_key(|e| e.path().to_path_buf());

    for entry in entries {
        let rel = entry.path().strip_prefix(path).map_err(std::io::Error::other)?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(fs::read(entry.path())?);
    }
    Ok(hasher.finalize().to_vec())
}

/// Tars and gzips `rootfs`, excluding `dev/ proc/ sys/ tmp/ run/`.
fn emit_tar_gz(rootfs: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in walkdir::WalkDir::new(rootfs).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(rootfs).map_err(std::io::Error::other)?;
        if is_excluded(rel) {
            continue;
        }
        if entry.file_type().is_dir() {
            builder.append_dir(rel, entry.path())?;
        } else if entry.file_type().is_file() {
            let mut file = fs::File::open(entry.path())?;
            builder.append_file(rel, &mut file)?;
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// `true` for `dev/*`, `proc/*`, `sys/*`, `tmp/*`, `run/*`.
fn is_excluded(rel: &Path) -> bool {
    rel.components().next().is_some_and(|c| EMIT_EXCLUDE.contains(&c.as_os_str().to_string_lossy().as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_runtime_dirs_from_emission() {
        assert!(is_excluded(Path::new("dev/null")));
        assert!(is_excluded(Path::new("tmp/x")));
        assert!(is_excluded(Path::new("run/lock")));
        assert!(!is_excluded(Path::new("etc/hostname")));
    }

    #[test]
    fn upsert_env_replaces_existing_key() {
        let mut env = vec!["FOO=old".to_owned(), "BAR=baz".to_owned()];
        upsert_env(&mut env, "FOO", "new");
        assert_eq!(env, vec!["FOO=new".to_owned(), "BAR=baz".to_owned()]);
    }

    #[test]
    fn upsert_env_appends_new_key() {
        let mut env = vec!["FOO=bar".to_owned()];
        upsert_env(&mut env, "BAZ", "qux");
        assert_eq!(env, vec!["FOO=bar".to_owned(), "BAZ=qux".to_owned()]);
    }

    #[test]
    fn source_digest_is_deterministic_for_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();
        assert_eq!(source_digest(&file).unwrap(), source_digest(&file).unwrap());
    }

    #[test]
    fn split_repo_drops_version() {
        assert_eq!(split_repo("ubuntu:22.04"), "ubuntu");
    }
}
