//! Image pull, store, and registry transport for the proobox container engine.
//!
//! # Architecture
//!
//! ```text
//! Images (public API)
//!  ├── ImageStore     (images/<repo>-<version>.{tar.gz,json})
//!  ├── LayerCache      (cached_layers/layer-<hex>/)
//!  └── RegistryClient  (user registry + upstream distro mirrors)
//! ```

#![allow(clippy::missing_docs_in_private_items)]

mod error;
pub mod fsutil;
mod layer;
mod metadata;
pub mod paths;
mod registry;
mod store;

pub use error::{Error, Result};
pub use layer::{LayerCache, compose_key, copy_dir_recursive, short_sha256};
pub use metadata::{ContainerConfig, ImageMetadata, ImagePaths};
pub use registry::{Backend, Config, Distro, FetchedArtifact, RegistryClient, synthesize_metadata};
pub use store::ImageStore;

use std::path::PathBuf;

use paths::split_tag;
use tracing::{info, warn};

/// Ties the image store, layer cache, and registry client together behind
/// the three-tier pull fallback spec.md §4.5 describes.
#[derive(Debug)]
pub struct Images {
    store: ImageStore,
    layers: LayerCache,
    registry: RegistryClient,
    config: Config,
}

impl Images {
    /// Opens the image subsystem rooted at `$BASE` (see [`paths::base_dir`]).
    pub fn open(base: &std::path::Path) -> Result<Self> {
        let store = ImageStore::open(paths::images_dir(base))?;
        let layers = LayerCache::open(paths::cached_layers_dir(base))?;
        let config = Config::load(&paths::config_path(base))?;
        Ok(Self {
            store,
            layers,
            registry: RegistryClient::new(),
            config,
        })
    }

    #[must_use]
    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    #[must_use]
    pub fn layers(&self) -> &LayerCache {
        &self.layers
    }

    /// Ensures `tag` is present locally, pulling through the fallback tiers
    /// if necessary, and returns its metadata.
    ///
    /// spec.md §4.5 pull fallback:
    /// 1. local presence (no network);
    /// 2. user registry, if `config.json` names a backend;
    /// 3. upstream distro mirror, for recognized distros.
    pub fn ensure(&self, tag: &str) -> Result<ImageMetadata> {
        let (repo, mut version) = split_tag(tag);

        match Distro::from_repo(&repo) {
            Some(Distro::Alpine) if version == "latest" => {
                version = self.registry.resolve_alpine_latest()?;
            }
            Some(_) if version == "latest" => {
                return Err(Error::VersionRequired(repo));
            }
            _ => {}
        }

        if self.store.has_tag(&format!("{repo}:{version}")) {
            info!(%repo, %version, "image present locally");
            return self.store.read_metadata(&repo, &version);
        }

        if let Some(backend) = &self.config.backend {
            info!(%repo, %version, "pulling from user registry");
            match self.registry.pull_user_registry(backend, &repo, &version) {
                Ok(Some(fetched)) => return self.store_fetched(&repo, &version, fetched),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "user registry pull failed, falling through"),
            }
        }

        info!(%repo, %version, "pulling from upstream mirror");
        if let Some(fetched) = self.registry.pull_upstream_mirror(&repo, &version, std::env::consts::ARCH)? {
            return self.store_fetched(&repo, &version, fetched);
        }

        Err(Error::NotFound(tag.to_owned()))
    }

    /// Persists a freshly fetched artifact, synthesizing metadata if the tier
    /// didn't provide its own.
    fn store_fetched(&self, repo: &str, version: &str, fetched: FetchedArtifact) -> Result<ImageMetadata> {
        let meta = match fetched.metadata_json {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(Error::Json)?,
            None => synthesize_metadata(repo, version, &fetched.tar_gz),
        };
        self.store.write(repo, version, &fetched.tar_gz, &meta)?;
        Ok(meta)
    }

    /// Pushes a stored image to the user registry.
    ///
    /// spec.md §4.5: "A single `POST` ... Exit status of the HTTP client is
    /// the success signal." Requires `config.json` to name a backend.
    pub fn push(&self, tag: &str) -> Result<()> {
        let backend = self
            .config
            .backend
            .as_ref()
            .ok_or_else(|| Error::Invalid("no backend configured in config.json".to_owned()))?;
        let (repo, version) = split_tag(tag);
        let tar_gz = std::fs::read(self.store.artifact_path(&repo, &version))?;
        let metadata_json = std::fs::read(self.store.metadata_path(&repo, &version))?;
        self.registry.push(backend, &repo, &version, tar_gz, metadata_json)
    }

    /// Path of the stored artifact for a tag, without touching the network.
    #[must_use]
    pub fn artifact_path(&self, tag: &str) -> PathBuf {
        let (repo, version) = split_tag(tag);
        self.store.artifact_path(&repo, &version)
    }
}
