//! Image store: `images/<repo>-<version>.{tar.gz,json}` → metadata mapping.
//!
//! Grounded on the teacher's `bux_oci::Store` staging-then-rename idiom
//! (`bux-oci/src/store.rs`), but keyed by a flat JSON-file-per-image layout
//! instead of a SQLite index, because spec.md §4.1/§4.4 pins the exact
//! filename scheme and the JSON shape directly.

use std::fs;
use std::path::{Path, PathBuf};

use crate::layer::LayerCache;
use crate::metadata::ImageMetadata;
use crate::paths::{normalize_version, split_tag};
use crate::{Error, Result};

/// Image store rooted at `$BASE/images/`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Opens (creating if needed) the image store at `images_dir`.
    pub fn open(images_dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = images_dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Filename stem for a `repo:version` pair, with `/` sanitized so the
    /// repository portion of a namespaced reference (e.g. `org/app`) stays a
    /// single path component.
    fn stem(repo: &str, version: &str) -> String {
        format!("{}-{}", repo.replace('/', "_"), normalize_version(version))
    }

    /// Path of the metadata JSON file for a `repo:version` pair.
    #[must_use]
    pub fn metadata_path(&self, repo: &str, version: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::stem(repo, version)))
    }

    /// Path of the artifact tar.gz for a `repo:version` pair.
    #[must_use]
    pub fn artifact_path(&self, repo: &str, version: &str) -> PathBuf {
        self.dir.join(format!("{}.tar.gz", Self::stem(repo, version)))
    }

    /// Returns `true` if both the artifact and metadata files exist for a tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        let (repo, version) = split_tag(tag);
        self.metadata_path(&repo, &version).is_file() && self.artifact_path(&repo, &version).is_file()
    }

    /// Reads metadata for a `repo:version` pair.
    pub fn read_metadata(&self, repo: &str, version: &str) -> Result<ImageMetadata> {
        let path = self.metadata_path(repo, version);
        let data = fs::read_to_string(&path)?;
        serde_json::from_str(&data).map_err(Error::Json)
    }

    /// Writes metadata and the artifact bytes for a new image, atomically.
    pub fn write(&self, repo: &str, version: &str, artifact: &[u8], metadata: &ImageMetadata) -> Result<()> {
        let artifact_path = self.artifact_path(repo, version);
        crate::fsutil::atomic_write(&artifact_path, artifact)?;
        let metadata_path = self.metadata_path(repo, version);
        crate::fsutil::atomic_write_json(&metadata_path, metadata)?;
        Ok(())
    }

    /// Lists all stored images, sorted by creation time descending.
    pub fn list(&self) -> Result<Vec<ImageMetadata>> {
        let mut images = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = fs::read_to_string(&path)?;
            match serde_json::from_str::<ImageMetadata>(&data) {
                Ok(meta) => images.push(meta),
                Err(source) => return Err(Error::Json(source)),
            }
        }
        images.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(images)
    }

    /// Resolves a `repo:version` tag or a 4-12 hex short-id prefix to metadata.
    pub fn resolve(&self, spec: &str) -> Result<ImageMetadata> {
        if is_short_id(spec) {
            return self.resolve_short_id(spec);
        }
        let (repo, version) = split_tag(spec);
        if !self.has_tag(&format!("{repo}:{version}")) {
            return Err(Error::NotFound(spec.to_owned()));
        }
        self.read_metadata(&repo, &version)
    }

    /// Resolves a short-id prefix against every stored image's `Id` field.
    fn resolve_short_id(&self, prefix: &str) -> Result<ImageMetadata> {
        let all = self.list()?;
        let mut matches: Vec<ImageMetadata> = all.into_iter().filter(|m| m.id.starts_with(prefix)).collect();
        match matches.len() {
            0 => Err(Error::NotFound(prefix.to_owned())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::Ambiguous(prefix.to_owned())),
        }
    }

    /// Tags an existing image with a new version under the *same* repository.
    ///
    /// spec.md §4.4: "Tag is restricted: the repository part must not
    /// change — only the version component may." Copies the artifact under
    /// the new filename (if it differs), extends `RepoTags`, and refreshes
    /// the creation timestamp.
    pub fn tag(&self, existing_tag: &str, new_version: &str) -> Result<ImageMetadata> {
        let (repo, old_version) = split_tag(existing_tag);
        let mut meta = self.read_metadata(&repo, &old_version)?;

        let old_artifact = self.artifact_path(&repo, &old_version);
        let new_artifact = self.artifact_path(&repo, new_version);
        if old_artifact != new_artifact {
            fs::copy(&old_artifact, &new_artifact)?;
        }

        let new_label = format!("{repo}:{}", normalize_version(new_version));
        if !meta.repo_tags.contains(&new_label) {
            meta.repo_tags.push(new_label);
        }
        meta.created = crate::paths::iso_timestamp();

        let new_meta_path = self.metadata_path(&repo, new_version);
        crate::fsutil::atomic_write_json(&new_meta_path, &meta)?;
        Ok(meta)
    }

    /// Removes an image: its artifact, its metadata, and the FROM-layer cache
    /// entry referenced by its `VirtualSize` hash (spec.md §4.4, §9).
    pub fn remove(&self, tag: &str, layers: &LayerCache) -> Result<()> {
        let (repo, version) = split_tag(tag);
        let meta = self.read_metadata(&repo, &version)?;

        let artifact = self.artifact_path(&repo, &version);
        let metadata_path = self.metadata_path(&repo, &version);
        remove_if_exists(&artifact)?;
        remove_if_exists(&metadata_path)?;

        // Best-effort: the FROM-layer is conservatively removed without
        // reference counting (spec.md §3 "Relationships & invariants").
        let layer_dir = layers.dir_for(&meta.virtual_size);
        if layer_dir.is_dir() {
            let _ = fs::remove_dir_all(&layer_dir);
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// A short-id is a 4-12 char lowercase hex string (spec.md GLOSSARY).
fn is_short_id(s: &str) -> bool {
    (4..=12).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta(id: &str, repo_tags: Vec<&str>) -> ImageMetadata {
        ImageMetadata {
            id: id.to_owned(),
            repo_tags: repo_tags.into_iter().map(str::to_owned).collect(),
            created: crate::paths::iso_timestamp(),
            size: 10,
            virtual_size: "aaaaaaaaaaaa".to_owned(),
            container_config: crate::metadata::ContainerConfig::default(),
            os: "linux".to_owned(),
            architecture: "arm64".to_owned(),
            paths: crate::metadata::ImagePaths {
                image_path: PathBuf::from("/tmp/x.tar.gz"),
            },
        }
    }

    #[test]
    fn write_then_resolve_by_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let meta = sample_meta(&"a".repeat(32), vec!["alpine:3.20.0"]);
        store.write("alpine", "3.20.0", b"fake-tar", &meta).unwrap();

        let resolved = store.resolve("alpine:3.20.0").unwrap();
        assert_eq!(resolved.id, meta.id);
    }

    #[test]
    fn resolve_short_id_requires_uniqueness() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        store
            .write("alpine", "3.20.0", b"a", &sample_meta("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", vec!["alpine:3.20.0"]))
            .unwrap();
        store
            .write("alpine", "3.19.0", b"b", &sample_meta("aaaabbbbccccddddeeeeffff00001111", vec!["alpine:3.19.0"]))
            .unwrap();

        assert!(matches!(store.resolve("aaaa"), Err(Error::Ambiguous(_))));
        assert!(store.resolve("aaaaaaaaaaaa").is_ok());
    }

    #[test]
    fn tag_copies_artifact_and_extends_repo_tags() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let meta = sample_meta(&"b".repeat(32), vec!["alpine:3.20.0"]);
        store.write("alpine", "3.20.0", b"fake-tar", &meta).unwrap();

        let tagged = store.tag("alpine:3.20.0", "stable").unwrap();
        assert!(tagged.repo_tags.contains(&"alpine:stable".to_owned()));
        assert!(store.artifact_path("alpine", "stable").is_file());
    }

    #[test]
    fn remove_deletes_artifact_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let layers = LayerCache::open(dir.path().join("cached_layers")).unwrap();
        let meta = sample_meta(&"c".repeat(32), vec!["alpine:3.20.0"]);
        store.write("alpine", "3.20.0", b"fake-tar", &meta).unwrap();

        store.remove("alpine:3.20.0", &layers).unwrap();
        assert!(!store.artifact_path("alpine", "3.20.0").exists());
        assert!(!store.metadata_path("alpine", "3.20.0").exists());
    }

    #[test]
    fn list_sorts_by_created_descending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let mut older = sample_meta(&"d".repeat(32), vec!["a:1.0.0"]);
        older.created = "2020-01-01T00:00:00.000Z".to_owned();
        let mut newer = sample_meta(&"e".repeat(32), vec!["a:2.0.0"]);
        newer.created = "2030-01-01T00:00:00.000Z".to_owned();
        store.write("a", "1.0.0", b"x", &older).unwrap();
        store.write("a", "2.0.0", b"y", &newer).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed[0].id, newer.id);
    }
}
