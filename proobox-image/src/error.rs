//! Error types for image store, layer cache, and registry operations.

/// Alias for `Result<T, proobox_image::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from image store, layer cache, and registry operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A malformed tag, reference, or flag combination.
    #[error("{0}")]
    Invalid(String),

    /// An empty version was given for a distro that cannot infer one.
    #[error("a version is required for {0:?} (no latest-version index)")]
    VersionRequired(String),

    /// The host architecture has no known mapping to a supported target.
    #[error("unsupported host architecture: {0}")]
    ArchUnsupported(String),

    /// The image was not found locally, nor via any registry tier.
    #[error("image not found: {0}")]
    NotFound(String),

    /// A short-id prefix matched more than one stored image.
    #[error("ambiguous image identifier {0:?}: matches more than one image")]
    Ambiguous(String),

    /// Tag is restricted to keeping the repository fixed; only the version may change.
    #[error("cannot retag {0:?} to a different repository")]
    RepositoryMismatch(String),

    /// A registry request failed (non-2xx, transport error, or bad body).
    #[error("registry request failed: {0}")]
    NetworkFailed(String),

    /// Extracting an image artifact failed.
    #[error("failed to extract artifact: {0}")]
    ExtractFailed(String),

    /// An I/O error not covered by a more specific variant above.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
