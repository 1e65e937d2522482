//! Error types for the container engine.

/// Alias for `Result<T, proobox_core::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by container engine operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad flag combination, malformed tag, or malformed env/volume spec.
    #[error("{0}")]
    Invalid(String),

    /// The host architecture has no known mapping to a supported target.
    #[error("unsupported host architecture: {0}")]
    ArchUnsupported(String),

    /// An image or container could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A short-id prefix matched more than one container or image.
    #[error("ambiguous identifier {0:?}: matches more than one container")]
    Ambiguous(String),

    /// A container with this name already exists.
    #[error("container {0:?} already exists")]
    AlreadyExists(String),

    /// `rm` was attempted on a running container without `--force`.
    #[error("container {0:?} is running: use --force to remove")]
    InUse(String),

    /// Metadata JSON failed to parse or did not match the expected shape.
    #[error("malformed metadata at {path}: {source}")]
    MetadataMalformed {
        /// Path of the offending metadata file.
        path: std::path::PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Atomic metadata write failed (rename and copy+unlink fallback both failed).
    #[error("failed to write metadata to {path}: {source}")]
    MetadataWriteFailed {
        /// Path of the metadata file being written.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Extracting an image artifact into a rootfs failed.
    #[error("failed to extract rootfs: {0}")]
    ExtractFailed(String),

    /// The tracer process could not be spawned.
    #[error("failed to spawn tracer: {0}")]
    SpawnFailed(String),

    /// `stop` could not terminate the container within its escalation budget.
    #[error("failed to stop container {0:?}: still running after TERM/KILL + timeout")]
    StopFailed(String),

    /// An I/O error not covered by a more specific variant above.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error from the image store / layer cache / registry client.
    #[error(transparent)]
    Image(#[from] proobox_image::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
