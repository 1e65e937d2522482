//! Error types for recipe parsing and the build driver.

/// Alias for `Result<T, proobox_builder::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from recipe parsing and building.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The recipe is missing its leading `FROM` or is otherwise malformed.
    #[error("invalid recipe: {0}")]
    RecipeInvalid(String),

    /// A `COPY` source does not exist under the build context.
    #[error("copy source not found in build context: {0}")]
    CopySourceMissing(String),

    /// A build step exited non-zero. Carries the captured step log.
    #[error("build step {step} failed (exit {exit_code:?}): {kind} {args}\n{log}")]
    StepFailed { step: usize, kind: &'static str, args: String, exit_code: Option<i32>, log: String },

    /// An I/O error not covered by a more specific variant above.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error from the container engine (rootfs assembly, tracer spawn).
    #[error(transparent)]
    Core(#[from] proobox_core::Error),

    /// An error from the image store / layer cache.
    #[error(transparent)]
    Image(#[from] proobox_image::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
