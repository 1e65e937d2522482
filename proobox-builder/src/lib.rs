//! Recipe parser and cache-keyed layered image builder for proobox.
//!
//! # Architecture
//!
//! ```text
//! build::build (public entry point)
//!  ├── recipe::parse   (directive parsing, line-continuation)
//!  ├── proobox_core::rootfs / tracer (FROM assembly, step execution)
//!  └── proobox_image::LayerCache (step-layer cache, shared with container run)
//! ```

#![allow(clippy::missing_docs_in_private_items)]

mod build;
mod error;
pub mod recipe;

pub use build::build;
pub use error::{Error, Result};
pub use recipe::{Directive, Recipe};
