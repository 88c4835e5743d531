//! Shared primitives and traits for the paralogy workspace.
//!
//! `paralogy-core` provides the foundation the tree-proposal crates build on:
//!
//! - **Error types** — [`ParalogyError`] and [`Result`] for structured error handling
//! - **Traits** — [`Summarizable`] one-line summaries and the [`Cached`] rollback protocol
//! - **Probabilities** — [`LogProb`] for Metropolis–Hastings proposal densities

pub mod error;
pub mod prob;
pub mod traits;

pub use error::{ParalogyError, Result};
pub use prob::LogProb;
pub use traits::*;
