//! Core trait definitions for the paralogy workspace.
//!
//! These traits define the contracts that state parameters and helpers implement
//! across crates.

/// A type that can produce a summary of its contents.
pub trait Summarizable {
    /// A one-line summary suitable for display.
    fn summary(&self) -> String;
}

/// Single-level snapshot and rollback, as used by Metropolis–Hastings proposals.
///
/// A call to [`cache`](Cached::cache) must be followed by exactly one of
/// [`clear_cache`](Cached::clear_cache) (keep the perturbed state) or
/// [`restore_cache`](Cached::restore_cache) (roll back to the snapshot).
/// Nested caching is a contract violation.
pub trait Cached {
    /// Save a snapshot of the current state.
    fn cache(&mut self);

    /// Discard the snapshot, keeping the current state.
    fn clear_cache(&mut self);

    /// Reinstate the snapshot, discarding the current state.
    fn restore_cache(&mut self);

    /// Whether a snapshot is currently held.
    fn is_cached(&self) -> bool;
}
