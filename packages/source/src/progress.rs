//! Progress reporting for paged upstream fetches.
//!
//! The CLI renders [`ProgressCallback`] with `indicatif`; the engine's
//! tests and library callers pass [`null_progress`].

use std::sync::Arc;

/// Receives page-level progress from a paged fetch.
pub trait ProgressCallback: Send + Sync {
    /// Sets the page budget of the fetch.
    fn set_total(&self, total: u64);

    /// Sets the page currently being read.
    fn set_position(&self, pos: u64);

    /// Labels the fetch.
    fn set_message(&self, msg: String);

    /// The fetch is done; the indicator can go away.
    fn finish_and_clear(&self);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
