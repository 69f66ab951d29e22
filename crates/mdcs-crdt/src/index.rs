//! Secondary index hooks.

use crate::document::DocUpdate;

/// A derived view maintained from committed updates.
///
/// The engine feeds every local commit to [`IndexHook::apply`] and calls
/// [`IndexHook::reset`] whenever a merge reshapes the frontier; an index
/// must then rebuild from the engine before answering queries.
pub trait IndexHook: Send + Sync {
    fn name(&self) -> &str;

    fn reset(&self);

    fn apply(&self, _updates: &[DocUpdate]) {}
}
