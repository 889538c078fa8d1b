use super::error::Result;
use super::window::{SessionWindow, WindowedKey};
use crate::context::ProcessingContext;
use std::any::Any;
use std::sync::Arc;

/// A session-windowed key/value store handle.
///
/// The structural type of a handle (cache-wrapped or bare) is fixed by the
/// supplier at construction and never changes; `init` only activates
/// internal behavior (persistence location, metrics, changelog forwarding).
/// Each handle is driven by one owning thread; methods take `&self` with
/// interior locking per layer.
pub trait SessionStore<K, V>: Send + Sync {
    /// Store name, also the cache namespace and changelog topic stem
    fn name(&self) -> &str;

    /// Bind the handle to its processing context: open persistent state
    /// under the context's state directory, wire the cache flush path, and
    /// activate metrics (and changelog forwarding when configured).
    fn init(&self, ctx: Arc<dyn ProcessingContext>) -> Result<()>;

    /// Upsert the value for `(key, window)`
    fn put(&self, key: &WindowedKey<K>, value: &V) -> Result<()>;

    /// Delete the record for `(key, window)`; no-op if absent
    fn remove(&self, key: &WindowedKey<K>) -> Result<()>;

    /// Sessions for `key` whose window overlaps `[earliest, latest]`,
    /// ordered by window start ascending
    fn fetch(&self, key: &K, earliest: i64, latest: i64) -> Result<SessionIter<V>>;

    /// Alias semantics of [`fetch`](Self::fetch), used when merging
    /// adjacent sessions during aggregation
    fn find_sessions(&self, key: &K, earliest: i64, latest: i64) -> Result<SessionIter<V>> {
        self.fetch(key, earliest, latest)
    }

    /// Force write-through of buffered state
    fn flush(&self) -> Result<()>;

    /// Flush and release resources. Idempotent; mutating after close fails.
    fn close(&self) -> Result<()>;

    /// Structural-type introspection for callers that branch on the
    /// configured composition
    fn as_any(&self) -> &dyn Any;
}

/// Finite, consumed-once sequence of `(window, value)` results
#[derive(Debug)]
pub struct SessionIter<V> {
    entries: std::vec::IntoIter<(SessionWindow, V)>,
}

impl<V> SessionIter<V> {
    pub(crate) fn new(entries: Vec<(SessionWindow, V)>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl<V> Iterator for SessionIter<V> {
    type Item = (SessionWindow, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<V> ExactSizeIterator for SessionIter<V> {}
