use super::binder::ContextBinder;
use super::codec::Codec;
use super::error::{Result, StoreError};
use super::segment_store::SegmentedSessionStore;
use super::store::{SessionIter, SessionStore};
use super::window::{self, SessionWindow, WindowedKey};
use crate::cache::WriteBackCache;
use crate::context::ProcessingContext;
use bytes::Bytes;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Cache-wrapped session store handle.
///
/// Writes land in the shared write-back cache as dirty entries (tombstones
/// for removes) and reach the segmented store when evicted or flushed;
/// reads merge resident cache entries over the backing store. The wrapper
/// is the structural type for its whole lifetime; `init` only wires the
/// flush path and activates the binder.
pub struct CachingSessionStore<K, V> {
    inner: Arc<SegmentedSessionStore<K, V>>,
    cache: Arc<WriteBackCache>,
    binder: Arc<ContextBinder>,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    closed: AtomicBool,
}

impl<K, V> CachingSessionStore<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(
        inner: Arc<SegmentedSessionStore<K, V>>,
        cache: Arc<WriteBackCache>,
        binder: Arc<ContextBinder>,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Self {
        Self {
            inner,
            cache,
            binder,
            key_codec,
            value_codec,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.name().to_string()));
        }
        if !self.binder.is_attached() {
            return Err(StoreError::Uninitialized(self.name().to_string()));
        }
        Ok(())
    }

    /// Buffered value for one exact `(key, window)` pair: cache first,
    /// backing store on a miss. `None` covers both absent and tombstoned.
    pub fn fetch_session(&self, key: &WindowedKey<K>) -> Result<Option<V>> {
        self.ensure_open()?;
        let key_bytes = self.key_codec.serialize(&key.key)?;
        let encoded = window::encode_windowed(&key_bytes, key.window);
        match self.cache.get(self.name(), &encoded) {
            Some(Some(bytes)) => Ok(Some(self.value_codec.deserialize(&bytes)?)),
            Some(None) => Ok(None),
            None => {
                let raw = self
                    .inner
                    .fetch_raw(&key_bytes, key.window.start(), key.window.end())?;
                for (win, bytes) in raw {
                    if win == key.window {
                        return Ok(Some(self.value_codec.deserialize(&bytes)?));
                    }
                }
                Ok(None)
            }
        }
    }
}

impl<K, V> SessionStore<K, V> for CachingSessionStore<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn init(&self, ctx: Arc<dyn ProcessingContext>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.name().to_string()));
        }
        self.inner.open_storage(ctx.as_ref())?;

        // Write-through path: evicted/flushed dirty entries land in the
        // segmented store, then in the changelog when logging is configured.
        let inner = Arc::clone(&self.inner);
        let binder = Arc::clone(&self.binder);
        self.cache.set_flush_listener(
            self.name(),
            Box::new(move |entries| {
                for entry in entries {
                    if inner.write_encoded(&entry.key, entry.value.as_deref())? {
                        binder.log_write(&entry.key, entry.value.as_deref())?;
                    }
                }
                Ok(())
            }),
        );

        self.binder.attach(ctx);
        Ok(())
    }

    fn put(&self, key: &WindowedKey<K>, value: &V) -> Result<()> {
        self.binder.measure("put", || {
            self.ensure_open()?;
            let key_bytes = self.key_codec.serialize(&key.key)?;
            let value_bytes = self.value_codec.serialize(value)?;
            let encoded = window::encode_windowed(&key_bytes, key.window);
            debug!("PUT (cached) store={}", self.name());
            self.cache
                .put(self.name(), encoded, Some(Bytes::from(value_bytes)))
        })
    }

    fn remove(&self, key: &WindowedKey<K>) -> Result<()> {
        self.binder.measure("remove", || {
            self.ensure_open()?;
            let key_bytes = self.key_codec.serialize(&key.key)?;
            let encoded = window::encode_windowed(&key_bytes, key.window);
            debug!("REMOVE (cached) store={}", self.name());
            self.cache.put(self.name(), encoded, None)
        })
    }

    fn fetch(&self, key: &K, earliest: i64, latest: i64) -> Result<SessionIter<V>> {
        self.binder.measure("fetch", || {
            self.ensure_open()?;
            let key_bytes = self.key_codec.serialize(key)?;

            // Backing store first, then overlay resident cache entries:
            // buffered writes win, tombstones hide.
            let mut merged: BTreeMap<SessionWindow, Bytes> = self
                .inner
                .fetch_raw(&key_bytes, earliest, latest)?
                .into_iter()
                .collect();
            let (lower, upper) = window::scan_bounds(&key_bytes, latest);
            for (encoded, value) in self.cache.range(self.name(), &lower, &upper) {
                let Some(win) = window::matches_query(&encoded, &key_bytes, earliest, latest)
                else {
                    continue;
                };
                match value {
                    Some(v) => {
                        merged.insert(win, v);
                    }
                    None => {
                        merged.remove(&win);
                    }
                }
            }

            let mut sessions = Vec::with_capacity(merged.len());
            for (win, bytes) in merged {
                sessions.push((win, self.value_codec.deserialize(&bytes)?));
            }
            Ok(SessionIter::new(sessions))
        })
    }

    fn flush(&self) -> Result<()> {
        self.binder.measure("flush", || {
            self.ensure_open()?;
            self.cache.flush(self.name())?;
            self.inner.flush()
        })
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.binder.is_attached() {
            self.cache.flush(self.name())?;
        }
        self.cache.close_namespace(self.name());
        self.inner.close()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
