use super::binder::ContextBinder;
use super::caching_store::CachingSessionStore;
use super::codec::Codec;
use super::segment_store::SegmentedSessionStore;
use super::store::SessionStore;
use crate::cache::WriteBackCache;
use crate::config::EngineConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Factory composing a session store handle from its configuration.
///
/// The composition policy: always a segmented persistent store with the
/// given retention and codecs; wrapped in the shared write-back cache iff
/// `cached` (the wrapper is the handle's structural type for its lifetime);
/// `logged` and the changelog overrides are recorded configuration consulted
/// by the binder at attachment and never change the structural type.
pub struct SessionStoreSupplier<K, V> {
    name: String,
    retention_ms: i64,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    logged: bool,
    changelog_overrides: HashMap<String, String>,
    cached: bool,
    cache: Arc<WriteBackCache>,
    segment_interval_ms: i64,
}

impl<K, V> SessionStoreSupplier<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        retention_ms: i64,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
        logged: bool,
        changelog_overrides: HashMap<String, String>,
        cached: bool,
        cache: Arc<WriteBackCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            retention_ms,
            key_codec,
            value_codec,
            logged,
            changelog_overrides,
            cached,
            cache,
            segment_interval_ms: config.segments.interval_for(retention_ms),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a freshly constructed, equivalently configured handle
    pub fn get(&self) -> Box<dyn SessionStore<K, V>> {
        debug!(
            "Supplying store {}: cached={}, logged={}, retention={}ms",
            self.name, self.cached, self.logged, self.retention_ms
        );
        if self.cached {
            let inner = Arc::new(SegmentedSessionStore::new(
                &self.name,
                self.retention_ms,
                self.segment_interval_ms,
                Arc::clone(&self.key_codec),
                Arc::clone(&self.value_codec),
                ContextBinder::passthrough(&self.name),
            ));
            let binder = Arc::new(ContextBinder::new(
                &self.name,
                self.logged,
                self.changelog_overrides.clone(),
            ));
            Box::new(CachingSessionStore::new(
                inner,
                Arc::clone(&self.cache),
                binder,
                Arc::clone(&self.key_codec),
                Arc::clone(&self.value_codec),
            ))
        } else {
            Box::new(SegmentedSessionStore::new(
                &self.name,
                self.retention_ms,
                self.segment_interval_ms,
                Arc::clone(&self.key_codec),
                Arc::clone(&self.value_codec),
                ContextBinder::new(&self.name, self.logged, self.changelog_overrides.clone()),
            ))
        }
    }
}
