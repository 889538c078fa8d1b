//! Shared write-back cache.
//!
//! One cache instance is shared by every store handle of a processing unit.
//! Entries are indexed by `(namespace, encoded windowed key)` under a single
//! byte budget; eviction is least-recently-used across all namespaces and
//! writes the evicted entry through to its namespace's flush listener before
//! the evicting `put` returns.

use crate::core::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound::{Excluded, Included};
use tracing::{debug, warn};

/// Fixed per-entry bookkeeping cost added to key/value bytes
const ENTRY_OVERHEAD: usize = 64;

/// A dirty entry handed to a flush listener. `None` value is a tombstone.
pub struct DirtyEntry {
    pub key: Bytes,
    pub value: Option<Bytes>,
}

/// Write-through callback for one namespace. Invoked under the cache lock,
/// so a listener must only write to the backing store and changelog; it must
/// never call back into the cache.
pub type FlushListener = Box<dyn FnMut(&[DirtyEntry]) -> Result<()> + Send>;

struct CacheEntry {
    value: Option<Bytes>,
    dirty: bool,
    size: usize,
}

struct Namespace {
    entries: BTreeMap<Bytes, CacheEntry>,
    listener: Option<FlushListener>,
}

impl Namespace {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            listener: None,
        }
    }
}

struct CacheInner {
    namespaces: HashMap<String, Namespace>,
    /// Global recency order, least recent at the front
    recency: VecDeque<(String, Bytes)>,
    total_bytes: usize,
    stats: CacheStats,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub puts: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flushes: u64,
    pub entries: usize,
    pub total_bytes: usize,
}

/// Bounded write-back cache shared across store namespaces.
///
/// A single mutex around the arena is the mutual-exclusion boundary required
/// by the admission/eviction/flush path: at most one eviction or flush
/// sequence proceeds at a time, and a flush is never concurrent with itself.
pub struct WriteBackCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

impl WriteBackCache {
    /// Create a cache with the given byte budget shared by all namespaces
    pub fn new(max_bytes: usize) -> Self {
        debug!("Creating write-back cache, budget={} bytes", max_bytes);
        Self {
            inner: Mutex::new(CacheInner {
                namespaces: HashMap::new(),
                recency: VecDeque::new(),
                total_bytes: 0,
                stats: CacheStats::default(),
            }),
            max_bytes,
        }
    }

    /// Register a namespace and its write-through listener
    pub fn set_flush_listener(&self, namespace: &str, listener: FlushListener) {
        let mut guard = self.inner.lock();
        let ns = guard
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(Namespace::new);
        ns.listener = Some(listener);
        debug!("Cache namespace registered: {}", namespace);
    }

    /// Insert or overwrite a dirty entry. `None` value records a tombstone.
    ///
    /// Evicts least-recently-used entries from any namespace until the byte
    /// budget is restored; dirty evictees are flushed synchronously before
    /// this call returns.
    pub fn put(&self, namespace: &str, key: Bytes, value: Option<Bytes>) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats.puts += 1;

        let size = Self::entry_size(&key, &value);
        let ns = inner
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(Namespace::new);

        if let Some(existing) = ns.entries.get_mut(&key) {
            // Re-put of a resident entry: swap value, no double-counted size
            inner.total_bytes = inner.total_bytes - existing.size + size;
            existing.value = value;
            existing.dirty = true;
            existing.size = size;
            inner
                .recency
                .retain(|(n, k)| !(n == namespace && *k == key));
        } else {
            ns.entries.insert(
                key.clone(),
                CacheEntry {
                    value,
                    dirty: true,
                    size,
                },
            );
            inner.total_bytes += size;
        }
        inner.recency.push_back((namespace.to_string(), key));

        Self::evict_to_budget(inner, self.max_bytes)
    }

    /// Get a resident entry. Outer `None` means not resident (fall through
    /// to the backing store); `Some(None)` is a buffered tombstone.
    pub fn get(&self, namespace: &str, key: &[u8]) -> Option<Option<Bytes>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(ns) = inner.namespaces.get(namespace) else {
            inner.stats.misses += 1;
            return None;
        };
        match ns.entries.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                inner
                    .recency
                    .retain(|(n, k)| !(n == namespace && k.as_ref() == key));
                inner
                    .recency
                    .push_back((namespace.to_string(), Bytes::copy_from_slice(key)));
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Ordered snapshot of resident entries in `[lower, upper)` for one
    /// namespace, used by merge reads
    pub fn range(&self, namespace: &str, lower: &[u8], upper: &[u8]) -> Vec<(Bytes, Option<Bytes>)> {
        let guard = self.inner.lock();
        let Some(ns) = guard.namespaces.get(namespace) else {
            return Vec::new();
        };
        ns.entries
            .range::<[u8], _>((Included(lower), Excluded(upper)))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Write through all dirty entries of a namespace in ascending key
    /// order. Entries stay resident and are marked clean on success.
    pub fn flush(&self, namespace: &str) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(ns) = inner.namespaces.get_mut(namespace) else {
            return Ok(());
        };
        let batch: Vec<DirtyEntry> = ns
            .entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, e)| DirtyEntry {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect();
        if batch.is_empty() {
            return Ok(());
        }

        let Some(mut listener) = ns.listener.take() else {
            warn!(
                "Flushing namespace {} with no listener, {} dirty entries dropped",
                namespace,
                batch.len()
            );
            return Ok(());
        };
        debug!("Cache flush: namespace={}, dirty={}", namespace, batch.len());
        let result = listener(&batch);

        let ns = inner.namespaces.get_mut(namespace).expect("namespace exists");
        ns.listener = Some(listener);
        result?;

        for entry in &batch {
            if let Some(resident) = ns.entries.get_mut(&entry.key) {
                resident.dirty = false;
            }
        }
        inner.stats.flushes += 1;
        Ok(())
    }

    /// Count of entries currently resident across all namespaces
    pub fn size(&self) -> usize {
        let guard = self.inner.lock();
        guard.namespaces.values().map(|ns| ns.entries.len()).sum()
    }

    /// Count of entries resident for one namespace
    pub fn namespace_size(&self, namespace: &str) -> usize {
        let guard = self.inner.lock();
        guard
            .namespaces
            .get(namespace)
            .map_or(0, |ns| ns.entries.len())
    }

    /// Drop a namespace and release its cache slot. Callers flush first.
    pub fn close_namespace(&self, namespace: &str) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(ns) = inner.namespaces.remove(namespace) {
            let released: usize = ns.entries.values().map(|e| e.size).sum();
            inner.total_bytes = inner.total_bytes.saturating_sub(released);
            inner.recency.retain(|(n, _)| n != namespace);
            debug!(
                "Cache namespace closed: {}, released {} bytes",
                namespace, released
            );
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let guard = self.inner.lock();
        let mut stats = guard.stats.clone();
        stats.entries = guard.namespaces.values().map(|ns| ns.entries.len()).sum();
        stats.total_bytes = guard.total_bytes;
        stats
    }

    fn entry_size(key: &Bytes, value: &Option<Bytes>) -> usize {
        key.len() + value.as_ref().map_or(0, |v| v.len()) + ENTRY_OVERHEAD
    }

    fn evict_to_budget(inner: &mut CacheInner, max_bytes: usize) -> Result<()> {
        while inner.total_bytes > max_bytes {
            let Some((evict_ns, evict_key)) = inner.recency.pop_front() else {
                break;
            };
            let Some(ns) = inner.namespaces.get_mut(&evict_ns) else {
                continue;
            };
            let Some(entry) = ns.entries.get(&evict_key) else {
                continue;
            };
            let size = entry.size;

            // A dirty candidate must reach its backing store before it may
            // leave the arena: on write-through failure it stays resident
            // and dirty so a later flush or eviction retries it.
            if entry.dirty {
                match ns.listener.take() {
                    Some(mut listener) => {
                        let batch = [DirtyEntry {
                            key: evict_key.clone(),
                            value: entry.value.clone(),
                        }];
                        let result = listener(&batch);
                        let ns = inner
                            .namespaces
                            .get_mut(&evict_ns)
                            .expect("namespace exists");
                        ns.listener = Some(listener);
                        if let Err(e) = result {
                            inner.recency.push_front((evict_ns, evict_key));
                            return Err(e);
                        }
                    }
                    None => {
                        warn!(
                            "Evicting dirty entry from namespace {} with no flush listener",
                            evict_ns
                        );
                    }
                }
            }

            let ns = inner
                .namespaces
                .get_mut(&evict_ns)
                .expect("namespace exists");
            ns.entries.remove(&evict_key);
            inner.total_bytes = inner.total_bytes.saturating_sub(size);
            inner.stats.evictions += 1;
            debug!("Cache EVICT: namespace={}, {} bytes", evict_ns, size);
        }
        Ok(())
    }
}

impl Default for WriteBackCache {
    fn default() -> Self {
        // Default budget: 10 MB shared across namespaces
        Self::new(10 * 1024 * 1024)
    }
}
