use super::binder::ContextBinder;
use super::codec::Codec;
use super::error::{Result, StoreError};
use super::store::{SessionIter, SessionStore};
use super::window::{self, SessionWindow, WindowedKey};
use crate::context::ProcessingContext;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::ops::Bound::{Excluded, Included};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable ordered store of `(key, window) -> value`, partitioned into
/// fixed-width time segments keyed by `window.end`.
///
/// Each segment pairs an in-memory ordered index with an append-only
/// checksummed log file; `init` replays surviving files to rebuild the
/// index. A segment whose upper bound falls more than the retention period
/// behind the highest observed timestamp is dropped and its file deleted.
pub struct SegmentedSessionStore<K, V> {
    name: String,
    retention_ms: i64,
    segment_interval_ms: i64,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    binder: ContextBinder,
    state: RwLock<StoreState>,
}

struct StoreState {
    /// Set at init from the context state directory
    dir: Option<PathBuf>,
    segments: BTreeMap<i64, Segment>,
    /// Highest window end ever written (or recovered)
    observed_stream_time: i64,
    closed: bool,
}

struct Segment {
    entries: BTreeMap<Bytes, Bytes>,
    writer: BufWriter<File>,
    path: PathBuf,
}

/// One framed record in a segment log. `None` value is a tombstone.
#[derive(Serialize, Deserialize)]
struct SegmentRecord {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

impl Segment {
    fn create(dir: &Path, id: i64) -> Result<Self> {
        let path = dir.join(format!("segment-{id}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened segment file {:?}", path);
        Ok(Self {
            entries: BTreeMap::new(),
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Frame format follows the store's log convention:
    /// `len u64 BE ++ crc32 u32 BE ++ bincode(record)`
    fn append(&mut self, record: &SegmentRecord) -> Result<()> {
        let data = bincode::serialize(record)?;
        let checksum = crc32fast::hash(&data);
        self.writer.write_all(&(data.len() as u64).to_be_bytes())?;
        self.writer.write_all(&checksum.to_be_bytes())?;
        self.writer.write_all(&data)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Replay one segment file into an ordered index. A corrupt or truncated
/// tail stops the replay at the last valid frame.
fn replay_segment(path: &Path) -> Result<BTreeMap<Bytes, Bytes>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = BTreeMap::new();

    loop {
        let mut len_buf = [0u8; 8];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u64::from_be_bytes(len_buf) as usize;

        let mut crc_buf = [0u8; 4];
        if reader.read_exact(&mut crc_buf).is_err() {
            warn!("Incomplete frame header in {:?}, truncating replay", path);
            break;
        }
        let expected = u32::from_be_bytes(crc_buf);

        let mut data = vec![0u8; len];
        if reader.read_exact(&mut data).is_err() {
            warn!("Incomplete frame in {:?}, truncating replay", path);
            break;
        }
        if crc32fast::hash(&data) != expected {
            warn!("Checksum mismatch in {:?}, stopping replay", path);
            break;
        }

        let record: SegmentRecord = match bincode::deserialize(&data) {
            Ok(r) => r,
            Err(_) => {
                warn!("Corrupted record in {:?}, stopping replay", path);
                break;
            }
        };
        match record.value {
            Some(v) => {
                entries.insert(Bytes::from(record.key), Bytes::from(v));
            }
            None => {
                entries.remove(record.key.as_slice());
            }
        }
    }
    Ok(entries)
}

impl<K, V> SegmentedSessionStore<K, V> {
    pub(crate) fn new(
        name: &str,
        retention_ms: i64,
        segment_interval_ms: i64,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
        binder: ContextBinder,
    ) -> Self {
        Self {
            name: name.to_string(),
            retention_ms,
            segment_interval_ms: segment_interval_ms.max(1),
            key_codec,
            value_codec,
            binder,
            state: RwLock::new(StoreState {
                dir: None,
                segments: BTreeMap::new(),
                observed_stream_time: 0,
                closed: false,
            }),
        }
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    fn segment_id(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.segment_interval_ms)
    }

    fn check_open(&self, state: &StoreState) -> Result<()> {
        if state.closed {
            return Err(StoreError::Closed(self.name.clone()));
        }
        if state.dir.is_none() {
            return Err(StoreError::Uninitialized(self.name.clone()));
        }
        Ok(())
    }

    /// Open persistent state under the context state directory, replaying
    /// any surviving segment files. Called from `init` (and directly by the
    /// caching layer, which owns metering for the composed handle).
    pub(crate) fn open_storage(&self, ctx: &dyn ProcessingContext) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed(self.name.clone()));
        }
        if state.dir.is_some() {
            warn!("Store {} storage is already open", self.name);
            return Ok(());
        }

        let dir = ctx.state_dir().join(&self.name);
        fs::create_dir_all(&dir)?;

        let mut segments = BTreeMap::new();
        let mut observed = 0i64;
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            let Some(id) = segment_file_id(&path) else {
                continue;
            };
            let entries = replay_segment(&path)?;
            for key in entries.keys() {
                let (_, recovered) = window::decode_windowed(key);
                observed = observed.max(recovered.end());
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            segments.insert(
                id,
                Segment {
                    entries,
                    writer: BufWriter::new(file),
                    path,
                },
            );
        }

        info!(
            "Session store {} opened at {:?}, {} segments recovered",
            self.name,
            dir,
            segments.len()
        );
        state.segments = segments;
        state.observed_stream_time = observed;
        state.dir = Some(dir);
        Ok(())
    }

    /// Apply one write at the encoded-key level. Returns false when the
    /// record addresses an already-expired segment and was dropped.
    pub(crate) fn write_encoded(&self, encoded: &Bytes, value: Option<&[u8]>) -> Result<bool> {
        let (_, win) = window::decode_windowed(encoded);
        let mut state = self.state.write();
        self.check_open(&state)?;

        state.observed_stream_time = state.observed_stream_time.max(win.end());
        let min_live = self.segment_id(state.observed_stream_time - self.retention_ms);
        let seg_id = self.segment_id(win.end());
        if seg_id < min_live {
            warn!(
                "Store {}: dropping record for expired segment {} (stream time {})",
                self.name, seg_id, state.observed_stream_time
            );
            self.purge_expired(&mut state, min_live)?;
            return Ok(false);
        }

        let dir = state.dir.clone().expect("storage is open");
        let segment = match state.segments.entry(seg_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Segment::create(&dir, seg_id)?),
        };
        segment.append(&SegmentRecord {
            key: encoded.to_vec(),
            value: value.map(|v| v.to_vec()),
        })?;
        match value {
            Some(v) => {
                segment.entries.insert(encoded.clone(), Bytes::copy_from_slice(v));
            }
            None => {
                segment.entries.remove(encoded.as_ref());
            }
        }

        self.purge_expired(&mut state, min_live)?;
        Ok(true)
    }

    fn purge_expired(&self, state: &mut StoreState, min_live: i64) -> Result<()> {
        let expired: Vec<i64> = state.segments.range(..min_live).map(|(id, _)| *id).collect();
        for id in expired {
            if let Some(segment) = state.segments.remove(&id) {
                info!("Store {}: purging expired segment {}", self.name, id);
                drop(segment.writer);
                fs::remove_file(&segment.path)?;
            }
        }
        Ok(())
    }

    /// Snapshot of sessions for `key_bytes` overlapping `[earliest, latest]`,
    /// as serialized values sorted by window. Materialized under the read
    /// lock, so a concurrent purge can never tear the result.
    pub(crate) fn fetch_raw(
        &self,
        key_bytes: &[u8],
        earliest: i64,
        latest: i64,
    ) -> Result<Vec<(SessionWindow, Bytes)>> {
        let state = self.state.read();
        self.check_open(&state)?;

        let (lower, upper) = window::scan_bounds(key_bytes, latest);
        let mut sessions = Vec::new();
        for segment in state
            .segments
            .range(self.segment_id(earliest)..)
            .map(|(_, s)| s)
        {
            for (encoded, value) in segment
                .entries
                .range::<[u8], _>((Included(lower.as_ref()), Excluded(upper.as_ref())))
            {
                if let Some(win) = window::matches_query(encoded, key_bytes, earliest, latest) {
                    sessions.push((win, value.clone()));
                }
            }
        }
        // Segments are ordered by window end; the result contract is by start
        sessions.sort_by_key(|(win, _)| *win);
        Ok(sessions)
    }

    fn flush_segments(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed(self.name.clone()));
        }
        for segment in state.segments.values_mut() {
            segment.sync()?;
        }
        Ok(())
    }
}

fn segment_file_id(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("segment-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

impl<K, V> SessionStore<K, V> for SegmentedSessionStore<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, ctx: Arc<dyn ProcessingContext>) -> Result<()> {
        self.open_storage(ctx.as_ref())?;
        self.binder.attach(ctx);
        Ok(())
    }

    fn put(&self, key: &WindowedKey<K>, value: &V) -> Result<()> {
        self.binder.measure("put", || {
            let key_bytes = self.key_codec.serialize(&key.key)?;
            let value_bytes = self.value_codec.serialize(value)?;
            let encoded = window::encode_windowed(&key_bytes, key.window);
            debug!("PUT store={}, encoded_key={}B", self.name, encoded.len());
            if self.write_encoded(&encoded, Some(value_bytes.as_slice()))? {
                self.binder.log_write(&encoded, Some(value_bytes.as_slice()))?;
            }
            Ok(())
        })
    }

    fn remove(&self, key: &WindowedKey<K>) -> Result<()> {
        self.binder.measure("remove", || {
            let key_bytes = self.key_codec.serialize(&key.key)?;
            let encoded = window::encode_windowed(&key_bytes, key.window);
            debug!("REMOVE store={}", self.name);
            if self.write_encoded(&encoded, None)? {
                self.binder.log_write(&encoded, None)?;
            }
            Ok(())
        })
    }

    fn fetch(&self, key: &K, earliest: i64, latest: i64) -> Result<SessionIter<V>> {
        self.binder.measure("fetch", || {
            let key_bytes = self.key_codec.serialize(key)?;
            let raw = self.fetch_raw(&key_bytes, earliest, latest)?;
            let mut sessions = Vec::with_capacity(raw.len());
            for (win, bytes) in raw {
                sessions.push((win, self.value_codec.deserialize(&bytes)?));
            }
            Ok(SessionIter::new(sessions))
        })
    }

    fn flush(&self) -> Result<()> {
        self.binder.measure("flush", || self.flush_segments())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        for segment in state.segments.values_mut() {
            segment.sync()?;
        }
        state.segments.clear();
        state.closed = true;
        info!("Session store {} closed", self.name);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
