#![allow(dead_code)]

use parking_lot::Mutex;
use segstore::{
    Codec, EngineConfig, MetricsSink, ProcessingContext, Result, SessionStoreSupplier,
    StoreError, StringCodec, WriteBackCache,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tempfile::TempDir;

/// Route engine tracing to the test writer; honors RUST_LOG
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mock processing context: fixed-ish clock, temp state dir, recording
/// metrics sink and changelog sink.
pub struct MockContext {
    time_ms: AtomicI64,
    state_dir: PathBuf,
    _tmp: Option<TempDir>,
    pub metrics: Mutex<Vec<(String, f64)>>,
    pub emitted: Mutex<Vec<(String, Vec<u8>, Option<Vec<u8>>, i64)>>,
    pub changelogs: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub fail_emit: AtomicBool,
}

impl MockContext {
    pub fn new(time_ms: i64) -> Arc<Self> {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let state_dir = tmp.path().to_path_buf();
        Arc::new(Self {
            time_ms: AtomicI64::new(time_ms),
            state_dir,
            _tmp: Some(tmp),
            metrics: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            changelogs: Mutex::new(Vec::new()),
            fail_emit: AtomicBool::new(false),
        })
    }

    /// Context over a caller-owned state directory, for restart tests
    pub fn with_dir(time_ms: i64, dir: &Path) -> Arc<Self> {
        init_tracing();
        Arc::new(Self {
            time_ms: AtomicI64::new(time_ms),
            state_dir: dir.to_path_buf(),
            _tmp: None,
            metrics: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            changelogs: Mutex::new(Vec::new()),
            fail_emit: AtomicBool::new(false),
        })
    }

    pub fn advance_to(&self, time_ms: i64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }

    pub fn emitted_count(&self) -> usize {
        self.emitted.lock().len()
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.metrics.lock().iter().any(|(n, _)| n == name)
    }
}

impl MetricsSink for MockContext {
    fn record(&self, name: &str, value: f64) {
        self.metrics.lock().push((name.to_string(), value));
    }
}

impl ProcessingContext for MockContext {
    fn current_time_ms(&self) -> i64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn metrics(&self) -> &dyn MetricsSink {
        self
    }

    fn emit(
        &self,
        topic: &str,
        key: &[u8],
        value: Option<&[u8]>,
        timestamp_ms: i64,
    ) -> Result<()> {
        if self.fail_emit.load(Ordering::SeqCst) {
            return Err(StoreError::ChangelogEmit {
                topic: topic.to_string(),
                reason: "sink unavailable".to_string(),
            });
        }
        self.emitted.lock().push((
            topic.to_string(),
            key.to_vec(),
            value.map(|v| v.to_vec()),
            timestamp_ms,
        ));
        Ok(())
    }

    fn register_changelog(&self, topic: &str, overrides: &HashMap<String, String>) {
        self.changelogs.lock().push((topic.to_string(), overrides.clone()));
    }
}

pub fn string_codec() -> Arc<dyn Codec<String>> {
    Arc::new(StringCodec)
}

/// Supplier over String keys/values with default engine config
pub fn string_supplier(
    name: &str,
    retention_ms: i64,
    logged: bool,
    cached: bool,
    cache: &Arc<WriteBackCache>,
) -> SessionStoreSupplier<String, String> {
    SessionStoreSupplier::new(
        name,
        retention_ms,
        string_codec(),
        string_codec(),
        logged,
        HashMap::new(),
        cached,
        Arc::clone(cache),
        &EngineConfig::default(),
    )
}
