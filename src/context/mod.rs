//! Interface boundary to the owning processing context.
//!
//! The engine consumes these traits; it never implements them. The context
//! supplies processing time, a metrics registry, the change-log emission
//! sink, and the directory where stores may allocate persistent state.

use crate::core::Result;
use std::collections::HashMap;
use std::path::Path;

/// Metrics registry owned by the processing context
pub trait MetricsSink: Send + Sync {
    /// Record one sample for the named metric
    fn record(&self, name: &str, value: f64);
}

/// Execution context a store is bound to at `init` time
pub trait ProcessingContext: Send + Sync {
    /// Current processing timestamp in epoch milliseconds
    fn current_time_ms(&self) -> i64;

    /// Root directory for persistent store state
    fn state_dir(&self) -> &Path;

    /// Metrics registry for operation counters and latencies
    fn metrics(&self) -> &dyn MetricsSink;

    /// Emit one record to a changelog destination. `None` value is a
    /// tombstone. A synchronous sink failure must be returned, not swallowed.
    fn emit(
        &self,
        topic: &str,
        key: &[u8],
        value: Option<&[u8]>,
        timestamp_ms: i64,
    ) -> Result<()>;

    /// Register a changelog destination, passing topic config overrides
    /// through opaquely to the durability sink.
    fn register_changelog(&self, topic: &str, overrides: &HashMap<String, String>);
}
