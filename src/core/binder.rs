use super::error::Result;
use crate::context::ProcessingContext;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Behavior activated when a store handle is bound to a processing context.
///
/// The binder is a mutable attached-config cell, not a wrapper: the handle
/// constructed by the supplier keeps its structural type and consults the
/// binder on every operation. Attachment happens exactly once; before it,
/// operations run unmetered and nothing is logged.
pub struct ContextBinder {
    store_name: String,
    logged: bool,
    changelog_topic: String,
    overrides: HashMap<String, String>,
    /// Passthrough binders (inner layer of a cache-wrapped handle) never
    /// meter or log; the outward-facing layer owns both concerns.
    enabled: bool,
    attached: RwLock<Option<Arc<dyn ProcessingContext>>>,
}

impl ContextBinder {
    pub(crate) fn new(store_name: &str, logged: bool, overrides: HashMap<String, String>) -> Self {
        Self {
            changelog_topic: format!("{store_name}-changelog"),
            store_name: store_name.to_string(),
            logged,
            overrides,
            enabled: true,
            attached: RwLock::new(None),
        }
    }

    pub(crate) fn passthrough(store_name: &str) -> Self {
        Self {
            changelog_topic: String::new(),
            store_name: store_name.to_string(),
            logged: false,
            overrides: HashMap::new(),
            enabled: false,
            attached: RwLock::new(None),
        }
    }

    /// Bind to the context. Registers the changelog destination when logging
    /// is configured and records the attachment metric.
    pub(crate) fn attach(&self, ctx: Arc<dyn ProcessingContext>) {
        if !self.enabled {
            return;
        }
        let mut slot = self.attached.write();
        if slot.is_some() {
            warn!("Store {} is already attached to a context", self.store_name);
            return;
        }
        if self.logged {
            ctx.register_changelog(&self.changelog_topic, &self.overrides);
        }
        ctx.metrics()
            .record(&format!("{}.init.calls", self.store_name), 1.0);
        info!(
            "Store {} attached to context (logged={})",
            self.store_name, self.logged
        );
        *slot = Some(ctx);
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.read().is_some()
    }

    /// Run an operation, recording its call count and latency when attached
    pub(crate) fn measure<T>(&self, op: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.enabled {
            return f();
        }
        let start = Instant::now();
        let result = f();
        let guard = self.attached.read();
        if let Some(ctx) = guard.as_ref() {
            let metrics = ctx.metrics();
            metrics.record(&format!("{}.{op}.calls", self.store_name), 1.0);
            metrics.record(
                &format!("{}.{op}.latency-ms", self.store_name),
                start.elapsed().as_secs_f64() * 1000.0,
            );
        }
        result
    }

    /// Forward a committed write to the change log. The backing-store write
    /// stands even if emission fails (at-least-once, no rollback).
    pub(crate) fn log_write(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if !self.logged {
            return Ok(());
        }
        let guard = self.attached.read();
        let Some(ctx) = guard.as_ref() else {
            return Ok(());
        };
        ctx.emit(&self.changelog_topic, key, value, ctx.current_time_ms())
    }
}
