// Persistent Segmented Store Tests
// Session lookups, retention purge, recovery, lifecycle

mod common;

use common::{MockContext, string_supplier};
use segstore::{SessionWindow, StoreError, WindowedKey, WriteBackCache};
use std::fs;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

fn wk(key: &str, start: i64, end: i64) -> WindowedKey<String> {
    WindowedKey::new(key.to_string(), SessionWindow::new(start, end).unwrap())
}

#[test]
fn test_put_then_fetch_exactly_once() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", 0, 10), &"v".to_string()).unwrap();

    let sessions: Vec<_> = store.fetch(&"user".to_string(), 0, 10).unwrap().collect();
    assert_eq!(
        sessions,
        vec![(SessionWindow::new(0, 10).unwrap(), "v".to_string())]
    );
}

#[test]
fn test_put_same_pair_overwrites() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", 0, 10), &"old".to_string()).unwrap();
    store.put(&wk("user", 0, 10), &"new".to_string()).unwrap();

    let sessions: Vec<_> = store.fetch(&"user".to_string(), 0, 10).unwrap().collect();
    assert_eq!(sessions.len(), 1, "same (key, window) is one logical record");
    assert_eq!(sessions[0].1, "new");
}

#[test]
fn test_fetch_orders_by_window_start() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    // Windows land in different segments (segmented by window end)
    store.put(&wk("user", 5, 500), &"b".to_string()).unwrap();
    store.put(&wk("user", 0, 10), &"a".to_string()).unwrap();
    store.put(&wk("user", 6, 8), &"c".to_string()).unwrap();

    let starts: Vec<i64> = store
        .fetch(&"user".to_string(), 0, 500)
        .unwrap()
        .map(|(w, _)| w.start())
        .collect();
    assert_eq!(starts, vec![0, 5, 6]);
}

#[test]
fn test_fetch_finds_negative_start_window() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", -5, 10), &"v".to_string()).unwrap();

    let sessions: Vec<_> = store.fetch(&"user".to_string(), -5, 10).unwrap().collect();
    assert_eq!(
        sessions,
        vec![(SessionWindow::new(-5, 10).unwrap(), "v".to_string())]
    );
}

#[test]
fn test_fetch_filters_key_and_overlap() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", 0, 10), &"in".to_string()).unwrap();
    store.put(&wk("user", 50, 60), &"out".to_string()).unwrap();
    store.put(&wk("users", 0, 10), &"other".to_string()).unwrap();

    let sessions: Vec<_> = store.fetch(&"user".to_string(), 0, 20).unwrap().collect();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].1, "in");
}

#[test]
fn test_find_sessions_aliases_fetch() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", 0, 10), &"v".to_string()).unwrap();

    let fetched: Vec<_> = store.fetch(&"user".to_string(), 0, 10).unwrap().collect();
    let found: Vec<_> = store
        .find_sessions(&"user".to_string(), 0, 10)
        .unwrap()
        .collect();
    assert_eq!(fetched, found);
}

#[test]
fn test_remove_then_fetch_empty() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", 0, 10), &"v".to_string()).unwrap();
    store.remove(&wk("user", 0, 10)).unwrap();

    let sessions: Vec<_> = store.fetch(&"user".to_string(), 0, 10).unwrap().collect();
    assert!(sessions.is_empty());

    // Removing an absent record is a no-op
    store.remove(&wk("user", 0, 10)).unwrap();
}

#[test]
fn test_retention_purges_old_segments() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 10, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", 0, 10), &"old".to_string()).unwrap();
    // Advancing stream time far past retention reclaims the old segment
    store.put(&wk("user", 100, 100), &"new".to_string()).unwrap();

    let sessions: Vec<_> = store.fetch(&"user".to_string(), 0, 10).unwrap().collect();
    assert!(sessions.is_empty(), "expired session reclaimed");
    let sessions: Vec<_> = store.fetch(&"user".to_string(), 90, 110).unwrap().collect();
    assert_eq!(sessions.len(), 1);
}

#[test]
fn test_late_record_for_expired_segment_is_dropped() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 10, true, false, &cache).get();
    let ctx = MockContext::new(0);
    store.init(ctx.clone()).unwrap();

    store.put(&wk("user", 100, 100), &"new".to_string()).unwrap();
    assert_eq!(ctx.emitted_count(), 1);

    // Stream time is 100; a window ending at 10 is past retention
    store.put(&wk("user", 0, 10), &"late".to_string()).unwrap();

    let sessions: Vec<_> = store.fetch(&"user".to_string(), 0, 10).unwrap().collect();
    assert!(sessions.is_empty());
    assert_eq!(ctx.emitted_count(), 1, "dropped record is not logged either");
}

#[test]
fn test_recovery_after_restart() {
    let tmp = TempDir::new().unwrap();
    let cache = Arc::new(WriteBackCache::default());
    let supplier = string_supplier("sessions", 1000, false, false, &cache);

    let store = supplier.get();
    store.init(MockContext::with_dir(0, tmp.path())).unwrap();
    store.put(&wk("user", 0, 10), &"v1".to_string()).unwrap();
    store.put(&wk("user", 20, 30), &"v2".to_string()).unwrap();
    store.remove(&wk("user", 20, 30)).unwrap();
    store.close().unwrap();

    let reopened = supplier.get();
    reopened.init(MockContext::with_dir(0, tmp.path())).unwrap();
    let sessions: Vec<_> = reopened.fetch(&"user".to_string(), 0, 30).unwrap().collect();
    assert_eq!(
        sessions,
        vec![(SessionWindow::new(0, 10).unwrap(), "v1".to_string())],
        "puts survive, tombstones replay"
    );
}

#[test]
fn test_corrupt_segment_tail_truncates_replay() {
    let tmp = TempDir::new().unwrap();
    let cache = Arc::new(WriteBackCache::default());
    let supplier = string_supplier("sessions", 1000, false, false, &cache);

    let store = supplier.get();
    store.init(MockContext::with_dir(0, tmp.path())).unwrap();
    store.put(&wk("user", 0, 10), &"v".to_string()).unwrap();
    store.close().unwrap();

    // Garbage appended past the last valid frame
    let store_dir = tmp.path().join("sessions");
    let segment = fs::read_dir(&store_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().is_some_and(|e| e == "log"))
        .unwrap();
    let mut file = fs::OpenOptions::new().append(true).open(&segment).unwrap();
    file.write_all(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
    drop(file);

    let reopened = supplier.get();
    reopened.init(MockContext::with_dir(0, tmp.path())).unwrap();
    let sessions: Vec<_> = reopened.fetch(&"user".to_string(), 0, 10).unwrap().collect();
    assert_eq!(sessions.len(), 1, "records before the corrupt tail survive");
}

#[test]
fn test_close_is_idempotent() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();

    store.put(&wk("user", 0, 10), &"v".to_string()).unwrap();
    store.close().unwrap();
    store.close().unwrap();
}

#[test]
fn test_mutation_after_close_fails() {
    let cache = Arc::new(WriteBackCache::default());
    let store = string_supplier("sessions", 1000, false, false, &cache).get();
    store.init(MockContext::new(0)).unwrap();
    store.close().unwrap();

    let err = store.put(&wk("user", 0, 10), &"v".to_string()).unwrap_err();
    assert!(matches!(err, StoreError::Closed(_)));
    let err = store.fetch(&"user".to_string(), 0, 10).unwrap_err();
    assert!(matches!(err, StoreError::Closed(_)));
    let err = store.flush().unwrap_err();
    assert!(matches!(err, StoreError::Closed(_)));
}
