pub mod cache;
pub mod config;
pub mod context;
pub mod core;

// Re-export commonly used types
pub use cache::{CacheStats, DirtyEntry, WriteBackCache};
pub use config::EngineConfig;
pub use context::{MetricsSink, ProcessingContext};
pub use core::{
    BincodeCodec, CachingSessionStore, Codec, Result, SegmentedSessionStore, SessionIter,
    SessionStore, SessionStoreSupplier, SessionWindow, StoreError, StringCodec, WindowedKey,
};
