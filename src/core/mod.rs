pub mod binder;
pub mod caching_store;
pub mod codec;
pub mod error;
pub mod segment_store;
pub mod store;
pub mod supplier;
pub mod window;

pub use binder::ContextBinder;
pub use caching_store::CachingSessionStore;
pub use codec::{BincodeCodec, Codec, StringCodec};
pub use error::{Result, StoreError};
pub use segment_store::SegmentedSessionStore;
pub use store::{SessionIter, SessionStore};
pub use supplier::SessionStoreSupplier;
pub use window::{SessionWindow, WindowedKey};
