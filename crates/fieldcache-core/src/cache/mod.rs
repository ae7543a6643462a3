//! Keyed, persisted, revalidating query cache.
//!
//! Screens open a [`CachedQuery`] from the process-wide [`QueryCache`] with a
//! [`QueryKey`] and an async fetcher. The handle shows the last known value
//! at once, revalidates in the background and falls back to the persisted
//! copy when the network is unavailable.
//!
//! - At most one fetch per key is in flight; refreshes join it.
//! - A failed fetch never clears a cached value.
//! - Successful values are written to a [`PersistedStore`] and seed the
//!   cache after a restart.

pub mod data;
pub mod error;
pub mod file_store;
pub mod key;
pub mod manager;
pub mod query;
pub mod store;

pub use data::CachedData;
pub use error::{ErrorInfo, ErrorKind, FetchError};
pub use file_store::FileStore;
pub use key::QueryKey;
pub use manager::{CacheOptions, EntrySnapshot, EntryState, QueryCache};
pub use query::{CachedQuery, QueryState};
pub use store::{MemoryStore, PersistedStore, StoredValue};
