//! fieldcache core library.
//!
//! Offline-first data access for the farmer learning app: a keyed,
//! persisted, revalidating query cache plus the API client, models and
//! session handling that feed it.

pub mod api;
pub mod auth;
pub mod cache;
pub mod cached_api;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, SessionData};
pub use cache::{
    CacheOptions, CachedData, CachedQuery, ErrorInfo, ErrorKind, FetchError, FileStore,
    MemoryStore, PersistedStore, QueryCache, QueryKey, QueryState,
};
pub use cached_api::CachedApi;
pub use config::Config;
