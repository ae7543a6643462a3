use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use super::data::is_within;
use super::error::{ErrorInfo, FetchError};
use super::query::CachedQuery;
use super::store::PersistedStore;
use super::{CachedData, QueryKey};

/// Type-erased fetcher producing the JSON form of a value.
pub(crate) type BoxFetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handle on a fetch in progress; every joiner awaits the same future.
pub(crate) type Flight = Shared<BoxFuture<'static, ()>>;

/// Tuning for a [`QueryCache`].
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Opening a query whose value was fetched less than this long ago does
    /// not start a fetch. Zero means every open revalidates.
    pub fresh_for: Duration,
    /// Start with network fetches disabled.
    pub offline_mode: bool,
}

/// Lifecycle phase of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum EntryState {
    #[default]
    Idle,
    /// First fetch in flight with nothing to show
    Loading,
    /// Fetch in flight while a value is shown
    Refreshing,
    /// Most recent fetch failed
    Error,
}

/// Point-in-time view of one cache entry, payload in JSON form.
#[derive(Debug, Clone, Default)]
pub struct EntrySnapshot {
    pub payload: Option<Value>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub state: EntryState,
    pub last_error: Option<ErrorInfo>,
    pub is_offline: bool,
}

impl EntrySnapshot {
    pub fn loading(&self) -> bool {
        self.state == EntryState::Loading
    }

    pub fn refreshing(&self) -> bool {
        self.state == EntryState::Refreshing
    }
}

/// One entry of the cache.
pub(crate) struct Slot {
    pub(crate) storage_key: String,
    pub(crate) state: watch::Sender<EntrySnapshot>,
    seeded: OnceCell<()>,
    inflight: Mutex<Option<Flight>>,
}

impl Slot {
    fn new(storage_key: String) -> Self {
        let (state, _) = watch::channel(EntrySnapshot::default());
        Self {
            storage_key,
            state,
            seeded: OnceCell::new(),
            inflight: Mutex::new(None),
        }
    }

    fn inflight(&self) -> MutexGuard<'_, Option<Flight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner {
    store: Arc<dyn PersistedStore>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    fresh_for: Duration,
    offline_mode: AtomicBool,
}

/// Process-wide query cache.
///
/// Create one at startup with the persisted store it should use and hand
/// clones to whoever needs data; clones share every entry. Each key has at
/// most one fetch in flight, successful results are written to the store,
/// and failures leave the last good value in place.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new(store: Arc<dyn PersistedStore>) -> Self {
        Self::with_options(store, CacheOptions::default())
    }

    pub fn with_options(store: Arc<dyn PersistedStore>, options: CacheOptions) -> Self {
        debug!(store = store.name(), ?options, "Query cache created");
        Self {
            inner: Arc::new(Inner {
                store,
                slots: Mutex::new(HashMap::new()),
                fresh_for: options.fresh_for,
                offline_mode: AtomicBool::new(options.offline_mode),
            }),
        }
    }

    /// Open a query on `key`.
    ///
    /// Any persisted value is visible on the returned handle; a fetch is
    /// started in the background unless the value is still fresh or the cache
    /// is in offline mode.
    pub async fn query<T, F, Fut>(&self, key: impl Into<QueryKey>, fetcher: F) -> CachedQuery<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        CachedQuery::open(self.clone(), key.into(), fetcher).await
    }

    /// Disable (or re-enable) network fetches. While offline, entries serve
    /// their persisted values and report `is_offline`.
    pub fn set_offline_mode(&self, offline: bool) {
        let was = self.inner.offline_mode.swap(offline, Ordering::SeqCst);
        if was != offline {
            info!(offline, "Offline mode changed");
        }
    }

    pub fn is_offline_mode(&self) -> bool {
        self.inner.offline_mode.load(Ordering::SeqCst)
    }

    /// Current state of `key`, if anything has opened it in this process.
    pub fn snapshot(&self, key: &QueryKey) -> Option<EntrySnapshot> {
        let slots = self.slots();
        slots
            .get(&key.storage_key())
            .map(|slot| slot.state.borrow().clone())
    }

    /// Age of every persisted entry, keyed by storage key.
    pub async fn cache_ages(&self) -> Result<BTreeMap<String, String>> {
        let mut ages = BTreeMap::new();
        for key in self.inner.store.keys().await? {
            match self.inner.store.get(&key).await {
                Ok(Some(cached)) => {
                    ages.insert(key, cached.age_display());
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(key = %key, error = %e, "Failed to load cache entry for age display");
                }
            }
        }
        Ok(ages)
    }

    /// Forget every entry, persisted and in memory, returning how many
    /// persisted entries were removed. Open handles keep what they show.
    pub async fn clear(&self) -> Result<usize> {
        self.slots().clear();
        let keys = self.inner.store.keys().await?;
        for key in &keys {
            self.inner.store.remove(key).await?;
        }
        info!(removed = keys.len(), "Cache cleared");
        Ok(keys.len())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry for `key`, created on first use.
    pub(crate) fn slot(&self, key: &QueryKey) -> Arc<Slot> {
        let storage_key = key.storage_key();
        let mut slots = self.slots();
        slots
            .entry(storage_key.clone())
            .or_insert_with(|| Arc::new(Slot::new(storage_key)))
            .clone()
    }

    /// Load the persisted value into a new entry. Runs once per entry.
    pub(crate) async fn seed(&self, slot: &Slot) {
        slot.seeded
            .get_or_init(|| async {
                match self.inner.store.get(&slot.storage_key).await {
                    Ok(Some(cached)) => {
                        debug!(key = %slot.storage_key, age = %cached.age_display(), "Seeded from persisted store");
                        slot.state.send_modify(|s| {
                            if s.payload.is_none() {
                                s.payload = Some(cached.data);
                                s.fetched_at = Some(cached.cached_at);
                            }
                        });
                    }
                    Ok(None) => {
                        debug!(key = %slot.storage_key, "Nothing persisted");
                    }
                    Err(e) => {
                        warn!(key = %slot.storage_key, error = %e, "Failed to read persisted entry, treating as empty");
                    }
                }
            })
            .await;
    }

    /// Start a fetch on open or key change if the entry needs one.
    pub(crate) fn kick(&self, slot: &Arc<Slot>, fetcher: &BoxFetcher) -> Option<Flight> {
        if self.is_offline_mode() {
            Self::mark_offline(slot);
            return None;
        }

        let fresh = {
            let state = slot.state.borrow();
            match (&state.payload, state.fetched_at) {
                (Some(_), Some(fetched_at)) if !self.inner.fresh_for.is_zero() => {
                    let window = chrono::Duration::from_std(self.inner.fresh_for)
                        .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
                    is_within(fetched_at, window)
                }
                _ => false,
            }
        };
        if fresh {
            debug!(key = %slot.storage_key, "Cached value is fresh, skipping fetch");
            return self.inflight(slot);
        }

        Some(self.revalidate(slot, fetcher))
    }

    /// Forced revalidation. Joins the fetch in flight if there is one.
    pub(crate) fn refresh(&self, slot: &Arc<Slot>, fetcher: &BoxFetcher) -> Option<Flight> {
        if self.is_offline_mode() {
            Self::mark_offline(slot);
            return None;
        }
        Some(self.revalidate(slot, fetcher))
    }

    /// The fetch currently in flight for an entry, if any.
    pub(crate) fn inflight(&self, slot: &Slot) -> Option<Flight> {
        slot.inflight().clone()
    }

    fn mark_offline(slot: &Slot) {
        slot.state.send_if_modified(|s| {
            let changed = !s.is_offline || s.state == EntryState::Loading;
            s.is_offline = true;
            if s.state == EntryState::Loading {
                s.state = EntryState::Idle;
            }
            changed
        });
    }

    fn revalidate(&self, slot: &Arc<Slot>, fetcher: &BoxFetcher) -> Flight {
        // Held until the flight is registered; the fetch task clears it under
        // the same lock, so a finished flight can never be left behind.
        let mut inflight = slot.inflight();
        if let Some(flight) = inflight.as_ref() {
            debug!(key = %slot.storage_key, "Joining fetch in flight");
            return flight.clone();
        }

        slot.state.send_modify(|s| {
            s.state = if s.payload.is_some() {
                EntryState::Refreshing
            } else {
                EntryState::Loading
            };
        });

        let handle = tokio::spawn(Self::run_fetch(
            self.inner.store.clone(),
            slot.clone(),
            fetcher.clone(),
        ));
        let storage_key = slot.storage_key.clone();
        let flight = async move {
            if let Err(e) = handle.await {
                warn!(key = %storage_key, error = %e, "Fetch task did not complete");
            }
        }
        .boxed()
        .shared();

        *inflight = Some(flight.clone());
        flight
    }

    async fn run_fetch(store: Arc<dyn PersistedStore>, slot: Arc<Slot>, fetcher: BoxFetcher) {
        debug!(key = %slot.storage_key, "Fetching");

        let result = AssertUnwindSafe(async { fetcher().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(FetchError::Fetcher("fetcher panicked".to_string()).into()));

        match result {
            Ok(payload) => {
                let cached = CachedData::new(payload);
                slot.state.send_modify(|s| {
                    s.payload = Some(cached.data.clone());
                    s.fetched_at = Some(cached.cached_at);
                    s.state = EntryState::Idle;
                    s.last_error = None;
                    s.is_offline = false;
                });
                if let Err(e) = store.set(&slot.storage_key, &cached).await {
                    warn!(key = %slot.storage_key, error = %e, "Failed to persist fetched value");
                }
                info!(key = %slot.storage_key, "Fetched and cached");
            }
            Err(e) => {
                let error = ErrorInfo::from_error(&e);
                warn!(
                    key = %slot.storage_key,
                    kind = ?error.kind,
                    error = %error.message,
                    "Fetch failed, keeping cached value"
                );
                slot.state.send_modify(|s| {
                    s.state = EntryState::Error;
                    s.is_offline = true;
                    s.last_error = Some(error);
                });
            }
        }

        slot.inflight().take();
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("store", &self.inner.store.name())
            .field("fresh_for", &self.inner.fresh_for)
            .field("offline_mode", &self.is_offline_mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::StoredValue;
    use crate::cache::{ErrorKind, MemoryStore};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Progress {
        completed: u32,
        total: u32,
    }

    fn progress(completed: u32) -> Progress {
        Progress {
            completed,
            total: 10,
        }
    }

    fn connectivity_error(message: &str) -> anyhow::Error {
        FetchError::Connectivity(message.to_string()).into()
    }

    async fn persisted(store: &MemoryStore, key: &str, value: Value) {
        store
            .set(&QueryKey::from(key).storage_key(), &CachedData::new(value))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cold_fetch_persists() {
        let store = Arc::new(MemoryStore::new());
        let cache = QueryCache::new(store.clone());

        let query = cache
            .query("progress", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                anyhow::Ok(progress(3))
            })
            .await;

        assert!(query.loading());
        assert_eq!(query.data(), None);

        query.settled().await;
        assert!(!query.loading());
        assert_eq!(query.data(), Some(progress(3)));

        let stored = store
            .get(&QueryKey::from("progress").storage_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data, json!({"completed": 3, "total": 10}));
    }

    #[tokio::test]
    async fn test_warm_fetch_failure_keeps_data() {
        let store = Arc::new(MemoryStore::new());
        persisted(&store, "progress", json!({"completed": 2, "total": 10})).await;
        let cache = QueryCache::new(store);

        let query = cache
            .query("progress", || async {
                Err::<Progress, _>(connectivity_error("network unreachable"))
            })
            .await;

        assert_eq!(query.data(), Some(progress(2)));
        assert!(!query.loading());
        assert!(query.refreshing());

        query.settled().await;
        assert_eq!(query.data(), Some(progress(2)));
        assert!(query.is_offline());
        assert!(!query.refreshing());
        let error = query.last_error().unwrap();
        assert_eq!(error.kind, ErrorKind::Connectivity);
    }

    #[tokio::test]
    async fn test_cold_failure_settles() {
        let cache = QueryCache::new(Arc::new(MemoryStore::new()));
        let query = cache
            .query("progress", || async {
                Err::<Progress, _>(anyhow::anyhow!("relation \"lessons\" does not exist"))
            })
            .await;

        query.settled().await;
        let state = query.snapshot();
        assert_eq!(state.data, None);
        assert!(!state.loading);
        assert!(state.is_offline);
        assert_eq!(state.last_error.unwrap().kind, ErrorKind::Fetcher);
    }

    #[tokio::test]
    async fn test_single_flight_refresh() {
        let cache = QueryCache::new(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let query = {
            let calls = calls.clone();
            let gate = gate.clone();
            cache
                .query("progress", move || {
                    let calls = calls.clone();
                    let gate = gate.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        anyhow::Ok(progress(5))
                    }
                })
                .await
        };

        tokio::join!(query.refresh(), query.refresh(), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(query.data(), Some(progress(5)));

        // Once settled, a refresh fetches again
        gate.notify_one();
        query.refresh().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_flight_across_handles() {
        let cache = QueryCache::new(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let fetcher = {
            let calls = calls.clone();
            let gate = gate.clone();
            move || {
                let calls = calls.clone();
                let gate = gate.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    anyhow::Ok(progress(1))
                }
            }
        };

        let first = cache.query("progress", fetcher.clone()).await;
        let second = cache.query("progress", fetcher).await;
        assert!(second.loading());

        gate.notify_one();
        first.settled().await;
        second.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.data(), Some(progress(1)));
    }

    #[tokio::test]
    async fn test_key_isolation() {
        let cache = QueryCache::new(Arc::new(MemoryStore::new()));

        let a = cache.query("a", || async { anyhow::Ok(progress(1)) }).await;
        a.settled().await;
        assert!(cache.snapshot(&QueryKey::from("b")).is_none());

        let b = cache
            .query("b", || async {
                Err::<Progress, _>(connectivity_error("offline"))
            })
            .await;
        b.settled().await;

        assert_eq!(a.data(), Some(progress(1)));
        assert!(!a.is_offline());
        assert_eq!(b.data(), None);
        assert!(b.is_offline());
    }

    #[tokio::test]
    async fn test_persisted_value_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        {
            let cache = QueryCache::new(store.clone());
            let query = cache.query("progress", || async { anyhow::Ok(progress(7)) }).await;
            query.settled().await;
        }

        let gate = Arc::new(Notify::new());
        let cache = QueryCache::new(store);
        let query = {
            let gate = gate.clone();
            cache
                .query("progress", move || {
                    let gate = gate.clone();
                    async move {
                        gate.notified().await;
                        anyhow::Ok(progress(8))
                    }
                })
                .await
        };

        assert_eq!(query.data(), Some(progress(7)));
        assert!(!query.loading());
        assert!(query.refreshing());

        gate.notify_one();
        query.settled().await;
        assert_eq!(query.data(), Some(progress(8)));
    }

    #[tokio::test]
    async fn test_fresh_value_skips_fetch() {
        let store = Arc::new(MemoryStore::new());
        persisted(&store, "progress", json!({"completed": 4, "total": 10})).await;
        let cache = QueryCache::with_options(
            store,
            CacheOptions {
                fresh_for: Duration::from_secs(3600),
                offline_mode: false,
            },
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let query = {
            let calls = calls.clone();
            cache
                .query("progress", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { anyhow::Ok(progress(9)) }
                })
                .await
        };
        query.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(query.data(), Some(progress(4)));

        query.refresh().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(query.data(), Some(progress(9)));
    }

    #[tokio::test]
    async fn test_offline_mode_serves_persisted() {
        let store = Arc::new(MemoryStore::new());
        persisted(&store, "progress", json!({"completed": 2, "total": 10})).await;
        let cache = QueryCache::new(store);
        cache.set_offline_mode(true);

        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { anyhow::Ok(progress(3)) }
            }
        };

        let warm = cache.query("progress", fetcher.clone()).await;
        warm.refresh().await;
        assert_eq!(warm.data(), Some(progress(2)));
        assert!(warm.is_offline());

        let cold = cache.query("other", fetcher).await;
        assert!(!cold.loading());
        assert!(cold.is_offline());
        assert_eq!(cold.data(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cache.set_offline_mode(false);
        warm.refresh().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!warm.is_offline());
        assert_eq!(warm.data(), Some(progress(3)));
    }

    #[tokio::test]
    async fn test_panicking_fetcher_settles() {
        let cache = QueryCache::new(Arc::new(MemoryStore::new()));
        let query = cache
            .query("progress", || async {
                if true {
                    panic!("index out of bounds");
                }
                anyhow::Ok(progress(1))
            })
            .await;

        query.settled().await;
        assert!(!query.loading());
        assert!(query.is_offline());
        assert_eq!(query.last_error().unwrap().kind, ErrorKind::Fetcher);

        // The entry is usable again afterwards
        assert!(cache.snapshot(&QueryKey::from("progress")).is_some());
    }

    #[tokio::test]
    async fn test_cache_ages() {
        let store = Arc::new(MemoryStore::new());
        persisted(&store, "progress", json!(1)).await;
        let cache = QueryCache::new(store);

        let ages = cache.cache_ages().await.unwrap();
        assert_eq!(
            ages.get(&QueryKey::from("progress").storage_key()).map(String::as_str),
            Some("just now")
        );
    }

    /// Store whose reads and/or writes always fail.
    struct BrokenStore {
        fail_get: bool,
        fail_set: bool,
    }

    #[async_trait]
    impl PersistedStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<StoredValue>> {
            if self.fail_get {
                anyhow::bail!("disk unreadable");
            }
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &StoredValue) -> Result<()> {
            if self.fail_set {
                anyhow::bail!("disk full");
            }
            Ok(())
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn keys(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_read_failure_is_a_miss() {
        let cache = QueryCache::new(Arc::new(BrokenStore {
            fail_get: true,
            fail_set: false,
        }));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = {
            let calls = calls.clone();
            cache
                .query("progress", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { anyhow::Ok(progress(6)) }
                })
                .await
        };

        assert_eq!(query.data(), None);
        assert!(query.loading());

        query.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(query.data(), Some(progress(6)));
        assert!(!query.is_offline());
    }

    #[tokio::test]
    async fn test_store_write_failure_keeps_fetched_value() {
        let cache = QueryCache::new(Arc::new(BrokenStore {
            fail_get: false,
            fail_set: true,
        }));
        let query = cache.query("progress", || async { anyhow::Ok(progress(4)) }).await;

        query.settled().await;
        assert_eq!(query.data(), Some(progress(4)));
        assert!(!query.is_offline());
        assert!(query.last_error().is_none());
        assert!(!query.loading());
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_entries() {
        let store = Arc::new(MemoryStore::new());
        persisted(&store, "progress", json!({"completed": 2, "total": 10})).await;
        persisted(&store, "profile", json!(null)).await;
        let cache = QueryCache::new(store.clone());
        let query = cache.query("progress", || async { anyhow::Ok(progress(3)) }).await;
        query.settled().await;

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(store.is_empty().await);
        assert!(cache.snapshot(&QueryKey::from("progress")).is_none());
    }
}
