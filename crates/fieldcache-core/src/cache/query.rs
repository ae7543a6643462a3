use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::data::age_display;
use super::error::ErrorInfo;
use super::manager::{BoxFetcher, EntrySnapshot, QueryCache, Slot};
use super::QueryKey;

/// What a screen sees of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub key: QueryKey,
    /// Best known value, possibly stale
    pub data: Option<T>,
    /// First fetch in flight and nothing to show yet
    pub loading: bool,
    /// Fetch in flight while `data` is shown
    pub refreshing: bool,
    /// Last fetch failed or the cache is in offline mode
    pub is_offline: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
}

impl<T> QueryState<T> {
    /// "5m ago" style age of `data`, `None` if nothing was ever fetched
    pub fn age_display(&self) -> Option<String> {
        self.fetched_at.map(age_display)
    }
}

impl<T: DeserializeOwned> QueryState<T> {
    fn decode(key: &QueryKey, snapshot: &EntrySnapshot) -> Self {
        let data = snapshot.payload.as_ref().and_then(|payload| {
            match serde_json::from_value(payload.clone()) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value does not match the query type");
                    None
                }
            }
        });

        Self {
            key: key.clone(),
            data,
            loading: snapshot.loading(),
            refreshing: snapshot.refreshing(),
            is_offline: snapshot.is_offline,
            fetched_at: snapshot.fetched_at,
            last_error: snapshot.last_error.clone(),
        }
    }
}

struct Binding {
    key: QueryKey,
    slot: Arc<Slot>,
    fetcher: BoxFetcher,
    forwarder: JoinHandle<()>,
}

/// A screen's handle on one cache entry.
///
/// Reads are synchronous and always reflect the entry the handle is currently
/// bound to. Switching keys with [`set_key`](Self::set_key) rebinds the handle;
/// a fetch still running for the previous key completes into that key's entry
/// and is never observed here.
pub struct CachedQuery<T> {
    cache: QueryCache,
    binding: Mutex<Binding>,
    generation: Arc<AtomicU64>,
    updates: Arc<watch::Sender<QueryState<T>>>,
}

impl<T> CachedQuery<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) async fn open<F, Fut>(cache: QueryCache, key: QueryKey, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fetcher = erase(fetcher);
        let slot = cache.slot(&key);
        cache.seed(&slot).await;

        let initial = QueryState::decode(&key, &slot.state.borrow());
        let (updates, _) = watch::channel(initial);
        let updates = Arc::new(updates);
        let generation = Arc::new(AtomicU64::new(0));
        let forwarder = forward(&key, &slot, &updates, &generation, 0);

        cache.kick(&slot, &fetcher);
        debug!(key = %key, "Query opened");

        Self {
            cache,
            binding: Mutex::new(Binding {
                key,
                slot,
                fetcher,
                forwarder,
            }),
            generation,
            updates,
        }
    }

    /// Point the handle at a different key.
    ///
    /// Same read path as opening: the new entry's persisted value is visible
    /// when this returns and a fetch starts in the background. Passing the
    /// current key only replaces the fetcher.
    pub async fn set_key<F, Fut>(&self, key: impl Into<QueryKey>, fetcher: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let fetcher = erase(fetcher);

        {
            let mut binding = self.binding();
            if binding.key == key {
                binding.fetcher = fetcher;
                return;
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = self.cache.slot(&key);
        self.cache.seed(&slot).await;

        {
            let mut binding = self.binding();
            if self.generation.load(Ordering::SeqCst) != generation {
                // A later set_key won while we were seeding
                return;
            }
            binding.forwarder.abort();
            self.updates
                .send_replace(QueryState::decode(&key, &slot.state.borrow()));
            let forwarder = forward(&key, &slot, &self.updates, &self.generation, generation);
            debug!(from = %binding.key, to = %key, "Query key changed");
            *binding = Binding {
                key,
                slot: slot.clone(),
                fetcher: fetcher.clone(),
                forwarder,
            };
        }

        self.cache.kick(&slot, &fetcher);
    }

    /// Force a revalidation (pull-to-refresh).
    ///
    /// Joins the fetch already in flight for this key rather than starting a
    /// second one. Resolves when the fetch has been applied; failures are
    /// reported through the state, never returned.
    pub async fn refresh(&self) {
        let flight = {
            let binding = self.binding();
            self.cache.refresh(&binding.slot, &binding.fetcher)
        };
        if let Some(flight) = flight {
            flight.await;
        }
    }

    /// Wait for the fetch in flight for the current key, if any, without
    /// starting a new one.
    pub async fn settled(&self) {
        let flight = {
            let binding = self.binding();
            self.cache.inflight(&binding.slot)
        };
        if let Some(flight) = flight {
            flight.await;
        }
    }

    pub fn snapshot(&self) -> QueryState<T> {
        let binding = self.binding();
        let snapshot = binding.slot.state.borrow();
        QueryState::decode(&binding.key, &snapshot)
    }

    pub fn data(&self) -> Option<T> {
        self.snapshot().data
    }

    pub fn loading(&self) -> bool {
        self.binding().slot.state.borrow().loading()
    }

    pub fn refreshing(&self) -> bool {
        self.binding().slot.state.borrow().refreshing()
    }

    pub fn is_offline(&self) -> bool {
        self.binding().slot.state.borrow().is_offline
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.binding().slot.state.borrow().fetched_at
    }

    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.binding().slot.state.borrow().last_error.clone()
    }

    pub fn key(&self) -> QueryKey {
        self.binding().key.clone()
    }

    /// Receive every state change of the entry this handle is bound to,
    /// following key changes.
    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.updates.subscribe()
    }
}

impl<T> CachedQuery<T> {
    fn binding(&self) -> MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for CachedQuery<T> {
    fn drop(&mut self) {
        let binding = self.binding.get_mut().unwrap_or_else(PoisonError::into_inner);
        binding.forwarder.abort();
    }
}

fn erase<T, F, Fut>(fetcher: F) -> BoxFetcher
where
    T: Serialize + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move || {
        let fut = fetcher();
        async move {
            let value = fut.await?;
            serde_json::to_value(&value).context("Failed to serialize fetched value")
        }
        .boxed()
    })
}

/// Copy entry changes into the handle's channel while `generation` is current.
fn forward<T>(
    key: &QueryKey,
    slot: &Slot,
    updates: &Arc<watch::Sender<QueryState<T>>>,
    generation: &Arc<AtomicU64>,
    mine: u64,
) -> JoinHandle<()>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let key = key.clone();
    let mut entry = slot.state.subscribe();
    let updates = updates.clone();
    let generation = generation.clone();

    tokio::spawn(async move {
        // Catch up on anything that landed before the subscription
        loop {
            if generation.load(Ordering::SeqCst) != mine {
                break;
            }
            let state = QueryState::decode(&key, &entry.borrow_and_update());
            // Checked under the channel lock: set_key bumps the generation
            // before it publishes the new key's state.
            let published = updates.send_if_modified(|current| {
                if generation.load(Ordering::SeqCst) != mine {
                    return false;
                }
                *current = state;
                true
            });
            if !published || entry.changed().await.is_err() {
                break;
            }
        }
    })
}
