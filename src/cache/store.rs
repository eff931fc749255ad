//! Process-wide keyed query cache with request de-duplication.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::storage::{CacheStorage, NoopStorage};
use super::traits::{CacheData, CacheResult};
use crate::api::ApiError;

/// Type-erased cache payload. Values are never mutated in place; writes swap the `Arc`.
pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;

type FlightResult = Result<(AnyData, DateTime<Utc>), ApiError>;
type Flight = Shared<BoxFuture<'static, FlightResult>>;
type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Change notification delivered to subscribers of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// The data under the key changed (fetch, `set`, optimistic write)
  Updated(QueryKey),
  /// The entry was marked stale
  Invalidated(QueryKey),
  /// The entry was evicted
  Removed(QueryKey),
}

impl CacheEvent {
  pub fn key(&self) -> &QueryKey {
    match self {
      Self::Updated(k) | Self::Invalidated(k) | Self::Removed(k) => k,
    }
  }
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<D> {
  pub data: Option<D>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub is_stale: bool,
  pub error: Option<String>,
  pub is_fetching: bool,
}

#[derive(Default)]
struct Slot {
  data: Option<AnyData>,
  fetched_at: Option<DateTime<Utc>>,
  is_stale: bool,
  error: Option<String>,
  in_flight: Option<(u64, Flight)>,
  /// Set when the entry is invalidated while a fetch is running; the
  /// fetch result then lands stale.
  invalidated_in_flight: bool,
}

struct Inner {
  slots: Mutex<HashMap<QueryKey, Slot>>,
  listeners: Mutex<HashMap<QueryKey, Vec<(u64, Listener)>>>,
  next_id: AtomicU64,
  storage: Arc<dyn CacheStorage>,
}

impl Inner {
  fn slots(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
    self.slots.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn listeners(&self) -> MutexGuard<'_, HashMap<QueryKey, Vec<(u64, Listener)>>> {
    self.listeners.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Keyed store mapping query keys to server data.
///
/// Cloning is cheap and yields a handle to the same store. Create one per
/// application (or per test) rather than sharing a global.
pub struct QueryCache {
  inner: Arc<Inner>,
  /// How long fetched data is served without refetching
  stale_time: Duration,
}

impl QueryCache {
  /// Create a new cache with the given persistent storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      inner: Arc::new(Inner {
        slots: Mutex::new(HashMap::new()),
        listeners: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(1),
        storage,
      }),
      stale_time: Duration::ZERO,
    }
  }

  /// Create a cache that keeps nothing beyond process memory.
  pub fn in_memory() -> Self {
    Self::new(Arc::new(NoopStorage))
  }

  /// Set the stale time for fetched data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn stale_time(&self) -> Duration {
    self.stale_time
  }

  fn next_id(&self) -> u64 {
    self.inner.next_id.fetch_add(1, Ordering::Relaxed)
  }

  fn is_expired(&self, fetched_at: Option<DateTime<Utc>>) -> bool {
    match fetched_at {
      // A negative age (clock moved backwards) counts as fresh.
      Some(t) => (Utc::now() - t)
        .to_std()
        .map(|age| age > self.stale_time)
        .unwrap_or(false),
      None => true,
    }
  }

  /// Snapshot of the entry under `key`, if any.
  ///
  /// Data of a different type than `D` reads as `None`.
  pub fn entry<D: CacheData>(&self, key: &QueryKey) -> Option<CacheEntry<D>> {
    let slots = self.inner.slots();
    let slot = slots.get(key)?;
    Some(CacheEntry {
      data: slot.data.as_ref().and_then(downcast::<D>),
      fetched_at: slot.fetched_at,
      is_stale: slot.is_stale || self.is_expired(slot.fetched_at),
      error: slot.error.clone(),
      is_fetching: slot.in_flight.is_some(),
    })
  }

  /// Cached data under `key`, fresh or not.
  pub fn get<D: CacheData>(&self, key: &QueryKey) -> Option<D> {
    self.entry::<D>(key).and_then(|e| e.data)
  }

  /// Write authoritative data: the entry becomes fresh and its error clears.
  pub fn set<D: CacheData>(&self, key: &QueryKey, data: D) {
    let now = Utc::now();
    self.persist(key, &data, now);
    {
      let mut slots = self.inner.slots();
      let slot = slots.entry(key.clone()).or_default();
      slot.data = Some(Arc::new(data));
      slot.fetched_at = Some(now);
      slot.is_stale = false;
      slot.error = None;
    }
    self.notify(vec![CacheEvent::Updated(key.clone())]);
  }

  /// Mark every entry under `prefix` stale. Returns how many were touched.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    self.invalidate_all(std::slice::from_ref(prefix))
  }

  /// Mark every entry under any of `prefixes` stale in one step, so no reader
  /// sees some of them invalidated and others still fresh.
  pub fn invalidate_all(&self, prefixes: &[QueryKey]) -> usize {
    let events: Vec<CacheEvent> = {
      let mut slots = self.inner.slots();
      slots
        .iter_mut()
        .filter(|(key, _)| prefixes.iter().any(|p| key.starts_with(p)))
        .map(|(key, slot)| {
          slot.is_stale = true;
          if slot.in_flight.is_some() {
            slot.invalidated_in_flight = true;
          }
          CacheEvent::Invalidated(key.clone())
        })
        .collect()
    };

    let count = events.len();
    if count > 0 {
      debug!(count, "Invalidated cache entries");
    }
    self.notify(events);
    count
  }

  /// Evict every entry under `prefix`, including persisted copies.
  pub fn remove(&self, prefix: &QueryKey) -> usize {
    let removed: Vec<QueryKey> = {
      let mut slots = self.inner.slots();
      let keys: Vec<QueryKey> = slots
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect();
      for key in &keys {
        slots.remove(key);
      }
      keys
    };

    for key in &removed {
      if let Err(e) = self.inner.storage.remove_query_result(&key.cache_hash()) {
        warn!(key = %key, "Failed to remove persisted query: {}", e);
      }
    }

    let count = removed.len();
    self.notify(removed.into_iter().map(CacheEvent::Removed).collect());
    count
  }

  /// Keys currently cached under `prefix`.
  pub fn keys_matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
    self
      .inner
      .slots()
      .keys()
      .filter(|k| k.starts_with(prefix))
      .cloned()
      .collect()
  }

  pub fn is_fetching(&self, key: &QueryKey) -> bool {
    self
      .inner
      .slots()
      .get(key)
      .map(|s| s.in_flight.is_some())
      .unwrap_or(false)
  }

  /// Register a listener for changes to `key`.
  ///
  /// The listener runs synchronously, after the store lock is released, before
  /// the triggering call returns. Drop the `Subscription` to stop listening.
  pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
  where
    F: Fn(&CacheEvent) + Send + Sync + 'static,
  {
    let id = self.next_id();
    self
      .inner
      .listeners()
      .entry(key.clone())
      .or_default()
      .push((id, Arc::new(listener)));

    Subscription {
      inner: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
    }
  }

  fn notify(&self, events: Vec<CacheEvent>) {
    notify(&self.inner, events);
  }

  fn persist<D: CacheData>(&self, key: &QueryKey, data: &D, fetched_at: DateTime<Utc>) {
    persist(&self.inner, key, data, fetched_at);
  }

  /// Raw payload under `key`. `None` when the key is absent or holds no data.
  pub(crate) fn raw_data(&self, key: &QueryKey) -> Option<AnyData> {
    self.inner.slots().get(key).and_then(|s| s.data.clone())
  }

  /// Swap the payload of an existing entry without touching its freshness.
  ///
  /// Returns `false` (and writes nothing) when the entry was evicted.
  pub(crate) fn replace_data(&self, key: &QueryKey, data: Option<AnyData>) -> bool {
    let replaced = {
      let mut slots = self.inner.slots();
      match slots.get_mut(key) {
        Some(slot) => {
          slot.data = data;
          true
        }
        None => false,
      }
    };

    if replaced {
      self.notify(vec![CacheEvent::Updated(key.clone())]);
    }
    replaced
  }

  /// Read through the cache.
  ///
  /// Fresh data is returned as is. Otherwise a single fetch per key runs on the
  /// runtime; concurrent callers await the same one. When the fetch fails and
  /// the entry still holds data, that data is returned with the error attached
  /// and the entry keeps it (stale-while-error). Without prior data the error
  /// is returned.
  ///
  /// A running fetch is joined unless the entry was invalidated after it
  /// started; then a new fetch replaces it and the older result is discarded.
  pub async fn fetch_query<D, F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
  ) -> Result<CacheResult<D>, ApiError>
  where
    D: CacheData,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<D, ApiError>> + Send + 'static,
  {
    self.read_through(key, fetcher, false).await
  }

  /// Like [`QueryCache::fetch_query`], but always goes to the network. A fetch
  /// already running for `key` is replaced, not joined.
  pub async fn refetch_query<D, F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
  ) -> Result<CacheResult<D>, ApiError>
  where
    D: CacheData,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<D, ApiError>> + Send + 'static,
  {
    self.read_through(key, fetcher, true).await
  }

  async fn read_through<D, F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
    force: bool,
  ) -> Result<CacheResult<D>, ApiError>
  where
    D: CacheData,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<D, ApiError>> + Send + 'static,
  {
    self.hydrate::<D>(key);

    let flight = {
      let mut slots = self.inner.slots();
      let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
        is_stale: true,
        ..Slot::default()
      });

      if !force && !slot.is_stale && !self.is_expired(slot.fetched_at) {
        if let Some(data) = slot.data.as_ref().and_then(downcast::<D>) {
          debug!(key = %key, "Cache hit");
          return Ok(CacheResult::from_cache(data, slot.fetched_at));
        }
      }

      match &slot.in_flight {
        Some((_, flight)) if !force && !slot.invalidated_in_flight => {
          debug!(key = %key, "Joining in-flight fetch");
          flight.clone()
        }
        _ => {
          if slot.in_flight.is_some() {
            debug!(key = %key, "Superseding in-flight fetch");
          }
          let id = self.next_id();
          let flight = spawn_fetch(Arc::clone(&self.inner), key.clone(), id, fetcher());
          slot.in_flight = Some((id, flight.clone()));
          slot.invalidated_in_flight = false;
          debug!(key = %key, "Fetching");
          flight
        }
      }
    };

    match flight.await {
      Ok((data, fetched_at)) => match downcast::<D>(&data) {
        Some(data) => Ok(CacheResult::from_network(data, fetched_at)),
        None => Err(ApiError::Decode(format!(
          "cached value under {} has an unexpected type",
          key
        ))),
      },
      Err(error) => {
        let previous = {
          let slots = self.inner.slots();
          slots
            .get(key)
            .and_then(|s| s.data.as_ref().and_then(downcast::<D>).map(|d| (d, s.fetched_at)))
        };
        match previous {
          Some((data, fetched_at)) => {
            debug!(key = %key, "Fetch failed, serving cached data: {}", error);
            Ok(CacheResult::offline(data, fetched_at, error.to_string()))
          }
          None => Err(error),
        }
      }
    }
  }

  /// Seed an absent entry from persistent storage as stale data.
  fn hydrate<D: CacheData>(&self, key: &QueryKey) {
    if self.inner.slots().contains_key(key) {
      return;
    }

    let stored = match self.inner.storage.get_query_result(&key.cache_hash()) {
      Ok(Some(stored)) => stored,
      Ok(None) => return,
      Err(e) => {
        warn!(key = %key, "Failed to read persisted query: {}", e);
        return;
      }
    };

    let data: D = match serde_json::from_slice(&stored.data) {
      Ok(data) => data,
      Err(e) => {
        warn!(key = %key, "Discarding unreadable persisted query: {}", e);
        return;
      }
    };

    debug!(key = %key, "Hydrated from persistent cache");
    self.inner.slots().entry(key.clone()).or_insert_with(|| Slot {
      data: Some(Arc::new(data)),
      fetched_at: Some(stored.fetched_at),
      is_stale: true,
      ..Slot::default()
    });
  }
}

impl Clone for QueryCache {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      stale_time: self.stale_time,
    }
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::in_memory()
  }
}

/// Spawn the network call so it completes even if every caller goes away.
/// The task writes its own result into the store.
fn spawn_fetch<D, Fut>(inner: Arc<Inner>, key: QueryKey, id: u64, fut: Fut) -> Flight
where
  D: CacheData,
  Fut: Future<Output = Result<D, ApiError>> + Send + 'static,
{
  let task = tokio::spawn(async move {
    let result = fut.await;
    complete_fetch(&inner, &key, id, result)
  });

  async move { task.await.unwrap_or(Err(ApiError::Cancelled)) }
    .boxed()
    .shared()
}

fn complete_fetch<D: CacheData>(
  inner: &Inner,
  key: &QueryKey,
  id: u64,
  result: Result<D, ApiError>,
) -> FlightResult {
  let now = Utc::now();
  match result {
    Ok(data) => {
      let any: AnyData = Arc::new(data.clone());
      let wrote = {
        let mut slots = inner.slots();
        match slots.get_mut(key) {
          Some(slot) if matches!(slot.in_flight, Some((flight_id, _)) if flight_id == id) => {
            slot.data = Some(Arc::clone(&any));
            slot.fetched_at = Some(now);
            slot.is_stale = slot.invalidated_in_flight;
            slot.error = None;
            slot.in_flight = None;
            slot.invalidated_in_flight = false;
            true
          }
          _ => false,
        }
      };

      if wrote {
        persist(inner, key, &data, now);
        notify(inner, vec![CacheEvent::Updated(key.clone())]);
      } else {
        debug!(key = %key, "Fetch superseded or entry evicted, result not cached");
      }
      Ok((any, now))
    }
    Err(error) => {
      let mut slots = inner.slots();
      if let Some(slot) = slots.get_mut(key) {
        if matches!(slot.in_flight, Some((flight_id, _)) if flight_id == id) {
          slot.error = Some(error.to_string());
          slot.in_flight = None;
          slot.invalidated_in_flight = false;
        }
      }
      Err(error)
    }
  }
}

fn persist<D: CacheData>(inner: &Inner, key: &QueryKey, data: &D, fetched_at: DateTime<Utc>) {
  let bytes = match serde_json::to_vec(data) {
    Ok(bytes) => bytes,
    Err(e) => {
      warn!(key = %key, "Failed to serialize query for persistence: {}", e);
      return;
    }
  };
  let result =
    inner
      .storage
      .store_query_result(&key.cache_hash(), &key.to_string(), &bytes, fetched_at);
  if let Err(e) = result {
    warn!(key = %key, "Failed to persist query: {}", e);
  }
}

fn notify(inner: &Inner, events: Vec<CacheEvent>) {
  for event in events {
    let listeners: Vec<Listener> = inner
      .listeners()
      .get(event.key())
      .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
      .unwrap_or_default();
    for listener in listeners {
      listener(&event);
    }
  }
}

pub(crate) fn downcast<D: CacheData>(data: &AnyData) -> Option<D> {
  data.downcast_ref::<D>().cloned()
}

/// Handle returned by [`QueryCache::subscribe`]; unsubscribes on drop.
pub struct Subscription {
  inner: Weak<Inner>,
  key: QueryKey,
  id: u64,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.inner.upgrade() {
      let mut listeners = inner.listeners();
      if let Some(list) = listeners.get_mut(&self.key) {
        list.retain(|(id, _)| *id != self.id);
        if list.is_empty() {
          listeners.remove(&self.key);
        }
      }
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish()
  }
}
