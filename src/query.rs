//! Reactive read observer over the query cache.
//!
//! Inspired by TanStack Query, a `Query<T>` binds a cache key to a fetcher and
//! tracks loading, data and error for one consumer. While the observer is
//! alive ("mounted") it reacts to cache changes: an invalidated key is
//! refetched on the next `poll`, even when the invalidation lands while the
//! observer's own fetch is still running, and optimistic writes show up
//! immediately.
//!
//! # Example
//!
//! ```ignore
//! let mut query = client.tickets().list(Filters::new().with("status", "open"));
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.status() {
//!     QueryStatus::Loading => render_spinner(),
//!     QueryStatus::Success => render_data(query.data()),
//!     QueryStatus::Error => render_error(query.error(), query.data()),
//!     QueryStatus::Idle => {}
//! }
//! ```

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::api::ApiError;
use crate::cache::{CacheData, CacheEvent, CacheResult, CacheSource, QueryCache, QueryKey, Subscription};

/// The status of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Query has not been started (or is disabled)
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Latest fetch succeeded
  Success,
  /// Latest fetch failed; earlier data may still be available
  Error,
}

const UPDATED: u8 = 0b001;
const INVALIDATED: u8 = 0b010;
const REMOVED: u8 = 0b100;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

/// Cache-backed query observer.
pub struct Query<T> {
  cache: QueryCache,
  key: QueryKey,
  fetcher: FetcherFn<T>,
  enabled: bool,
  status: QueryStatus,
  data: Option<T>,
  error: Option<String>,
  source: Option<CacheSource>,
  fetched_at: Option<DateTime<Utc>>,
  receiver: Option<mpsc::UnboundedReceiver<Result<CacheResult<T>, ApiError>>>,
  /// Cache events seen since the last poll
  events: Arc<AtomicU8>,
  refetch_interval: Option<Duration>,
  last_fetch: Option<Instant>,
  _subscription: Subscription,
}

impl<T: CacheData> Query<T> {
  /// Create an observer for `key`. Data already cached under the key is
  /// available immediately; nothing is fetched until `fetch()`.
  pub fn new<F, Fut>(cache: &QueryCache, key: QueryKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let events = Arc::new(AtomicU8::new(0));
    let sink = Arc::clone(&events);
    let subscription = cache.subscribe(&key, move |event| {
      let bit = match event {
        CacheEvent::Updated(_) => UPDATED,
        CacheEvent::Invalidated(_) => INVALIDATED,
        CacheEvent::Removed(_) => REMOVED,
      };
      sink.fetch_or(bit, Ordering::SeqCst);
    });

    let entry = cache.entry::<T>(&key);
    Self {
      cache: cache.clone(),
      data: entry.as_ref().and_then(|e| e.data.clone()),
      fetched_at: entry.as_ref().and_then(|e| e.fetched_at),
      key,
      fetcher: Box::new(move || fetcher().boxed()),
      enabled: true,
      status: QueryStatus::Idle,
      error: None,
      source: None,
      receiver: None,
      events,
      refetch_interval: None,
      last_fetch: None,
      _subscription: subscription,
    }
  }

  /// Enable or disable the observer. A disabled query never fetches.
  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  /// Refetch on `poll` once this much time passed since the last fetch.
  pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
    self.refetch_interval = Some(interval);
    self
  }

  pub fn set_enabled(&mut self, enabled: bool) {
    self.enabled = enabled;
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  /// Latest known data, kept across failed refetches.
  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  /// Error message from the latest fetch.
  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
    self.fetched_at
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Start fetching if enabled and not already loading.
  ///
  /// Fresh cached data satisfies the fetch without a network call.
  pub fn fetch(&mut self) {
    if !self.enabled || self.is_loading() {
      return;
    }
    self.start_fetch(false);
  }

  /// Force a network fetch, even if the cached data is fresh. A fetch that is
  /// already running is replaced rather than joined.
  pub fn refetch(&mut self) {
    if !self.enabled {
      return;
    }
    self.start_fetch(true);
  }

  /// Collect finished fetches and react to cache changes.
  ///
  /// Returns `true` if anything visible changed. Call this in your event loop
  /// tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_receiver();

    let events = self.events.swap(0, Ordering::SeqCst);
    if events & REMOVED != 0 && self.cache.entry::<T>(&self.key).is_none() {
      self.data = None;
      changed = true;
    } else if events & UPDATED != 0 {
      if let Some(data) = self.cache.get::<T>(&self.key) {
        self.data = Some(data);
        changed = true;
      }
    }

    if self.enabled {
      // A running fetch may predate the invalidation; the cache starts a new
      // one in its place.
      if events & INVALIDATED != 0 {
        self.start_fetch(false);
        changed = true;
      } else if self.receiver.is_none() && self.interval_elapsed() {
        self.start_fetch(true);
        changed = true;
      }
    }

    changed
  }

  fn interval_elapsed(&self) -> bool {
    match (self.refetch_interval, self.last_fetch) {
      (Some(interval), Some(last)) => last.elapsed() >= interval,
      _ => false,
    }
  }

  fn poll_receiver(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(result) => self.finish(Some(result)),
      Err(mpsc::error::TryRecvError::Empty) => return false,
      // Sender dropped without sending - treat as error
      Err(mpsc::error::TryRecvError::Disconnected) => self.finish(None),
    }
    true
  }

  /// Wait for the running fetch, if any, and collect it.
  pub async fn settled(&mut self) -> QueryStatus {
    if let Some(rx) = &mut self.receiver {
      let result = rx.recv().await;
      self.finish(result);
    }
    self.status
  }

  fn finish(&mut self, result: Option<Result<CacheResult<T>, ApiError>>) {
    self.receiver = None;
    match result {
      Some(Ok(result)) => {
        self.status = if result.error.is_some() {
          QueryStatus::Error
        } else {
          QueryStatus::Success
        };
        self.data = Some(result.data);
        self.error = result.error;
        self.source = Some(result.source);
        self.fetched_at = result.fetched_at;
      }
      Some(Err(error)) => {
        self.status = QueryStatus::Error;
        self.error = Some(error.to_string());
      }
      None => {
        self.status = QueryStatus::Error;
        self.error = Some(ApiError::Cancelled.to_string());
      }
    }
  }

  /// Internal: start the fetch operation. `force` skips fresh cached data and
  /// replaces any fetch already running for the key.
  fn start_fetch(&mut self, force: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.status = QueryStatus::Loading;
    self.last_fetch = Some(Instant::now());

    let cache = self.cache.clone();
    let key = self.key.clone();
    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = if force {
        cache.refetch_query(&key, move || future).await
      } else {
        cache.fetch_query(&key, move || future).await
      };
      // Ignore send errors - the observer may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("status", &self.status)
      .field("enabled", &self.enabled)
      .field("data", &self.data)
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicU32;

  fn key() -> QueryKey {
    QueryKey::new("partners").with("list")
  }

  fn counting_query(cache: &QueryCache, counter: Arc<AtomicU32>) -> Query<u32> {
    Query::new(cache, key(), move || {
      let counter = counter.clone();
      async move { Ok::<_, ApiError>(counter.fetch_add(1, Ordering::SeqCst)) }
    })
  }

  #[tokio::test]
  async fn test_query_success() {
    let cache = QueryCache::in_memory();
    let mut query = Query::new(&cache, key(), || async { Ok::<_, ApiError>(vec![1, 2, 3]) });

    assert_eq!(query.status(), QueryStatus::Idle);

    query.fetch();
    assert!(query.is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
    assert_eq!(cache.get::<Vec<i32>>(&key()), Some(vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let cache = QueryCache::in_memory();
    let mut query: Query<i32> = Query::new(&cache, key(), || async {
      Err(ApiError::Http {
        status: 500,
        body: "Something went wrong".to_string(),
      })
    });

    query.fetch();
    assert_eq!(query.settled().await, QueryStatus::Error);
    assert_eq!(query.error(), Some("API error (500): Something went wrong"));
    assert!(query.data().is_none());
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let cache = QueryCache::in_memory();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut query = Query::new(&cache, key(), move || {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, ApiError>(42)
      }
    });

    query.fetch();
    assert!(query.is_loading());

    // Second fetch should be no-op
    query.fetch();
    query.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_disabled_query_never_fetches() {
    let cache = QueryCache::in_memory();
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&cache, calls.clone()).with_enabled(false);

    query.fetch();
    query.refetch();
    cache.invalidate(&key());
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    assert_eq!(query.status(), QueryStatus::Idle);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_invalidation_refetches_mounted_query() {
    let cache = QueryCache::in_memory().with_stale_time(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&cache, calls.clone());

    query.fetch();
    query.settled().await;
    assert_eq!(query.data(), Some(&0));

    cache.invalidate(&QueryKey::new("partners"));
    assert!(query.poll());
    assert!(query.is_loading());
    query.settled().await;

    assert_eq!(query.data(), Some(&1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  fn slow_counting_query(cache: &QueryCache, counter: Arc<AtomicU32>) -> Query<u32> {
    Query::new(cache, key(), move || {
      let counter = counter.clone();
      async move {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, ApiError>(n)
      }
    })
  }

  #[tokio::test]
  async fn test_invalidation_during_fetch_is_refetched() {
    let cache = QueryCache::in_memory().with_stale_time(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = slow_counting_query(&cache, calls.clone());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(5)).await;
    cache.invalidate(&QueryKey::new("partners"));

    assert!(query.poll());
    assert!(query.is_loading());
    query.settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(query.data(), Some(&1));
    assert!(!cache.entry::<u32>(&key()).unwrap().is_stale);
  }

  #[tokio::test]
  async fn test_invalidation_during_fetch_is_refetched_after_settling() {
    let cache = QueryCache::in_memory().with_stale_time(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = slow_counting_query(&cache, calls.clone());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(5)).await;
    cache.invalidate(&QueryKey::new("partners"));

    // The first fetch finishes before the observer looks at its events.
    query.settled().await;
    assert_eq!(query.data(), Some(&0));

    assert!(query.poll());
    query.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_refetch_while_loading_sends_new_request() {
    let cache = QueryCache::in_memory().with_stale_time(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = slow_counting_query(&cache, calls.clone());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(5)).await;
    query.refetch();
    query.settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(query.data(), Some(&1));
    // The first response arrives later and must not replace the newer one.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(cache.get::<u32>(&key()), Some(1));
  }

  #[tokio::test]
  async fn test_refetch_bypasses_fresh_cache() {
    let cache = QueryCache::in_memory().with_stale_time(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&cache, calls.clone());

    query.fetch();
    query.settled().await;
    query.fetch();
    query.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    query.refetch();
    query.settled().await;
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_data() {
    let cache = QueryCache::in_memory();
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = fail.clone();
    let mut query = Query::new(&cache, key(), move || {
      let fail = flag.load(Ordering::SeqCst);
      async move {
        if fail {
          Err(ApiError::Transport("offline".into()))
        } else {
          Ok(vec!["acme".to_string()])
        }
      }
    });

    query.fetch();
    query.settled().await;
    fail.store(true, Ordering::SeqCst);
    query.refetch();

    assert_eq!(query.settled().await, QueryStatus::Error);
    assert_eq!(query.data(), Some(&vec!["acme".to_string()]));
    assert_eq!(query.source(), Some(CacheSource::Offline));
    assert_eq!(query.error(), Some("transport error: offline"));
  }

  #[tokio::test]
  async fn test_cache_writes_show_up_on_poll() {
    let cache = QueryCache::in_memory();
    let mut query: Query<u32> = counting_query(&cache, Arc::new(AtomicU32::new(0)));

    cache.set(&key(), 99u32);
    assert!(query.poll());
    assert_eq!(query.data(), Some(&99));

    cache.remove(&key());
    assert!(query.poll());
    assert!(query.data().is_none());
  }

  #[tokio::test]
  async fn test_refetch_interval_polls() {
    let cache = QueryCache::in_memory().with_stale_time(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut query =
      counting_query(&cache, calls.clone()).with_refetch_interval(Duration::from_millis(10));

    query.fetch();
    query.settled().await;
    query.poll();
    assert!(!query.is_loading());

    tokio::time::sleep(Duration::from_millis(15)).await;
    assert!(query.poll());
    query.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_existing_cache_data_is_visible_immediately() {
    let cache = QueryCache::in_memory();
    cache.set(&key(), 5u32);
    let query: Query<u32> = counting_query(&cache, Arc::new(AtomicU32::new(0)));
    assert_eq!(query.data(), Some(&5));
  }
}
