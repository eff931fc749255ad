//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Anything that can live in the query cache: lists, single entities, reports.
///
/// Payloads are serializable so the persistent snapshot can store them.
pub trait CacheData: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheData for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Trait for entities that can be cached and optimistically updated.
///
/// Implementors provide the identifier used to find their slot inside a cached
/// list, so provisional records can be swapped for server records.
pub trait Cacheable: CacheData {
  /// Unique identifier for this entity (ticket id, partner id, ...)
  fn cache_key(&self) -> String;

  /// Entity type name used in logs (e.g., "ticket", "webhook")
  fn entity_type() -> &'static str;
}

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the server
  pub fetched_at: Option<DateTime<Utc>>,
  /// Error from the latest fetch, when serving stale data
  pub error: Option<String>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T, fetched_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: Some(fetched_at),
      error: None,
    }
  }

  /// Create a new cache result from cached data that is still fresh.
  pub fn from_cache(data: T, fetched_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      fetched_at,
      error: None,
    }
  }

  /// Create a result serving previously cached data after a failed fetch.
  pub fn offline(data: T, fetched_at: Option<DateTime<Utc>>, error: String) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      fetched_at,
      error: Some(error),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network fetch failed, serving the last known-good data
  Offline,
}
