//! Client-side query cache with optimistic mutation support.
//!
//! This module provides:
//! - A process-wide keyed store with request de-duplication (`QueryCache`)
//! - Stale-while-error reads, optionally backed by a persistent snapshot
//! - Optimistic writes with exact rollback (`OptimisticUpdate`)
//! - Atomic post-mutation invalidation (`invalidate_related`)

mod invalidate;
mod key;
mod optimistic;
mod storage;
mod store;
mod traits;

pub use invalidate::invalidate_related;
pub use key::{Filters, QueryKey};
pub use optimistic::{is_provisional_id, merge_patch, provisional_id, OptimisticUpdate, TEMP_ID_PREFIX};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage, StoredQuery};
pub use store::{CacheEntry, CacheEvent, QueryCache, Subscription};
pub use traits::{CacheData, CacheResult, CacheSource, Cacheable};
