//! Post-mutation invalidation.

use tracing::debug;

use super::key::QueryKey;
use super::store::QueryCache;

/// Mark every entry under any of `keys` stale after a mutation settles.
///
/// All keys flip in one step, so a reader never sees a detail entry
/// invalidated while its parent list is still fresh. Nothing is refetched
/// here; mounted observers react to the notification, everything else
/// refetches on its next read.
pub fn invalidate_related(cache: &QueryCache, keys: &[QueryKey]) -> usize {
  let count = cache.invalidate_all(keys);
  debug!(
    prefixes = keys.len(),
    entries = count,
    "Invalidated queries related to mutation"
  );
  count
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheEvent;
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  #[test]
  fn test_list_and_detail_flip_together() {
    let cache = QueryCache::in_memory().with_stale_time(Duration::from_secs(300));
    let list = QueryKey::new("ticketing").with("list");
    let filtered = list.clone().with("status=open");
    let detail = QueryKey::new("ticketing").with("detail").with("ticket_1");
    cache.set(&filtered, vec![1u8]);
    cache.set(&detail, 1u8);

    // Observe the list from inside the detail notification: by then both are stale.
    let observed = Arc::new(Mutex::new(None));
    let probe = cache.clone();
    let sink = Arc::clone(&observed);
    let filtered_key = filtered.clone();
    let _sub = cache.subscribe(&detail, move |event| {
      if matches!(event, CacheEvent::Invalidated(_)) {
        let stale = probe.entry::<Vec<u8>>(&filtered_key).map(|e| e.is_stale);
        *sink.lock().unwrap() = stale;
      }
    });

    assert_eq!(invalidate_related(&cache, &[detail.clone(), list.clone()]), 2);
    assert_eq!(*observed.lock().unwrap(), Some(true));
    assert!(cache.entry::<u8>(&detail).unwrap().is_stale);
  }

  #[test]
  fn test_unknown_keys_are_ignored() {
    let cache = QueryCache::in_memory();
    assert_eq!(invalidate_related(&cache, &[QueryKey::new("webhooks")]), 0);
  }
}
