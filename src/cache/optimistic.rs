//! Optimistic writes with snapshot rollback.
//!
//! A write is begun against every cached list under a prefix (and optionally a
//! detail entry), then settled exactly once: `commit` swaps in the server's
//! record, `rollback` restores the snapshots. Dropping an unsettled update
//! rolls it back, so provisional data never outlives its mutation.

use chrono::Utc;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::store::{downcast, AnyData, QueryCache};
use super::traits::Cacheable;

/// Prefix of identifiers assigned to records the server hasn't confirmed yet.
pub const TEMP_ID_PREFIX: &str = "temp-";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a temporary identifier (`temp-<millis>-<seq>`).
pub fn provisional_id() -> String {
  format!(
    "{}{}-{}",
    TEMP_ID_PREFIX,
    Utc::now().timestamp_millis(),
    TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
  )
}

pub fn is_provisional_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX)
}

/// Shallow merge of a JSON object patch into an entity.
///
/// Top-level fields in `patch` replace those of the entity; nested objects are
/// replaced whole, not merged. A non-object patch is an error.
pub fn merge_patch<R: Cacheable>(entity: &R, patch: &Value) -> Result<R, serde_json::Error> {
  let mut value = serde_json::to_value(entity)?;
  match (value.as_object_mut(), patch.as_object()) {
    (Some(target), Some(fields)) => {
      for (name, field) in fields {
        target.insert(name.clone(), field.clone());
      }
    }
    _ => {
      return Err(<serde_json::Error as serde::de::Error>::custom(
        "optimistic patch must be a JSON object",
      ))
    }
  }
  serde_json::from_value(value)
}

#[derive(Debug, Clone)]
enum Change {
  Insert { temp_id: String },
  Patch { id: String },
  Remove { id: String },
}

/// An applied, not yet settled, optimistic write.
#[must_use = "an optimistic update is rolled back when dropped unsettled"]
pub struct OptimisticUpdate<R: Cacheable> {
  cache: QueryCache,
  change: Change,
  detail_key: Option<QueryKey>,
  /// Prior data of every entry this update wrote to
  snapshots: Vec<(QueryKey, Option<AnyData>)>,
  settled: bool,
  _entity: PhantomData<fn() -> R>,
}

impl<R: Cacheable> OptimisticUpdate<R> {
  fn begin(cache: &QueryCache, change: Change, detail_key: Option<QueryKey>) -> Self {
    Self {
      cache: cache.clone(),
      change,
      detail_key,
      snapshots: Vec::new(),
      settled: false,
      _entity: PhantomData,
    }
  }

  /// Prepend a provisional record to every cached list under `list_prefix`.
  pub fn insert(cache: &QueryCache, list_prefix: &QueryKey, provisional: R) -> Self {
    let temp_id = provisional.cache_key();
    let mut update = Self::begin(cache, Change::Insert { temp_id }, None);

    update.apply_to_lists(list_prefix, |items| {
      items.insert(0, provisional.clone());
      true
    });

    debug!(
      entity = R::entity_type(),
      lists = update.snapshots.len(),
      "Optimistic insert applied"
    );
    update
  }

  /// Shallow-merge `patch` into the entity `id` in every cached list under
  /// `list_prefix` and in its cached detail entry.
  pub fn patch(
    cache: &QueryCache,
    list_prefix: &QueryKey,
    detail_key: &QueryKey,
    id: &str,
    patch: &Value,
  ) -> Self {
    let mut update = Self::begin(
      cache,
      Change::Patch { id: id.to_string() },
      Some(detail_key.clone()),
    );

    let patch_item = |item: &mut R| match merge_patch(item, patch) {
      Ok(merged) => {
        *item = merged;
        true
      }
      Err(e) => {
        warn!(entity = R::entity_type(), id, "Optimistic patch skipped: {}", e);
        false
      }
    };

    update.apply_to_lists(list_prefix, |items| {
      let mut changed = false;
      for item in items.iter_mut().filter(|i| i.cache_key() == id) {
        changed |= patch_item(item);
      }
      changed
    });

    if let Some(prior) = cache.raw_data(detail_key) {
      if let Some(mut item) = downcast::<R>(&prior) {
        if patch_item(&mut item) && cache.replace_data(detail_key, Some(Arc::new(item))) {
          update.snapshots.push((detail_key.clone(), Some(prior)));
        }
      }
    }

    debug!(
      entity = R::entity_type(),
      id,
      entries = update.snapshots.len(),
      "Optimistic patch applied"
    );
    update
  }

  /// Drop the entity `id` from every cached list under `list_prefix`.
  pub fn remove(cache: &QueryCache, list_prefix: &QueryKey, detail_key: &QueryKey, id: &str) -> Self {
    let mut update = Self::begin(
      cache,
      Change::Remove { id: id.to_string() },
      Some(detail_key.clone()),
    );

    update.apply_to_lists(list_prefix, |items| {
      let before = items.len();
      items.retain(|i| i.cache_key() != id);
      items.len() != before
    });

    debug!(
      entity = R::entity_type(),
      id,
      lists = update.snapshots.len(),
      "Optimistic removal applied"
    );
    update
  }

  /// Run `edit` on every cached `Vec<R>` under the prefix, snapshotting the
  /// ones it changes.
  fn apply_to_lists(&mut self, list_prefix: &QueryKey, mut edit: impl FnMut(&mut Vec<R>) -> bool) {
    for key in self.cache.keys_matching(list_prefix) {
      let Some(prior) = self.cache.raw_data(&key) else {
        continue;
      };
      let Some(mut items) = downcast::<Vec<R>>(&prior) else {
        continue;
      };
      if edit(&mut items) && self.cache.replace_data(&key, Some(Arc::new(items))) {
        self.snapshots.push((key, Some(prior)));
      }
    }
  }

  /// Keys this update wrote to.
  pub fn touched_keys(&self) -> impl Iterator<Item = &QueryKey> {
    self.snapshots.iter().map(|(k, _)| k)
  }

  /// Reconcile with the server's answer.
  ///
  /// Inserts swap the provisional record for `authoritative`, matched by the
  /// temporary id; patches replace the record matched by its real id. A
  /// removal stays applied and evicts the detail entry. Entries evicted since
  /// the update began are skipped.
  pub fn commit(mut self, authoritative: Option<R>) {
    self.settled = true;

    match (&self.change, authoritative) {
      (Change::Insert { temp_id }, Some(record)) => {
        self.reconcile_lists(temp_id, &record);
      }
      (Change::Patch { id }, Some(record)) => {
        self.reconcile_lists(id, &record);
        if let Some(detail_key) = &self.detail_key {
          let holds_entity = self
            .cache
            .raw_data(detail_key)
            .map(|d| d.is::<R>())
            .unwrap_or(false);
          if holds_entity {
            self
              .cache
              .replace_data(detail_key, Some(Arc::new(record.clone())));
          }
        }
      }
      (Change::Remove { .. }, _) => {
        if let Some(detail_key) = &self.detail_key {
          self.cache.remove(detail_key);
        }
      }
      (_, None) => {}
    }

    debug!(entity = R::entity_type(), "Optimistic update committed");
  }

  fn reconcile_lists(&self, match_id: &str, record: &R) {
    for (key, _) in &self.snapshots {
      let Some(current) = self.cache.raw_data(key) else {
        debug!(key = %key, "Entry evicted before commit, skipping");
        continue;
      };
      let Some(mut items) = downcast::<Vec<R>>(&current) else {
        continue;
      };
      let mut replaced = false;
      for item in items.iter_mut().filter(|i| i.cache_key() == match_id) {
        *item = record.clone();
        replaced = true;
      }
      if replaced {
        self.cache.replace_data(key, Some(Arc::new(items)));
      }
    }
  }

  /// Restore the exact pre-write data of every touched entry.
  pub fn rollback(mut self) {
    self.settled = true;
    self.restore();
  }

  fn restore(&self) {
    for (key, prior) in &self.snapshots {
      if !self.cache.replace_data(key, prior.clone()) {
        debug!(key = %key, "Entry evicted before rollback, skipping");
      }
    }
    debug!(
      entity = R::entity_type(),
      entries = self.snapshots.len(),
      "Optimistic update rolled back"
    );
  }
}

impl<R: Cacheable> Drop for OptimisticUpdate<R> {
  fn drop(&mut self) {
    if !self.settled {
      warn!(entity = R::entity_type(), "Optimistic update dropped unsettled, rolling back");
      self.restore();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::{Deserialize, Serialize};
  use serde_json::json;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Item {
    id: String,
    name: String,
    #[serde(default)]
    active: bool,
  }

  impl Cacheable for Item {
    fn cache_key(&self) -> String {
      self.id.clone()
    }

    fn entity_type() -> &'static str {
      "item"
    }
  }

  fn item(id: &str, name: &str) -> Item {
    Item {
      id: id.to_string(),
      name: name.to_string(),
      active: true,
    }
  }

  fn list_prefix() -> QueryKey {
    QueryKey::new("items").with("list")
  }

  fn detail(id: &str) -> QueryKey {
    QueryKey::new("items").with("detail").with(id)
  }

  fn seeded() -> (QueryCache, QueryKey) {
    let cache = QueryCache::in_memory();
    let key = list_prefix();
    cache.set(&key, vec![item("a", "Alpha"), item("b", "Beta")]);
    (cache, key)
  }

  #[test]
  fn test_provisional_ids_are_unique_and_prefixed() {
    let a = provisional_id();
    let b = provisional_id();
    assert_ne!(a, b);
    assert!(is_provisional_id(&a));
    assert!(!is_provisional_id("ticket_1"));
  }

  #[test]
  fn test_merge_patch_is_shallow() {
    let merged = merge_patch(&item("a", "Alpha"), &json!({ "name": "New" })).unwrap();
    assert_eq!(merged, Item { id: "a".into(), name: "New".into(), active: true });
    assert!(merge_patch(&item("a", "Alpha"), &json!(["nope"])).is_err());
  }

  #[test]
  fn test_insert_prepends_then_commit_replaces_provisional() {
    let (cache, key) = seeded();
    let temp = provisional_id();

    let update = OptimisticUpdate::insert(&cache, &list_prefix(), item(&temp, "Draft"));
    let during: Vec<Item> = cache.get(&key).unwrap();
    assert_eq!(during[0].id, temp);
    assert_eq!(during.len(), 3);

    update.commit(Some(item("c", "Draft")));
    let after: Vec<Item> = cache.get(&key).unwrap();
    assert_eq!(after[0], item("c", "Draft"));
    assert!(after.iter().all(|i| !is_provisional_id(&i.id)));
  }

  #[test]
  fn test_insert_rollback_restores_exactly() {
    let (cache, key) = seeded();
    let before: Vec<Item> = cache.get(&key).unwrap();

    let update = OptimisticUpdate::insert(&cache, &list_prefix(), item(&provisional_id(), "Draft"));
    update.rollback();

    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap(), before);
  }

  #[test]
  fn test_insert_reaches_every_filtered_list() {
    let (cache, key) = seeded();
    let filtered = list_prefix().with("active=true");
    cache.set(&filtered, vec![item("a", "Alpha")]);

    let update = OptimisticUpdate::insert(&cache, &list_prefix(), item("temp-1", "Draft"));
    assert_eq!(update.touched_keys().count(), 2);
    assert_eq!(cache.get::<Vec<Item>>(&filtered).unwrap()[0].id, "temp-1");
    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap()[0].id, "temp-1");
    update.rollback();
  }

  #[test]
  fn test_patch_then_commit_uses_server_record() {
    let (cache, key) = seeded();
    cache.set(&detail("a"), item("a", "Alpha"));

    let update = OptimisticUpdate::<Item>::patch(
      &cache,
      &list_prefix(),
      &detail("a"),
      "a",
      &json!({ "name": "Optimistic" }),
    );
    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap()[0].name, "Optimistic");
    assert_eq!(cache.get::<Item>(&detail("a")).unwrap().name, "Optimistic");

    update.commit(Some(item("a", "Server")));
    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap()[0].name, "Server");
    assert_eq!(cache.get::<Item>(&detail("a")).unwrap().name, "Server");
  }

  #[test]
  fn test_patch_rollback_restores_list_and_detail() {
    let (cache, key) = seeded();
    cache.set(&detail("b"), item("b", "Beta"));

    let update = OptimisticUpdate::<Item>::patch(
      &cache,
      &list_prefix(),
      &detail("b"),
      "b",
      &json!({ "active": false }),
    );
    update.rollback();

    assert!(cache.get::<Vec<Item>>(&key).unwrap()[1].active);
    assert_eq!(cache.get::<Item>(&detail("b")).unwrap(), item("b", "Beta"));
  }

  #[test]
  fn test_remove_rollback_and_commit() {
    let (cache, key) = seeded();
    cache.set(&detail("a"), item("a", "Alpha"));

    let update = OptimisticUpdate::<Item>::remove(&cache, &list_prefix(), &detail("a"), "a");
    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap().len(), 1);
    update.rollback();
    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap().len(), 2);

    let update = OptimisticUpdate::<Item>::remove(&cache, &list_prefix(), &detail("a"), "a");
    update.commit(None);
    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap(), vec![item("b", "Beta")]);
    assert!(cache.entry::<Item>(&detail("a")).is_none());
  }

  #[test]
  fn test_settle_after_eviction_is_noop() {
    let (cache, key) = seeded();
    let update = OptimisticUpdate::insert(&cache, &list_prefix(), item("temp-9", "Draft"));
    cache.remove(&list_prefix());

    update.rollback();
    assert!(cache.entry::<Vec<Item>>(&key).is_none());

    let (cache, key) = seeded();
    let update = OptimisticUpdate::insert(&cache, &list_prefix(), item("temp-9", "Draft"));
    cache.remove(&key);
    update.commit(Some(item("c", "Draft")));
    assert!(cache.keys_matching(&list_prefix()).is_empty());
  }

  #[test]
  fn test_unsettled_update_rolls_back_on_drop() {
    let (cache, key) = seeded();
    {
      let _update = OptimisticUpdate::insert(&cache, &list_prefix(), item("temp-2", "Draft"));
      assert_eq!(cache.get::<Vec<Item>>(&key).unwrap().len(), 3);
    }
    assert_eq!(cache.get::<Vec<Item>>(&key).unwrap().len(), 2);
  }

  #[test]
  fn test_provisional_write_keeps_freshness() {
    let (cache, key) = seeded();
    cache.invalidate(&key);
    let update = OptimisticUpdate::insert(&cache, &list_prefix(), item("temp-3", "Draft"));
    assert!(cache.entry::<Vec<Item>>(&key).unwrap().is_stale);
    update.rollback();
  }
}
