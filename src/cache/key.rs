//! Query keys and filter objects.
//!
//! A key is an ordered list of segments such as `["ticketing", "detail", "ticket_1"]`.
//! Keys are pure functions of their inputs, so invalidation can work by prefix.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Filter parameters folded into list keys and sent as query-string pairs.
///
/// Backed by a `BTreeMap` so iteration order, and therefore the canonical
/// form, never depends on insertion order. Empty values are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filters(BTreeMap<String, String>);

impl Filters {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a parameter. Blank values are ignored.
  pub fn with(mut self, name: &str, value: impl ToString) -> Self {
    self.insert(name, value);
    self
  }

  /// Add a parameter only when a value is present.
  pub fn with_opt<V: ToString>(self, name: &str, value: Option<V>) -> Self {
    match value {
      Some(v) => self.with(name, v),
      None => self,
    }
  }

  pub fn insert(&mut self, name: &str, value: impl ToString) {
    let value = value.to_string();
    if value.trim().is_empty() {
      return;
    }
    self.0.insert(name.to_string(), value);
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Canonical `k1=v1&k2=v2` form, sorted by name.
  pub fn canonical(&self) -> String {
    self
      .0
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect::<Vec<_>>()
      .join("&")
  }
}

/// Deterministic identifier for a cached collection or item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  segments: Vec<String>,
}

impl QueryKey {
  /// Start a key in the given resource namespace.
  pub fn new(namespace: &str) -> Self {
    Self {
      segments: vec![namespace.to_string()],
    }
  }

  /// Append a segment (operation name, entity id, ...).
  pub fn with(mut self, segment: impl Into<String>) -> Self {
    self.segments.push(segment.into());
    self
  }

  /// Append the canonical form of a filter object. Empty filters add nothing,
  /// so `list` and `list` with no filters are the same key.
  pub fn with_filters(self, filters: &Filters) -> Self {
    if filters.is_empty() {
      self
    } else {
      self.with(filters.canonical())
    }
  }

  pub fn namespace(&self) -> &str {
    &self.segments[0]
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  /// True when `prefix` matches the leading segments of this key.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.segments.starts_with(&prefix.segments)
  }

  /// SHA256 of the canonical form, for stable fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.segments.join("/"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_filters_are_order_independent() {
    let a = Filters::new().with("status", "open").with("priority", "high");
    let b = Filters::new().with("priority", "high").with("status", "open");
    assert_eq!(a, b);
    assert_eq!(a.canonical(), "priority=high&status=open");
    assert_eq!(
      QueryKey::new("ticketing").with("list").with_filters(&a),
      QueryKey::new("ticketing").with("list").with_filters(&b)
    );
  }

  #[test]
  fn test_blank_and_missing_values_are_skipped() {
    let filters = Filters::new()
      .with("search", "  ")
      .with_opt::<&str>("status", None)
      .with_opt("page", Some(2));
    assert_eq!(filters.canonical(), "page=2");
  }

  #[test]
  fn test_empty_filters_do_not_change_key() {
    let key = QueryKey::new("partners").with("list");
    assert_eq!(key.clone().with_filters(&Filters::new()), key);
  }

  #[test]
  fn test_prefix_matching() {
    let list = QueryKey::new("ticketing").with("list");
    let filtered = list.clone().with_filters(&Filters::new().with("status", "open"));
    let detail = QueryKey::new("ticketing").with("detail").with("ticket_1");

    assert!(filtered.starts_with(&list));
    assert!(!detail.starts_with(&list));
    assert!(detail.starts_with(&QueryKey::new("ticketing")));
    assert!(!list.starts_with(&filtered));
  }

  #[test]
  fn test_cache_hash_is_stable() {
    let key = QueryKey::new("webhooks").with("list").with("limit=10&page=1");
    assert_eq!(key.cache_hash(), key.clone().cache_hash());
    assert_eq!(key.cache_hash().len(), 64);
    assert_ne!(key.cache_hash(), QueryKey::new("webhooks").cache_hash());
  }
}
