//! Serde types matching API envelopes (list pages, error bodies).
//!
//! These are kept apart from domain types so the domain stays focused on
//! application needs while deserialization absorbs the shape differences
//! between endpoints.

use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// Error bodies
// ============================================================================

/// Body of a failed request, e.g. `{"detail": "Invalid webhook URL"}` or a
/// validation list `{"detail": [{"loc": [...], "msg": "field required"}]}`.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub detail: Option<Value>,
  pub message: Option<String>,
  pub error: Option<String>,
}

impl ApiErrorBody {
  /// Human-readable message, preferring `detail`.
  pub fn message(&self) -> Option<String> {
    self
      .detail
      .as_ref()
      .and_then(extract_detail)
      .or_else(|| self.message.clone())
      .or_else(|| self.error.clone())
  }
}

fn extract_detail(value: &Value) -> Option<String> {
  if let Some(s) = value.as_str() {
    return Some(s.to_string());
  }

  if let Some(items) = value.as_array() {
    let messages: Vec<String> = items
      .iter()
      .filter_map(|item| {
        let msg = item.get("msg").and_then(|m| m.as_str())?;
        let field = item
          .get("loc")
          .and_then(|l| l.as_array())
          .and_then(|l| l.last())
          .and_then(|f| f.as_str());
        Some(match field {
          Some(field) => format!("{}: {}", field, msg),
          None => msg.to_string(),
        })
      })
      .collect();
    if !messages.is_empty() {
      return Some(messages.join("; "));
    }
  }

  None
}

// ============================================================================
// List responses
// ============================================================================

/// A collection response. Endpoints return either a bare array or an object
/// wrapping the items under one of several names.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
  Bare(Vec<T>),
  Paged(Page<T>),
}

#[derive(Debug, Deserialize)]
pub struct Page<T> {
  #[serde(
    alias = "data",
    alias = "results",
    alias = "tickets",
    alias = "partners",
    alias = "api_keys",
    alias = "subscriptions",
    alias = "templates",
    alias = "logs",
    alias = "invoices"
  )]
  pub items: Vec<T>,
  #[serde(alias = "total_count")]
  pub total: Option<u64>,
  pub page: Option<u64>,
  #[serde(alias = "limit")]
  pub page_size: Option<u64>,
}

impl<T> ListEnvelope<T> {
  pub fn into_items(self) -> Vec<T> {
    match self {
      Self::Bare(items) => items,
      Self::Paged(page) => page.items,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_error_body_string_detail() {
    let body: ApiErrorBody = serde_json::from_value(json!({"detail": "Invalid webhook URL"})).unwrap();
    assert_eq!(body.message().as_deref(), Some("Invalid webhook URL"));
  }

  #[test]
  fn test_error_body_validation_list() {
    let body: ApiErrorBody = serde_json::from_value(json!({
      "detail": [
        {"loc": ["body", "subject"], "msg": "field required"},
        {"loc": ["body", "priority"], "msg": "invalid value"}
      ]
    }))
    .unwrap();
    assert_eq!(
      body.message().as_deref(),
      Some("subject: field required; priority: invalid value")
    );
  }

  #[test]
  fn test_error_body_fallbacks() {
    let body: ApiErrorBody = serde_json::from_value(json!({"message": "Forbidden"})).unwrap();
    assert_eq!(body.message().as_deref(), Some("Forbidden"));
    let body: ApiErrorBody = serde_json::from_value(json!({})).unwrap();
    assert_eq!(body.message(), None);
  }

  #[test]
  fn test_list_envelope_shapes() {
    let bare: ListEnvelope<u32> = serde_json::from_value(json!([1, 2])).unwrap();
    assert_eq!(bare.into_items(), vec![1, 2]);

    let paged: ListEnvelope<u32> =
      serde_json::from_value(json!({"partners": [3], "total": 1, "page": 1})).unwrap();
    assert_eq!(paged.into_items(), vec![3]);

    let subs: ListEnvelope<u32> =
      serde_json::from_value(json!({"subscriptions": [4, 5], "limit": 20})).unwrap();
    assert_eq!(subs.into_items(), vec![4, 5]);
  }
}
