//! Error taxonomy for calls against the administration API.

use thiserror::Error;

/// Errors surfaced by the remote client and by every mutation.
///
/// The type is `Clone` so a single in-flight fetch can hand the same outcome
/// to every reader that was de-duplicated onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
  /// The request never completed (connection refused, DNS, timeout).
  #[error("transport error: {0}")]
  Transport(String),

  /// Non-2xx status without a structured validation message.
  #[error("API error ({status}): {body}")]
  Http { status: u16, body: String },

  /// 4xx response carrying a `detail` message.
  #[error("validation failed ({status}): {detail}")]
  Validation { status: u16, detail: String },

  /// The referenced entity does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// The response body did not match the expected shape.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// The task running the request went away before producing a result.
  #[error("request was cancelled")]
  Cancelled,
}

impl ApiError {
  /// HTTP status carried by the error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } | Self::Validation { status, .. } => Some(*status),
      Self::NotFound(_) => Some(404),
      _ => None,
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound(_))
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, Self::Validation { .. })
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(e: serde_json::Error) -> Self {
    Self::Decode(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_is_exposed() {
    let err = ApiError::Validation {
      status: 422,
      detail: "subject is required".to_string(),
    };
    assert_eq!(err.status(), Some(422));
    assert!(err.is_validation());
    assert_eq!(ApiError::NotFound("/tickets/x".into()).status(), Some(404));
    assert_eq!(ApiError::Transport("refused".into()).status(), None);
  }

  #[test]
  fn test_display_includes_detail() {
    let err = ApiError::Validation {
      status: 400,
      detail: "Invalid webhook URL".to_string(),
    };
    assert_eq!(err.to_string(), "validation failed (400): Invalid webhook URL");
  }
}
