//! Transport seam between the typed client and the network.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::api_types::ApiErrorBody;
use super::error::ApiError;
use crate::cache::Filters;
use crate::config::ApiConfig;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }
}

/// A JSON request against the REST API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the API base URL, e.g. `/tickets/ticket_1`
  pub path: String,
  pub query: Filters,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Filters::new(),
      body: None,
    }
  }

  pub fn with_query(mut self, query: Filters) -> Self {
    self.query = query;
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }
}

/// Sends requests and returns raw JSON bodies.
///
/// Empty response bodies come back as `Value::Null`. Timeouts and retries, if
/// any, belong to the implementation.
pub trait Transport: Clone + Send + Sync + 'static {
  fn send(&self, request: ApiRequest) -> impl Future<Output = Result<Value, ApiError>> + Send;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
  base_url: Url,
  token: Option<String>,
  tenant_id: Option<String>,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self, ApiError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {}", e)))?;

    // A trailing slash makes `join` append rather than replace the last segment.
    let mut base = config.url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url = Url::parse(&base)
      .map_err(|e| ApiError::Transport(format!("invalid API url {}: {}", config.url, e)))?;

    Ok(Self {
      client,
      base_url,
      token,
      tenant_id: config.tenant_id.clone(),
    })
  }

  /// Resolve a request path and query string against the base URL.
  pub fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
    let mut url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| ApiError::Transport(format!("invalid path {}: {}", request.path, e)))?;

    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(request.query.iter());
    }
    Ok(url)
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: ApiRequest) -> impl Future<Output = Result<Value, ApiError>> + Send {
    let this = self.clone();
    async move {
      let url = this.url_for(&request)?;
      debug!(method = request.method.as_str(), %url, "Sending request");

      let mut req = match request.method {
        Method::Get => this.client.get(url),
        Method::Post => this.client.post(url),
        Method::Patch => this.client.patch(url),
        Method::Delete => this.client.delete(url),
      };
      if let Some(token) = &this.token {
        req = req.bearer_auth(token);
      }
      if let Some(tenant) = &this.tenant_id {
        req = req.header("X-Tenant-ID", tenant);
      }
      if let Some(body) = &request.body {
        req = req.json(body);
      }

      let response = req
        .send()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;

      let status = response.status();
      let body = response
        .text()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;

      if status.is_success() {
        if body.trim().is_empty() {
          return Ok(Value::Null);
        }
        return serde_json::from_str(&body).map_err(ApiError::from);
      }

      Err(error_for_status(status, &request.path, body))
    }
  }
}

/// Map a non-2xx response onto the error taxonomy.
pub fn error_for_status(status: StatusCode, path: &str, body: String) -> ApiError {
  let detail = serde_json::from_str::<ApiErrorBody>(&body)
    .ok()
    .and_then(|b| b.message());

  match (status.as_u16(), detail) {
    (404, _) => ApiError::NotFound(path.to_string()),
    (code @ (400 | 409 | 422), Some(detail)) => ApiError::Validation {
      status: code,
      detail,
    },
    (code, _) => ApiError::Http { status: code, body },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn transport(url: &str) -> HttpTransport {
    let config = ApiConfig {
      url: url.to_string(),
      tenant_id: Some("tenant-1".to_string()),
      timeout_secs: 5,
    };
    HttpTransport::new(&config, None).unwrap()
  }

  #[test]
  fn test_url_keeps_base_path() {
    let t = transport("https://isp.example.net/api/v1");
    let req = ApiRequest::new(Method::Get, "/tickets/ticket_1");
    assert_eq!(
      t.url_for(&req).unwrap().as_str(),
      "https://isp.example.net/api/v1/tickets/ticket_1"
    );
  }

  #[test]
  fn test_url_encodes_filters_in_canonical_order() {
    let t = transport("https://isp.example.net/api/v1/");
    let req = ApiRequest::new(Method::Get, "/partners")
      .with_query(Filters::new().with("status", "active").with("search", "acme co"));
    assert_eq!(
      t.url_for(&req).unwrap().as_str(),
      "https://isp.example.net/api/v1/partners?search=acme+co&status=active"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    let config = ApiConfig {
      url: "not a url".to_string(),
      tenant_id: None,
      timeout_secs: 5,
    };
    assert!(matches!(
      HttpTransport::new(&config, None),
      Err(ApiError::Transport(_))
    ));
  }

  #[test]
  fn test_status_mapping() {
    let not_found = error_for_status(StatusCode::NOT_FOUND, "/tickets/x", String::new());
    assert_eq!(not_found, ApiError::NotFound("/tickets/x".to_string()));

    let validation = error_for_status(
      StatusCode::UNPROCESSABLE_ENTITY,
      "/tickets",
      r#"{"detail":"subject is required"}"#.to_string(),
    );
    assert_eq!(
      validation,
      ApiError::Validation {
        status: 422,
        detail: "subject is required".to_string()
      }
    );

    let server = error_for_status(
      StatusCode::INTERNAL_SERVER_ERROR,
      "/tickets",
      "boom".to_string(),
    );
    assert_eq!(
      server,
      ApiError::Http {
        status: 500,
        body: "boom".to_string()
      }
    );

    // A 400 without a structured detail stays a plain HTTP error
    let bare = error_for_status(StatusCode::BAD_REQUEST, "/tickets", "bad".to_string());
    assert!(matches!(bare, ApiError::Http { status: 400, .. }));
  }
}
