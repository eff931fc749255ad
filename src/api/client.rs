use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::api_types::ListEnvelope;
use super::error::ApiError;
use super::transport::{ApiRequest, Method, Transport};
use crate::cache::Filters;

/// Typed JSON client over a [`Transport`].
///
/// Responses are decoded into concrete types here, so a malformed payload is
/// rejected at the boundary instead of reaching the cache.
#[derive(Clone)]
pub struct ApiClient<T: Transport> {
  transport: T,
}

impl<T: Transport> ApiClient<T> {
  pub fn new(transport: T) -> Self {
    Self { transport }
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  /// GET a single object
  pub async fn get<R: DeserializeOwned>(&self, path: &str, query: &Filters) -> Result<R, ApiError> {
    let request = ApiRequest::new(Method::Get, path).with_query(query.clone());
    decode(self.transport.send(request).await?)
  }

  /// GET a collection, accepting bare arrays and paged envelopes
  pub async fn get_list<R: DeserializeOwned>(
    &self,
    path: &str,
    query: &Filters,
  ) -> Result<Vec<R>, ApiError> {
    let envelope: ListEnvelope<R> = self.get(path, query).await?;
    Ok(envelope.into_items())
  }

  pub async fn post<B: Serialize, R: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<R, ApiError> {
    let request = ApiRequest::new(Method::Post, path).with_body(serde_json::to_value(body)?);
    decode(self.transport.send(request).await?)
  }

  pub async fn patch<B: Serialize, R: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<R, ApiError> {
    let request = ApiRequest::new(Method::Patch, path).with_body(serde_json::to_value(body)?);
    decode(self.transport.send(request).await?)
  }

  /// DELETE, ignoring any response body
  pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
    self
      .transport
      .send(ApiRequest::new(Method::Delete, path))
      .await?;
    Ok(())
  }
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R, ApiError> {
  serde_json::from_value(value).map_err(ApiError::from)
}
