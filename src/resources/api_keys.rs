use chrono::Utc;

use super::{MutableResource, Resource, ResourceClient};
use crate::api::types::{ApiKey, ApiKeyCreated, CreateApiKey, UpdateApiKey};
use crate::api::{ApiError, Transport};
use crate::cache::{Cacheable, Filters};

impl Cacheable for ApiKey {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "api_key"
  }
}

impl Resource for ApiKey {
  const NAMESPACE: &'static str = "api-keys";
  const PATH: &'static str = "/auth/api-keys";
}

impl MutableResource for ApiKey {
  type Create = CreateApiKey;
  type Update = UpdateApiKey;
  type Created = ApiKeyCreated;

  fn provisional(input: &CreateApiKey, temp_id: String) -> Self {
    ApiKey {
      id: temp_id,
      name: input.name.clone(),
      scopes: input.scopes.clone(),
      description: input.description.clone(),
      prefix: None,
      is_active: true,
      created_at: Some(Utc::now()),
      expires_at: input.expires_at,
      last_used_at: None,
    }
  }

  // The secret is returned to the caller only, never cached.
  fn from_created(created: &ApiKeyCreated) -> Self {
    created.key.clone()
  }
}

#[derive(Debug, Clone, Default)]
pub struct ApiKeyFilters {
  pub is_active: Option<bool>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

impl From<ApiKeyFilters> for Filters {
  fn from(f: ApiKeyFilters) -> Self {
    Filters::new()
      .with_opt("is_active", f.is_active)
      .with_opt("page", f.page)
      .with_opt("limit", f.limit)
  }
}

impl<T: Transport> ResourceClient<ApiKey, T> {
  pub async fn rename(&self, id: &str, name: &str) -> Result<ApiKey, ApiError> {
    self
      .update(
        id,
        UpdateApiKey {
          name: Some(name.to_string()),
          ..Default::default()
        },
      )
      .await
  }

  /// Revoking is a delete on the key resource.
  pub async fn revoke(&self, id: &str) -> Result<(), ApiError> {
    self.delete(id).await
  }
}
