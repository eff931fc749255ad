use chrono::Utc;

use super::{Keys, MutableResource, Resource, ResourceClient};
use crate::api::types::{CreateWebhook, UpdateWebhook, Webhook, WebhookTestResult};
use crate::api::{ApiError, Transport};
use crate::cache::{CacheResult, Cacheable, Filters};
use crate::mutation::{run_detached, OptimisticMutation};

impl Cacheable for Webhook {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "webhook"
  }
}

impl Resource for Webhook {
  const NAMESPACE: &'static str = "webhooks";
  const PATH: &'static str = "/webhooks/subscriptions";
}

impl MutableResource for Webhook {
  type Create = CreateWebhook;
  type Update = UpdateWebhook;
  type Created = Webhook;

  fn provisional(input: &CreateWebhook, temp_id: String) -> Self {
    let now = Utc::now();
    Webhook {
      id: temp_id,
      url: input.url.clone(),
      events: input.events.clone(),
      description: input.description.clone(),
      is_active: true,
      success_count: 0,
      failure_count: 0,
      last_triggered_at: None,
      created_at: Some(now),
      updated_at: Some(now),
    }
  }

  fn from_created(created: &Webhook) -> Self {
    created.clone()
  }
}

#[derive(Debug, Clone, Default)]
pub struct WebhookFilters {
  pub is_active: Option<bool>,
  pub event_type: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

impl From<WebhookFilters> for Filters {
  fn from(f: WebhookFilters) -> Self {
    Filters::new()
      .with_opt("is_active", f.is_active)
      .with_opt("event_type", f.event_type)
      .with_opt("page", f.page)
      .with_opt("limit", f.limit)
  }
}

impl<T: Transport> ResourceClient<Webhook, T> {
  /// One page of subscriptions. Concurrent calls for the same page share a request.
  pub async fn fetch_webhooks(
    &self,
    page: u32,
    limit: u32,
  ) -> Result<CacheResult<Vec<Webhook>>, ApiError> {
    let filters: Filters = WebhookFilters {
      page: Some(page),
      limit: Some(limit),
      ..Default::default()
    }
    .into();
    self.fetch_list(&filters).await
  }

  /// Ask the backend to deliver a test event to the subscription.
  pub async fn test_delivery(&self, id: &str) -> Result<WebhookTestResult, ApiError> {
    let api = self.api.clone();
    let path = format!("{}/test", Webhook::item_path(id));

    // Delivery counters change, nothing to show optimistically.
    let mutation = OptimisticMutation::<Webhook, _, _> {
      cache: self.cache.clone(),
      label: "test_delivery",
      update: None,
      call: async move { api.post::<_, WebhookTestResult>(&path, &serde_json::json!({})).await },
      reconcile: |_: &WebhookTestResult| None,
      invalidate: vec![Keys::<Webhook>::detail(id), Keys::<Webhook>::lists()],
    };
    run_detached(mutation.run()).await
  }
}
