use super::Resource;
use crate::api::types::{Invoice, InvoiceStatus};
use crate::cache::{Cacheable, Filters};

impl Cacheable for Invoice {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "invoice"
  }
}

impl Resource for Invoice {
  const NAMESPACE: &'static str = "billing";
  const PATH: &'static str = "/billing/invoices";
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilters {
  pub status: Option<InvoiceStatus>,
  pub tenant_id: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

impl From<InvoiceFilters> for Filters {
  fn from(f: InvoiceFilters) -> Self {
    Filters::new()
      .with_opt("status", f.status)
      .with_opt("tenant_id", f.tenant_id)
      .with_opt("page", f.page)
      .with_opt("limit", f.limit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{ApiError, Method};
  use crate::resources::Keys;
  use crate::testing::admin_client;
  use serde_json::json;

  #[tokio::test]
  async fn test_overdue_invoices() {
    let (mock, client) = admin_client();
    mock.respond(
      Method::Get,
      "/billing/invoices",
      json!({
        "invoices": [
          { "invoice_id": "inv-7", "status": "overdue", "total_amount": 4999, "amount_due": 4999 }
        ],
        "total_count": 1
      }),
    );
    let filters: Filters = InvoiceFilters {
      status: Some(InvoiceStatus::Overdue),
      tenant_id: Some("tenant-1".into()),
      ..Default::default()
    }
    .into();

    let result = client.invoices().fetch_list(&filters).await.unwrap();
    assert_eq!(result.data[0].id, "inv-7");
    assert_eq!(result.data[0].currency, "USD");
    assert_eq!(mock.calls()[0].query.get("tenant_id"), Some("tenant-1"));
  }

  #[tokio::test]
  async fn test_missing_invoice_is_not_cached() {
    let (_mock, client) = admin_client();

    let err = client.invoices().fetch_detail("inv-404").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err, ApiError::NotFound("/billing/invoices/inv-404".into()));
    assert!(client.cache().get::<Invoice>(&Keys::<Invoice>::detail("inv-404")).is_none());
  }
}
