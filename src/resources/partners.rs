use chrono::Utc;

use super::{MutableResource, Resource};
use crate::api::types::{CreatePartner, Partner, PartnerStatus, UpdatePartner};
use crate::cache::{Cacheable, Filters};

impl Cacheable for Partner {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "partner"
  }
}

impl Resource for Partner {
  const NAMESPACE: &'static str = "partners";
  const PATH: &'static str = "/partners";
}

impl MutableResource for Partner {
  type Create = CreatePartner;
  type Update = UpdatePartner;
  type Created = Partner;

  fn provisional(input: &CreatePartner, temp_id: String) -> Self {
    let now = Utc::now();
    Partner {
      id: temp_id,
      partner_number: None,
      company_name: input.company_name.clone(),
      legal_name: input.legal_name.clone(),
      status: PartnerStatus::Pending,
      tier: input.tier.clone(),
      primary_email: Some(input.primary_email.clone()),
      billing_email: None,
      phone: input.phone.clone(),
      commission_model: input.commission_model.clone(),
      default_commission_rate: input.default_commission_rate,
      total_customers: 0,
      created_at: Some(now),
      updated_at: Some(now),
    }
  }

  fn from_created(created: &Partner) -> Self {
    created.clone()
  }
}

#[derive(Debug, Clone, Default)]
pub struct PartnerFilters {
  pub status: Option<PartnerStatus>,
  pub tier: Option<String>,
  pub search: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

impl From<PartnerFilters> for Filters {
  fn from(f: PartnerFilters) -> Self {
    Filters::new()
      .with_opt("status", f.status)
      .with_opt("tier", f.tier)
      .with_opt("search", f.search)
      .with_opt("page", f.page)
      .with_opt("limit", f.limit)
  }
}
