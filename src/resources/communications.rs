use chrono::Utc;

use super::{MutableResource, Resource};
use crate::api::types::{
  Channel, CommunicationLog, CreateTemplate, DeliveryStatus, Template, UpdateTemplate,
};
use crate::cache::{Cacheable, Filters};

impl Cacheable for Template {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "template"
  }
}

// Templates and logs share a URL prefix; separate namespaces keep their
// cache entries apart.
impl Resource for Template {
  const NAMESPACE: &'static str = "templates";
  const PATH: &'static str = "/communications/templates";
}

impl MutableResource for Template {
  type Create = CreateTemplate;
  type Update = UpdateTemplate;
  type Created = Template;

  fn provisional(input: &CreateTemplate, temp_id: String) -> Self {
    let now = Utc::now();
    Template {
      id: temp_id,
      name: input.name.clone(),
      channel: input.channel.unwrap_or(Channel::Email),
      subject: input.subject.clone(),
      body: input.body.clone(),
      variables: input.variables.clone(),
      is_active: true,
      created_at: Some(now),
      updated_at: Some(now),
    }
  }

  fn from_created(created: &Template) -> Self {
    created.clone()
  }
}

impl Cacheable for CommunicationLog {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "communication_log"
  }
}

impl Resource for CommunicationLog {
  const NAMESPACE: &'static str = "communication-logs";
  const PATH: &'static str = "/communications/logs";
}

#[derive(Debug, Clone, Default)]
pub struct TemplateFilters {
  pub channel: Option<Channel>,
  pub search: Option<String>,
}

impl From<TemplateFilters> for Filters {
  fn from(f: TemplateFilters) -> Self {
    Filters::new()
      .with_opt("channel", f.channel)
      .with_opt("search", f.search)
  }
}

#[derive(Debug, Clone, Default)]
pub struct LogFilters {
  pub channel: Option<Channel>,
  pub status: Option<DeliveryStatus>,
  pub recipient: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

impl From<LogFilters> for Filters {
  fn from(f: LogFilters) -> Self {
    Filters::new()
      .with_opt("channel", f.channel)
      .with_opt("status", f.status)
      .with_opt("recipient", f.recipient)
      .with_opt("page", f.page)
      .with_opt("limit", f.limit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Method;
  use crate::resources::Keys;
  use crate::testing::admin_client;
  use serde_json::json;

  #[tokio::test]
  async fn test_templates_and_logs_do_not_share_entries() {
    let (mock, client) = admin_client();
    mock.respond(
      Method::Get,
      "/communications/templates",
      json!({ "templates": [{ "id": "tpl-1", "name": "Welcome", "channel": "email" }] }),
    );
    mock.respond(
      Method::Get,
      "/communications/logs",
      json!({ "logs": [{
        "id": "log-1", "channel": "sms", "recipient": "+15550100", "status": "delivered"
      }] }),
    );

    let templates = client.templates().fetch_list(&Filters::new()).await.unwrap();
    let logs = client.communication_logs().fetch_list(&Filters::new()).await.unwrap();

    assert_eq!(templates.data[0].name, "Welcome");
    assert_eq!(logs.data[0].status, DeliveryStatus::Delivered);
    assert!(client.cache().get::<Vec<Template>>(&Keys::<Template>::list(&Filters::new())).is_some());
    assert!(client
      .cache()
      .get::<Vec<CommunicationLog>>(&Keys::<CommunicationLog>::list(&Filters::new()))
      .is_some());
  }

  #[tokio::test]
  async fn test_template_rename_is_visible_in_detail() {
    let (mock, client) = admin_client();
    mock.respond(
      Method::Get,
      "/communications/templates/tpl-1",
      json!({ "id": "tpl-1", "name": "Welcome", "channel": "email", "variables": ["first_name"] }),
    );
    mock.respond(
      Method::Patch,
      "/communications/templates/tpl-1",
      json!({ "id": "tpl-1", "name": "Welcome aboard", "channel": "email", "variables": ["first_name"] }),
    );
    let templates = client.templates();
    templates.fetch_detail("tpl-1").await.unwrap();

    mock.hold();
    let mut mutation = templates.update_mutation(
      "tpl-1",
      UpdateTemplate {
        name: Some("Welcome aboard".into()),
        ..Default::default()
      },
    );
    let during: Template = client.cache().get(&Keys::<Template>::detail("tpl-1")).unwrap();
    assert_eq!(during.name, "Welcome aboard");
    assert_eq!(during.variables, vec!["first_name".to_string()]);

    mock.release(1);
    assert!(mutation.settled().await.is_success());
  }

  #[test]
  fn test_log_filters() {
    let filters: Filters = LogFilters {
      channel: Some(Channel::Sms),
      status: Some(DeliveryStatus::Failed),
      ..Default::default()
    }
    .into();
    assert_eq!(filters.canonical(), "channel=sms&status=failed");
  }
}
