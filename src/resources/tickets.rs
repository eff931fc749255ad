use chrono::Utc;
use std::future::Future;

use super::{Keys, MutableResource, Resource, ResourceClient};
use crate::api::types::{
  CreateTicket, CreateTicketMessage, Ticket, TicketMessage, TicketPriority, TicketStatus,
  UpdateTicket,
};
use crate::api::{ApiError, Transport};
use crate::cache::{provisional_id, CacheResult, Cacheable, Filters, OptimisticUpdate, QueryKey};
use crate::mutation::{run_detached, Mutation, OptimisticMutation};
use crate::query::Query;

impl Cacheable for Ticket {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "ticket"
  }
}

impl Resource for Ticket {
  const NAMESPACE: &'static str = "ticketing";
  const PATH: &'static str = "/tickets";
}

impl MutableResource for Ticket {
  type Create = CreateTicket;
  type Update = UpdateTicket;
  type Created = Ticket;

  fn provisional(input: &CreateTicket, temp_id: String) -> Self {
    let now = Utc::now();
    Ticket {
      id: temp_id,
      ticket_number: None,
      subject: input.subject.clone(),
      description: input.description.clone(),
      status: TicketStatus::Open,
      priority: input.priority.unwrap_or_default(),
      target_type: input.target_type,
      category: input.category.clone(),
      tenant_id: input.tenant_id.clone(),
      partner_id: input.partner_id.clone(),
      assigned_to_user_id: None,
      created_at: Some(now),
      updated_at: Some(now),
    }
  }

  fn from_created(created: &Ticket) -> Self {
    created.clone()
  }
}

impl Cacheable for TicketMessage {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "ticket_message"
  }
}

/// List filters for tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFilters {
  pub status: Option<TicketStatus>,
  pub priority: Option<TicketPriority>,
  pub search: Option<String>,
  pub page: Option<u32>,
  pub page_size: Option<u32>,
}

impl From<TicketFilters> for Filters {
  fn from(f: TicketFilters) -> Self {
    Filters::new()
      .with_opt("status", f.status)
      .with_opt("priority", f.priority)
      .with_opt("search", f.search)
      .with_opt("page", f.page)
      .with_opt("page_size", f.page_size)
  }
}

impl Keys<Ticket> {
  pub fn messages(ticket_id: &str) -> QueryKey {
    Self::all().with("messages").with(ticket_id)
  }
}

impl<T: Transport> ResourceClient<Ticket, T> {
  fn messages_path(ticket_id: &str) -> String {
    format!("{}/messages", Ticket::item_path(ticket_id))
  }

  /// Observer over the conversation on one ticket.
  pub fn messages(&self, ticket_id: &str) -> Query<Vec<TicketMessage>> {
    let api = self.api.clone();
    let path = Self::messages_path(ticket_id);
    Query::new(&self.cache, Keys::<Ticket>::messages(ticket_id), move || {
      let api = api.clone();
      let path = path.clone();
      async move { api.get_list::<TicketMessage>(&path, &Filters::new()).await }
    })
  }

  pub async fn fetch_messages(
    &self,
    ticket_id: &str,
  ) -> Result<CacheResult<Vec<TicketMessage>>, ApiError> {
    let api = self.api.clone();
    let path = Self::messages_path(ticket_id);
    self
      .cache
      .fetch_query(&Keys::<Ticket>::messages(ticket_id), move || async move {
        api.get_list::<TicketMessage>(&path, &Filters::new()).await
      })
      .await
  }

  /// Reply on a ticket. The reply is appended to the cached conversation
  /// until the server confirms it.
  pub async fn add_message(
    &self,
    ticket_id: &str,
    input: CreateTicketMessage,
  ) -> Result<TicketMessage, ApiError> {
    run_detached(self.add_message_task(ticket_id, input)).await
  }

  pub fn add_message_mutation(
    &self,
    ticket_id: &str,
    input: CreateTicketMessage,
  ) -> Mutation<TicketMessage> {
    let mut mutation = Mutation::new();
    mutation.start(self.add_message_task(ticket_id, input));
    mutation
  }

  fn add_message_task(
    &self,
    ticket_id: &str,
    input: CreateTicketMessage,
  ) -> impl Future<Output = Result<TicketMessage, ApiError>> + Send + 'static {
    let messages = Keys::<Ticket>::messages(ticket_id);
    let provisional = TicketMessage {
      id: provisional_id(),
      ticket_id: Some(ticket_id.to_string()),
      message: input.message.clone(),
      author_user_id: None,
      is_internal: input.is_internal,
      created_at: Some(Utc::now()),
    };
    let update = OptimisticUpdate::insert(&self.cache, &messages, provisional);
    let api = self.api.clone();
    let path = Self::messages_path(ticket_id);

    OptimisticMutation {
      cache: self.cache.clone(),
      label: "add_message",
      update: Some(update),
      call: async move { api.post::<_, TicketMessage>(&path, &input).await },
      reconcile: |message: &TicketMessage| Some(message.clone()),
      // A reply can move the ticket, so its detail and the lists go stale too.
      invalidate: vec![messages, Keys::<Ticket>::detail(ticket_id), Keys::<Ticket>::lists()],
    }
    .run()
  }

  pub async fn set_status(&self, id: &str, status: TicketStatus) -> Result<Ticket, ApiError> {
    self
      .update(
        id,
        UpdateTicket {
          status: Some(status),
          ..Default::default()
        },
      )
      .await
  }

  pub async fn close(&self, id: &str) -> Result<Ticket, ApiError> {
    self.set_status(id, TicketStatus::Closed).await
  }

  pub async fn assign(&self, id: &str, user_id: &str) -> Result<Ticket, ApiError> {
    self
      .update(
        id,
        UpdateTicket {
          assigned_to_user_id: Some(user_id.to_string()),
          ..Default::default()
        },
      )
      .await
  }
}
