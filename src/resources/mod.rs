//! Typed consumer APIs, one per backend resource.
//!
//! Every resource gets the same surface from [`ResourceClient`]: a list
//! accessor with filters folded into the key, a detail accessor keyed by id,
//! and create/update/delete mutations that follow the optimistic write ->
//! remote call -> commit or rollback -> invalidate sequence.

mod api_keys;
mod billing;
mod communications;
mod monitoring;
mod partners;
mod tickets;
mod webhooks;

pub use api_keys::ApiKeyFilters;
pub use billing::InvoiceFilters;
pub use communications::{LogFilters, TemplateFilters};
pub use monitoring::MonitoringClient;
pub use partners::PartnerFilters;
pub use tickets::TicketFilters;
pub use webhooks::WebhookFilters;

use color_eyre::Result as EyreResult;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::api::types::{
  ApiKey, CommunicationLog, Invoice, Partner, Template, Ticket, Webhook,
};
use crate::api::{ApiClient, ApiError, HttpTransport, Transport};
use crate::cache::{
  provisional_id, CacheResult, CacheStorage, Cacheable, Filters, NoopStorage, OptimisticUpdate,
  QueryCache, QueryKey, SqliteStorage,
};
use crate::config::Config;
use crate::mutation::{run_detached, Mutation, OptimisticMutation};
use crate::query::Query;

/// A backend collection the client can read.
pub trait Resource: Cacheable {
  /// First segment of every query key for this resource
  const NAMESPACE: &'static str;
  /// Collection path, relative to the API base URL
  const PATH: &'static str;

  fn item_path(id: &str) -> String {
    format!("{}/{}", Self::PATH, id)
  }
}

/// A resource that also supports create, update and delete.
pub trait MutableResource: Resource {
  type Create: Serialize + Send + Sync + 'static;
  type Update: Serialize + Send + Sync + 'static;
  /// Body returned by a create call
  type Created: DeserializeOwned + Send + Sync + 'static;

  /// Client-side stand-in shown until the server answers.
  fn provisional(input: &Self::Create, temp_id: String) -> Self;

  /// The cacheable record inside a create response.
  fn from_created(created: &Self::Created) -> Self;
}

/// Query keys of a resource.
pub struct Keys<R>(PhantomData<R>);

impl<R: Resource> Keys<R> {
  pub fn all() -> QueryKey {
    QueryKey::new(R::NAMESPACE)
  }

  /// Prefix matching every list of this resource, whatever the filters
  pub fn lists() -> QueryKey {
    Self::all().with("list")
  }

  pub fn list(filters: &Filters) -> QueryKey {
    Self::lists().with_filters(filters)
  }

  pub fn detail(id: &str) -> QueryKey {
    Self::all().with("detail").with(id)
  }
}

/// Cached, optimistic client for one resource.
pub struct ResourceClient<R, T: Transport> {
  api: ApiClient<T>,
  cache: QueryCache,
  _resource: PhantomData<fn() -> R>,
}

impl<R, T: Transport> Clone for ResourceClient<R, T> {
  fn clone(&self) -> Self {
    Self {
      api: self.api.clone(),
      cache: self.cache.clone(),
      _resource: PhantomData,
    }
  }
}

impl<R: Resource, T: Transport> ResourceClient<R, T> {
  pub fn new(api: ApiClient<T>, cache: QueryCache) -> Self {
    Self {
      api,
      cache,
      _resource: PhantomData,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Observer over the list matching `filters`.
  pub fn list(&self, filters: Filters) -> Query<Vec<R>> {
    let api = self.api.clone();
    let key = Keys::<R>::list(&filters);
    Query::new(&self.cache, key, move || {
      let api = api.clone();
      let filters = filters.clone();
      async move { api.get_list::<R>(R::PATH, &filters).await }
    })
  }

  /// Read the list matching `filters` through the cache.
  pub async fn fetch_list(&self, filters: &Filters) -> Result<CacheResult<Vec<R>>, ApiError> {
    let api = self.api.clone();
    let query = filters.clone();
    self
      .cache
      .fetch_query(&Keys::<R>::list(filters), move || async move {
        api.get_list::<R>(R::PATH, &query).await
      })
      .await
  }

  /// Observer over one record. Disabled, and never fetching, without an id.
  pub fn detail(&self, id: Option<&str>) -> Query<R> {
    let api = self.api.clone();
    let id = id.map(String::from);
    let key = match &id {
      Some(id) => Keys::<R>::detail(id),
      None => Keys::<R>::all().with("detail"),
    };
    let enabled = id.is_some();

    Query::new(&self.cache, key, move || {
      let api = api.clone();
      let id = id.clone();
      async move {
        match id {
          Some(id) => api.get::<R>(&R::item_path(&id), &Filters::new()).await,
          None => Err(ApiError::NotFound(R::PATH.to_string())),
        }
      }
    })
    .with_enabled(enabled)
  }

  /// Read one record through the cache.
  pub async fn fetch_detail(&self, id: &str) -> Result<CacheResult<R>, ApiError> {
    let api = self.api.clone();
    let path = R::item_path(id);
    self
      .cache
      .fetch_query(&Keys::<R>::detail(id), move || async move {
        api.get::<R>(&path, &Filters::new()).await
      })
      .await
  }

  /// Mark every cached list and detail of this resource stale.
  pub fn invalidate(&self) -> usize {
    self.cache.invalidate(&Keys::<R>::all())
  }
}

impl<R: MutableResource, T: Transport> ResourceClient<R, T> {
  /// Create a record; the provisional version is listed until the server answers.
  pub async fn create(&self, input: R::Create) -> Result<R::Created, ApiError> {
    run_detached(self.create_task(input)).await
  }

  pub fn create_mutation(&self, input: R::Create) -> Mutation<R::Created> {
    let mut mutation = Mutation::new();
    mutation.start(self.create_task(input));
    mutation
  }

  fn create_task(
    &self,
    input: R::Create,
  ) -> impl Future<Output = Result<R::Created, ApiError>> + Send + 'static {
    let provisional = R::provisional(&input, provisional_id());
    let update = OptimisticUpdate::insert(&self.cache, &Keys::<R>::lists(), provisional);
    let api = self.api.clone();

    OptimisticMutation {
      cache: self.cache.clone(),
      label: "create",
      update: Some(update),
      call: async move { api.post::<_, R::Created>(R::PATH, &input).await },
      reconcile: |created: &R::Created| Some(R::from_created(created)),
      invalidate: vec![Keys::<R>::lists()],
    }
    .run()
  }

  /// Patch a record; the change shows in cached lists and detail right away.
  pub async fn update(&self, id: &str, patch: R::Update) -> Result<R, ApiError> {
    run_detached(self.update_task(id, patch)).await
  }

  pub fn update_mutation(&self, id: &str, patch: R::Update) -> Mutation<R> {
    let mut mutation = Mutation::new();
    mutation.start(self.update_task(id, patch));
    mutation
  }

  fn update_task(
    &self,
    id: &str,
    patch: R::Update,
  ) -> impl Future<Output = Result<R, ApiError>> + Send + 'static {
    let detail = Keys::<R>::detail(id);
    let update = serde_json::to_value(&patch)
      .ok()
      .map(|fields| OptimisticUpdate::patch(&self.cache, &Keys::<R>::lists(), &detail, id, &fields));
    let api = self.api.clone();
    let path = R::item_path(id);

    OptimisticMutation {
      cache: self.cache.clone(),
      label: "update",
      update,
      call: async move { api.patch::<_, R>(&path, &patch).await },
      reconcile: |record: &R| Some(record.clone()),
      invalidate: vec![Keys::<R>::lists(), detail],
    }
    .run()
  }

  /// Delete a record; it disappears from cached lists right away.
  pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
    run_detached(self.delete_task(id)).await
  }

  pub fn delete_mutation(&self, id: &str) -> Mutation<()> {
    let mut mutation = Mutation::new();
    mutation.start(self.delete_task(id));
    mutation
  }

  fn delete_task(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send + 'static {
    let detail = Keys::<R>::detail(id);
    let update = OptimisticUpdate::<R>::remove(&self.cache, &Keys::<R>::lists(), &detail, id);
    let api = self.api.clone();
    let path = R::item_path(id);

    OptimisticMutation {
      cache: self.cache.clone(),
      label: "delete",
      update: Some(update),
      call: async move { api.delete(&path).await },
      reconcile: |_: &()| None,
      invalidate: vec![Keys::<R>::lists(), detail],
    }
    .run()
  }
}

/// Entry point: one API client and one query cache shared by every resource.
#[derive(Clone)]
pub struct AdminClient<T: Transport = HttpTransport> {
  api: ApiClient<T>,
  cache: QueryCache,
}

impl AdminClient<HttpTransport> {
  /// Build the HTTP client, and the persistent cache if enabled, from config.
  pub fn from_config(config: &Config) -> EyreResult<Self> {
    let transport = HttpTransport::new(&config.api, Config::get_api_token())
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create API client: {}", e))?;

    let storage: Arc<dyn CacheStorage> = if config.cache.persist {
      Arc::new(SqliteStorage::open(config.cache.path.as_deref())?)
    } else {
      Arc::new(NoopStorage)
    };
    let cache = QueryCache::new(storage).with_stale_time(config.cache.stale_time());

    Ok(Self::new(transport, cache))
  }
}

impl<T: Transport> AdminClient<T> {
  pub fn new(transport: T, cache: QueryCache) -> Self {
    Self {
      api: ApiClient::new(transport),
      cache,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  fn resource<R: Resource>(&self) -> ResourceClient<R, T> {
    ResourceClient::new(self.api.clone(), self.cache.clone())
  }

  pub fn tickets(&self) -> ResourceClient<Ticket, T> {
    self.resource()
  }

  pub fn partners(&self) -> ResourceClient<Partner, T> {
    self.resource()
  }

  pub fn api_keys(&self) -> ResourceClient<ApiKey, T> {
    self.resource()
  }

  pub fn webhooks(&self) -> ResourceClient<Webhook, T> {
    self.resource()
  }

  pub fn templates(&self) -> ResourceClient<Template, T> {
    self.resource()
  }

  pub fn communication_logs(&self) -> ResourceClient<CommunicationLog, T> {
    self.resource()
  }

  pub fn invoices(&self) -> ResourceClient<Invoice, T> {
    self.resource()
  }

  pub fn monitoring(&self) -> MonitoringClient<T> {
    MonitoringClient::new(self.api.clone(), self.cache.clone())
  }
}
