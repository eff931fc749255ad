//! Health and metrics reads for the operations dashboard.
//!
//! Nothing here is mutable. Dashboards keep the numbers current by polling:
//! [`MonitoringClient::watch_metrics`] returns an observer that refetches on a
//! fixed interval.

use std::time::Duration;

use crate::api::types::{HealthReport, MonitoringMetrics};
use crate::api::{ApiClient, ApiError, Transport};
use crate::cache::{CacheResult, Filters, QueryCache, QueryKey};
use crate::query::Query;

const NAMESPACE: &str = "monitoring";
const HEALTH_PATH: &str = "/health";
const METRICS_PATH: &str = "/monitoring/metrics";

#[derive(Clone)]
pub struct MonitoringClient<T: Transport> {
  api: ApiClient<T>,
  cache: QueryCache,
}

impl<T: Transport> MonitoringClient<T> {
  pub fn new(api: ApiClient<T>, cache: QueryCache) -> Self {
    Self { api, cache }
  }

  pub fn health_key() -> QueryKey {
    QueryKey::new(NAMESPACE).with("health")
  }

  pub fn metrics_key(period: Option<&str>) -> QueryKey {
    QueryKey::new(NAMESPACE)
      .with("metrics")
      .with_filters(&Self::period_filter(period))
  }

  fn period_filter(period: Option<&str>) -> Filters {
    Filters::new().with_opt("period", period)
  }

  pub fn health(&self) -> Query<HealthReport> {
    let api = self.api.clone();
    Query::new(&self.cache, Self::health_key(), move || {
      let api = api.clone();
      async move { api.get::<HealthReport>(HEALTH_PATH, &Filters::new()).await }
    })
  }

  pub async fn fetch_health(&self) -> Result<CacheResult<HealthReport>, ApiError> {
    let api = self.api.clone();
    self
      .cache
      .fetch_query(&Self::health_key(), move || async move {
        api.get::<HealthReport>(HEALTH_PATH, &Filters::new()).await
      })
      .await
  }

  /// Observer over error-rate and latency metrics for `period` (e.g. "1h", "24h").
  pub fn metrics(&self, period: Option<&str>) -> Query<MonitoringMetrics> {
    let api = self.api.clone();
    let filters = Self::period_filter(period);
    Query::new(&self.cache, Self::metrics_key(period), move || {
      let api = api.clone();
      let filters = filters.clone();
      async move { api.get::<MonitoringMetrics>(METRICS_PATH, &filters).await }
    })
  }

  /// Like [`MonitoringClient::metrics`], refetching every `every` while polled.
  pub fn watch_metrics(&self, period: Option<&str>, every: Duration) -> Query<MonitoringMetrics> {
    self.metrics(period).with_refetch_interval(every)
  }

  pub async fn fetch_metrics(
    &self,
    period: Option<&str>,
  ) -> Result<CacheResult<MonitoringMetrics>, ApiError> {
    let api = self.api.clone();
    let filters = Self::period_filter(period);
    self
      .cache
      .fetch_query(&Self::metrics_key(period), move || async move {
        api.get::<MonitoringMetrics>(METRICS_PATH, &filters).await
      })
      .await
  }
}
