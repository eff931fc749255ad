//! Scripted transport for tests.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::api::{ApiError, ApiRequest, Method, Transport};
use crate::cache::QueryCache;
use crate::resources::AdminClient;

type Handler = Arc<dyn Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync>;

#[derive(Default)]
struct State {
  routes: HashMap<(Method, String), Handler>,
  calls: Vec<ApiRequest>,
  latency: Option<Duration>,
  gate: Option<Arc<Semaphore>>,
}

/// In-process stand-in for the backend: routes by method and path (query
/// strings are ignored for matching) and records every request.
#[derive(Clone, Default)]
pub struct MockTransport {
  state: Arc<Mutex<State>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, method: Method, path: &str, body: Value) {
    self.respond_with(method, path, move |_| Ok(body.clone()));
  }

  pub fn fail(&self, method: Method, path: &str, error: ApiError) {
    self.respond_with(method, path, move |_| Err(error.clone()));
  }

  pub fn respond_with<F>(&self, method: Method, path: &str, handler: F)
  where
    F: Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync + 'static,
  {
    self
      .state
      .lock()
      .unwrap()
      .routes
      .insert((method, path.to_string()), Arc::new(handler));
  }

  /// Delay every response.
  pub fn set_latency(&self, latency: Duration) {
    self.state.lock().unwrap().latency = Some(latency);
  }

  /// Hold every response until [`MockTransport::release`] is called.
  pub fn hold(&self) {
    self.state.lock().unwrap().gate = Some(Arc::new(Semaphore::new(0)));
  }

  /// Let `n` held responses through.
  pub fn release(&self, n: usize) {
    if let Some(gate) = &self.state.lock().unwrap().gate {
      gate.add_permits(n);
    }
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn call_count(&self, method: Method, path: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .calls
      .iter()
      .filter(|c| c.method == method && c.path == path)
      .count()
  }
}

impl Transport for MockTransport {
  fn send(&self, request: ApiRequest) -> impl Future<Output = Result<Value, ApiError>> + Send {
    let (handler, latency, gate) = {
      let mut state = self.state.lock().unwrap();
      state.calls.push(request.clone());
      (
        state
          .routes
          .get(&(request.method, request.path.clone()))
          .cloned(),
        state.latency,
        state.gate.clone(),
      )
    };

    async move {
      if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
      }
      if let Some(gate) = gate {
        gate
          .acquire()
          .await
          .map_err(|_| ApiError::Cancelled)?
          .forget();
      }
      match handler {
        Some(handler) => handler(&request),
        None => Err(ApiError::NotFound(request.path.clone())),
      }
    }
  }
}

/// An admin client over a fresh mock backend and an in-memory cache.
pub fn admin_client() -> (MockTransport, AdminClient<MockTransport>) {
  let mock = MockTransport::new();
  let client = AdminClient::new(mock.clone(), QueryCache::in_memory());
  (mock, client)
}
