//! Mutation lifecycle: `idle -> pending -> succeeded | failed -> settled`.
//!
//! Every mutation runs as a spawned task, so dropping the caller (a closed
//! view, a cancelled command) never cancels the network call; the cache
//! reconciliation and invalidation still happen.
//!
//! Two forms are offered, mirroring the awaitable and fire-and-forget forms
//! consumers expect:
//!
//! ```ignore
//! // Awaitable: the error is returned after the rollback already ran.
//! let ticket = tickets.create(input).await?;
//!
//! // Fire-and-forget: poll from the event loop tick.
//! let mut m = tickets.create_mutation(input);
//! if m.poll() {
//!     if let Some(e) = m.error() { show_toast(e) }
//! }
//! ```

use std::future::Future;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::cache::{invalidate_related, Cacheable, OptimisticUpdate, QueryCache, QueryKey};

/// The state of a mutation
#[derive(Debug, Clone)]
pub enum MutationState<T> {
  /// Not started
  Idle,
  /// Optimistic write applied, waiting on the server
  Pending,
  /// Committed with the server's answer
  Succeeded(T),
  /// Rolled back
  Failed(ApiError),
}

impl<T> MutationState<T> {
  pub fn is_idle(&self) -> bool {
    matches!(self, Self::Idle)
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, Self::Pending)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Succeeded(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Self::Failed(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      Self::Succeeded(data) => Some(data),
      _ => None,
    }
  }
}

/// Fire-and-forget handle on a running mutation.
pub struct Mutation<T> {
  state: MutationState<T>,
  settled: bool,
  receiver: Option<oneshot::Receiver<Result<T, ApiError>>>,
}

impl<T: Send + 'static> Mutation<T> {
  pub fn new() -> Self {
    Self {
      state: MutationState::Idle,
      settled: false,
      receiver: None,
    }
  }

  /// Spawn `future` and track it. A mutation still pending from a previous
  /// `start` keeps running, but this handle stops tracking it.
  pub fn start<Fut>(&mut self, future: Fut)
  where
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    self.receiver = Some(rx);
    self.state = MutationState::Pending;
    self.settled = false;

    tokio::spawn(async move {
      // Ignore send errors - the handle may have been dropped
      let _ = tx.send(future.await);
    });
  }

  /// Collect the outcome if the mutation finished.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.finish(result);
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.finish(Err(ApiError::Cancelled));
        true
      }
    }
  }

  /// Wait for the tracked mutation to settle.
  pub async fn settled(&mut self) -> &MutationState<T> {
    if let Some(rx) = self.receiver.take() {
      let result = rx.await.unwrap_or(Err(ApiError::Cancelled));
      self.finish(result);
    }
    &self.state
  }

  fn finish(&mut self, result: Result<T, ApiError>) {
    self.receiver = None;
    self.settled = true;
    self.state = match result {
      Ok(data) => MutationState::Succeeded(data),
      Err(e) => MutationState::Failed(e),
    };
  }

  /// Back to idle, forgetting any outcome.
  pub fn reset(&mut self) {
    self.state = MutationState::Idle;
    self.settled = false;
    self.receiver = None;
  }

  pub fn state(&self) -> &MutationState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_pending(&self) -> bool {
    self.state.is_pending()
  }

  /// True once the outcome is known; the cache is reconciled and invalidated by then.
  pub fn is_settled(&self) -> bool {
    self.settled
  }

  /// The failure as a displayable message.
  pub fn error(&self) -> Option<String> {
    match &self.state {
      MutationState::Failed(e) => Some(e.to_string()),
      _ => None,
    }
  }
}

impl<T: Send + 'static> Default for Mutation<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutation<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("state", &self.state)
      .field("settled", &self.settled)
      .finish_non_exhaustive()
  }
}

/// Run `future` on its own task and wait for it.
///
/// Dropping the returned future detaches the task instead of cancelling it.
pub async fn run_detached<T, Fut>(future: Fut) -> Result<T, ApiError>
where
  T: Send + 'static,
  Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
  match tokio::spawn(future).await {
    Ok(result) => result,
    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
    Err(_) => Err(ApiError::Cancelled),
  }
}

/// One optimistic mutation: the provisional write, the remote call, how to
/// pick the authoritative record out of the response, and what to invalidate.
pub(crate) struct OptimisticMutation<R: Cacheable, Out, Fut> {
  pub cache: QueryCache,
  pub label: &'static str,
  pub update: Option<OptimisticUpdate<R>>,
  pub call: Fut,
  pub reconcile: fn(&Out) -> Option<R>,
  pub invalidate: Vec<QueryKey>,
}

impl<R, Out, Fut> OptimisticMutation<R, Out, Fut>
where
  R: Cacheable,
  Fut: Future<Output = Result<Out, ApiError>>,
{
  /// Drive the mutation to settlement. By the time this returns, the
  /// optimistic write has been committed or rolled back and the related
  /// queries are stale.
  pub async fn run(self) -> Result<Out, ApiError> {
    let Self {
      cache,
      label,
      update,
      call,
      reconcile,
      invalidate,
    } = self;

    debug!(
      entity = R::entity_type(),
      mutation = label,
      optimistic = update.is_some(),
      "Mutation pending"
    );

    let result = call.await;

    match &result {
      Ok(out) => {
        if let Some(update) = update {
          update.commit(reconcile(out));
        }
        info!(entity = R::entity_type(), mutation = label, "Mutation succeeded");
      }
      Err(e) => {
        if let Some(update) = update {
          update.rollback();
        }
        warn!(entity = R::entity_type(), mutation = label, "Mutation failed: {}", e);
      }
    }

    invalidate_related(&cache, &invalidate);
    debug!(entity = R::entity_type(), mutation = label, "Mutation settled");

    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_mutation_success() {
    let mut m = Mutation::new();
    assert!(m.state().is_idle());

    m.start(async { Ok::<_, ApiError>(42) });
    assert!(m.is_pending());
    assert!(!m.is_settled());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(m.poll());
    assert!(m.is_settled());
    assert_eq!(m.data(), Some(&42));
    assert_eq!(m.error(), None);
  }

  #[tokio::test]
  async fn test_mutation_error_is_readable() {
    let mut m: Mutation<u32> = Mutation::new();
    m.start(async { Err(ApiError::Transport("connection reset".into())) });

    assert!(m.settled().await.is_error());
    assert_eq!(m.error().as_deref(), Some("transport error: connection reset"));
  }

  #[tokio::test]
  async fn test_poll_without_start_is_noop() {
    let mut m: Mutation<u32> = Mutation::new();
    assert!(!m.poll());
  }

  #[tokio::test]
  async fn test_reset_returns_to_idle() {
    let mut m = Mutation::new();
    m.start(async { Ok::<_, ApiError>(1) });
    m.settled().await;
    m.reset();
    assert!(m.state().is_idle());
    assert!(!m.is_settled());
  }

  #[tokio::test]
  async fn test_detached_task_outlives_caller() {
    let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = done.clone();
    let fut = run_detached(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      flag.store(true, std::sync::atomic::Ordering::SeqCst);
      Ok::<_, ApiError>(())
    });
    let _ = futures::poll!(Box::pin(fut));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(done.load(std::sync::atomic::Ordering::SeqCst));
  }
}
