//! Cancellable background refresh.
//!
//! A `Refresh<T>` owns a task spawned on the tokio runtime and exposes its
//! progress as a pollable state, so an event loop can check on it every tick
//! without awaiting.
//!
//! ```ignore
//! let menza = menza.clone();
//! let mut refresh = Refresh::new(move || {
//!   let menza = menza.clone();
//!   async move { menza.sync_all_important(Language::Cs, &[], false).await }
//! });
//!
//! refresh.start();
//!
//! // In event loop tick
//! if refresh.poll() {
//!   // State changed, redraw
//! }
//! ```

use color_eyre::Result;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum RefreshState<T> {
  /// Not started yet
  Idle,
  Running,
  Done(T),
  Failed(String),
  /// Cancelled before it finished
  Cancelled,
}

impl<T> RefreshState<T> {
  pub fn is_running(&self) -> bool {
    matches!(self, RefreshState::Running)
  }

  pub fn is_done(&self) -> bool {
    matches!(self, RefreshState::Done(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      RefreshState::Done(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      RefreshState::Failed(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

type RunnerFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// A refresh the caller can start, restart and cancel.
///
/// Cancelling aborts the spawned task: pending network requests are dropped.
/// A store already running on the blocking pool still completes.
pub struct Refresh<T> {
  state: RefreshState<T>,
  runner: RunnerFn<T>,
  task: Option<JoinHandle<()>>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T>>>,
  finished_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Send + 'static> Refresh<T> {
  pub fn new<F, Fut>(runner: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      state: RefreshState::Idle,
      runner: Box::new(move || Box::pin(runner())),
      task: None,
      receiver: None,
      finished_at: None,
      stale_time: Duration::from_secs(60),
    }
  }

  /// After this long a finished refresh reports itself stale.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  pub fn state(&self) -> &RefreshState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_running(&self) -> bool {
    self.state.is_running()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  pub fn is_stale(&self) -> bool {
    match &self.state {
      RefreshState::Done(_) => self
        .finished_at
        .map(|t| t.elapsed() >= self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start unless already running.
  pub fn start(&mut self) {
    if self.state.is_running() {
      return;
    }
    self.spawn();
  }

  /// Abort a running refresh and start over.
  pub fn restart(&mut self) {
    self.abort();
    self.spawn();
  }

  /// Abort a running refresh. No-op otherwise.
  pub fn cancel(&mut self) {
    if self.state.is_running() {
      self.abort();
      self.state = RefreshState::Cancelled;
      debug!("Refresh cancelled");
    }
  }

  /// Pick up the result of a finished run without blocking.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.finish(Some(result));
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.finish(None);
        true
      }
    }
  }

  /// Wait for the running refresh to finish.
  pub async fn wait(&mut self) -> &RefreshState<T> {
    if let Some(receiver) = &mut self.receiver {
      let result = receiver.recv().await;
      self.finish(result);
    }
    &self.state
  }

  fn finish(&mut self, result: Option<Result<T>>) {
    self.receiver = None;
    self.task = None;
    self.state = match result {
      Some(Ok(data)) => {
        self.finished_at = Some(Instant::now());
        RefreshState::Done(data)
      }
      Some(Err(e)) => RefreshState::Failed(format!("{:#}", e)),
      // The task panicked or was aborted
      None => RefreshState::Failed("Refresh task ended without a result".to_string()),
    };
  }

  fn abort(&mut self) {
    self.receiver = None;
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }

  fn spawn(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = RefreshState::Running;

    let future = (self.runner)();
    self.task = Some(tokio::spawn(async move {
      let result = future.await;
      // The receiver is gone if the refresh was restarted
      let _ = tx.send(result);
    }));
  }
}

impl<T> Drop for Refresh<T> {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for Refresh<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Refresh")
      .field("state", &self.state)
      .field("finished_at", &self.finished_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}
