//! Sync jobs: a skip decision plus fetch, convert and store steps.

use async_trait::async_trait;
use color_eyre::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::accumulate::Accumulated;
use super::error::SyncError;
use super::result::{ErrorList, SyncResult};
use crate::hash::PendingHash;
use crate::validity::{ValidityChecker, ValidityKey};

/// Permission to run a job, returned by [`SyncJob::should_run`].
///
/// A gate tied to a validity key marks that key fresh when it is closed
/// with a successful result. An open gate tracks nothing.
pub struct Gate {
  tracked: Option<(Arc<ValidityChecker>, ValidityKey)>,
}

impl Gate {
  /// A gate that does not track freshness.
  pub fn open() -> Self {
    Self { tracked: None }
  }

  pub(crate) fn tracking(checker: Arc<ValidityChecker>, key: ValidityKey) -> Self {
    Self {
      tracked: Some((checker, key)),
    }
  }

  pub fn key(&self) -> Option<&ValidityKey> {
    self.tracked.as_ref().map(|(_, key)| key)
  }

  /// Finish the job. Refreshes the validity timestamp unless the job
  /// reported a problem.
  pub fn close(self, result: &SyncResult) {
    let Some((checker, key)) = self.tracked else {
      return;
    };
    if !result.marks_fresh() {
      return;
    }
    if let Err(e) = checker.on_data_updated(&key) {
      warn!(key = %key, error = %e, "Failed to record validity timestamp");
    }
  }
}

impl fmt::Debug for Gate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Gate").field("key", &self.key()).finish()
  }
}

/// What a fetch step produced.
pub enum Fetched<T> {
  /// New content, optionally with a content hash to remember once stored
  Changed {
    payload: T,
    hash: Option<PendingHash>,
  },
  /// The upstream content hash did not change; nothing to convert or store
  Unchanged,
}

impl<T> Fetched<T> {
  /// Content fetched without a hash gate.
  pub fn changed(payload: T) -> Self {
    Self::Changed {
      payload,
      hash: None,
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for Fetched<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Changed { payload, hash } => f
        .debug_struct("Changed")
        .field("payload", payload)
        .field("hash", hash)
        .finish(),
      Self::Unchanged => write!(f, "Unchanged"),
    }
  }
}

/// Deferred store call, run by the processor inside its transactions.
pub type StoreCall = Box<dyn FnMut() -> Result<()> + Send>;

/// A job after its fetch and convert steps.
pub enum Prepared {
  /// The hash gate reported unchanged content
  Unchanged,
  /// The job ended without anything to store
  Finished(SyncResult),
  /// A usable value is ready to be stored
  Ready {
    errors: Vec<SyncError>,
    store: StoreCall,
    hash: Option<PendingHash>,
  },
}

/// One unit of sync work over parameters `P`.
///
/// `should_run` decides whether the job runs at all; `prepare` performs the
/// fetch and convert steps and hands back the store step for the processor
/// to run.
#[async_trait]
pub trait SyncJob<P>: Send + Sync {
  /// Name used in logs.
  fn name(&self) -> &str;

  /// `None` skips the job entirely.
  async fn should_run(&self, params: &P, forced: bool) -> Option<Gate>;

  /// Fetch and convert.
  async fn prepare(&self, params: &P) -> Prepared;
}

type ShouldRunFn<P> = Box<dyn Fn(&P, bool) -> Option<Gate> + Send + Sync>;
type FetchFuture<T> = BoxFuture<'static, Result<Fetched<T>, SyncError>>;
type FetchFn<P, T> = Box<dyn Fn(&P) -> FetchFuture<T> + Send + Sync>;
type ConvertFn<P, T, R> = Box<dyn Fn(&P, T) -> Accumulated<R> + Send + Sync>;
type StoreFn<P, R> = Arc<dyn Fn(&P, &R) -> Result<()> + Send + Sync>;

/// A job assembled from closures.
///
/// `T` is the raw payload returned by the fetch step, `R` the converted
/// domain value handed to the store step.
pub struct Job<P, T, R> {
  name: String,
  should_run: ShouldRunFn<P>,
  fetch: FetchFn<P, T>,
  convert: ConvertFn<P, T, R>,
  store: StoreFn<P, R>,
}

impl<P, T, R> Job<P, T, R>
where
  P: Clone + Send + Sync + 'static,
  T: Send + 'static,
  R: Send + 'static,
{
  /// Create a job with its own skip decision.
  pub fn new<S, F, Fut, C, St>(
    name: impl Into<String>,
    should_run: S,
    fetch: F,
    convert: C,
    store: St,
  ) -> Self
  where
    S: Fn(&P, bool) -> Option<Gate> + Send + Sync + 'static,
    F: Fn(&P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Fetched<T>, SyncError>> + Send + 'static,
    C: Fn(&P, T) -> Accumulated<R> + Send + Sync + 'static,
    St: Fn(&P, &R) -> Result<()> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      should_run: Box::new(should_run),
      fetch: Box::new(
        move |params: &P| -> FetchFuture<T> { Box::pin(fetch(params)) },
      ),
      convert: Box::new(convert),
      store: Arc::new(store),
    }
  }

  /// Create a job that always runs and tracks no freshness.
  pub fn no_cache<F, Fut, C, St>(name: impl Into<String>, fetch: F, convert: C, store: St) -> Self
  where
    F: Fn(&P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Fetched<T>, SyncError>> + Send + 'static,
    C: Fn(&P, T) -> Accumulated<R> + Send + Sync + 'static,
    St: Fn(&P, &R) -> Result<()> + Send + Sync + 'static,
  {
    Self::new(name, |_, _| Some(Gate::open()), fetch, convert, store)
  }

  /// Box the job for a heterogeneous job list.
  pub fn boxed(self) -> Arc<dyn SyncJob<P>> {
    Arc::new(self)
  }
}

#[async_trait]
impl<P, T, R> SyncJob<P> for Job<P, T, R>
where
  P: Clone + Send + Sync + 'static,
  T: Send + 'static,
  R: Send + 'static,
{
  fn name(&self) -> &str {
    &self.name
  }

  async fn should_run(&self, params: &P, forced: bool) -> Option<Gate> {
    (self.should_run)(params, forced)
  }

  async fn prepare(&self, params: &P) -> Prepared {
    let fetched = match (self.fetch)(params).await {
      Ok(fetched) => fetched,
      Err(e) => return Prepared::Finished(SyncResult::from_error(e)),
    };

    let (payload, hash) = match fetched {
      Fetched::Unchanged => return Prepared::Unchanged,
      Fetched::Changed { payload, hash } => (payload, hash),
    };

    let (value, errors) = (self.convert)(params, payload).into_parts();
    let Some(value) = value else {
      let result = ErrorList::from_vec(errors)
        .map(SyncResult::Problem)
        .unwrap_or_else(|| {
          SyncResult::problem(SyncError::Internal("conversion produced no value".into()))
        });
      return Prepared::Finished(result);
    };

    let store = Arc::clone(&self.store);
    let params = params.clone();
    Prepared::Ready {
      errors,
      store: Box::new(move || store(&params, &value)),
      hash,
    }
  }
}
