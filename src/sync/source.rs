use async_trait::async_trait;
use futures::stream::BoxStream;

use super::result::SyncOutcome;

/// Read/write façade over one dataset.
///
/// `data` is the local view: it yields the current state right away and again
/// after every committed change. `sync` brings the local view up to date with
/// the server.
#[async_trait]
pub trait SyncSource<P>: Send + Sync
where
  P: Send + Sync,
{
  type Data: Send + 'static;

  fn data(&self, params: &P) -> BoxStream<'static, Self::Data>;

  async fn sync(&self, params: &P, forced: bool) -> SyncOutcome;
}
