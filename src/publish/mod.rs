pub mod types;
pub use types::*;
pub mod pinata;

use async_trait::async_trait;

use crate::batch::artifact::BatchArtifact;
use crate::batch::types::Cid;

/// Uploads a serialized batch to a content-addressed store.
///
/// One upload per call. Retrying is the scheduler's business.
#[async_trait]
pub trait ContentPublisher: Send + Sync {
    async fn publish(&self, artifact: &BatchArtifact) -> PublishResult<Cid>;
}
