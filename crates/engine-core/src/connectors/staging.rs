use crate::error::StagingError;
use async_trait::async_trait;

/// Append-only object store used for write-ahead staging.
///
/// `put` on an existing path succeeds only when the bytes are identical,
/// which keeps staging idempotent for replays without allowing overwrites.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StagingError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StagingError>;

    async fn exists(&self, path: &str) -> Result<bool, StagingError>;
}
