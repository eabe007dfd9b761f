use crate::error::StateError;
use async_trait::async_trait;
use model::{
    core::{identifiers::EntityId, watermark::Watermark},
    events::sync::SyncEvent,
    execution::{breaker::BreakerSnapshot, checkpoint::Checkpoint, quarantine::QuarantineRecord},
    records::staged::StagedBatch,
    schema::{field_map::FieldMap, version::SchemaVersion},
};

pub mod sled_store;

/// Outcome of a compare-and-set checkpoint advance.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointAdvance {
    Advanced(Checkpoint),
    /// The proposed watermark is not ahead of the stored one; nothing changed.
    Behind(Checkpoint),
}

impl CheckpointAdvance {
    pub fn checkpoint(&self) -> &Checkpoint {
        match self {
            CheckpointAdvance::Advanced(cp) | CheckpointAdvance::Behind(cp) => cp,
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, CheckpointAdvance::Advanced(_))
    }
}

/// Durable state shared by every sync job: checkpoints, schema history,
/// quarantine, the staged-batch manifest, breaker state and the event
/// journal.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_checkpoint(&self, entity: &EntityId) -> Result<Option<Checkpoint>, StateError>;

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StateError>;

    /// Moves the checkpoint forward iff the stored watermark still equals
    /// `expected`. Never moves it backwards.
    async fn advance_checkpoint(
        &self,
        entity: &EntityId,
        expected: Option<&Watermark>,
        proposed: &Watermark,
    ) -> Result<CheckpointAdvance, StateError>;

    async fn latest_schema(&self, entity: &EntityId) -> Result<Option<SchemaVersion>, StateError>;

    async fn schema_version(
        &self,
        entity: &EntityId,
        version: u32,
    ) -> Result<Option<SchemaVersion>, StateError>;

    async fn list_schemas(&self, entity: &EntityId) -> Result<Vec<SchemaVersion>, StateError>;

    /// Appends a new version iff the latest version is still
    /// `expected_latest`.
    async fn append_schema(
        &self,
        entity: &EntityId,
        expected_latest: Option<u32>,
        fields: FieldMap,
    ) -> Result<SchemaVersion, StateError>;

    async fn put_quarantine(&self, record: &QuarantineRecord) -> Result<(), StateError>;

    async fn list_quarantine(
        &self,
        entity: Option<&EntityId>,
    ) -> Result<Vec<QuarantineRecord>, StateError>;

    async fn resolve_quarantine(&self, batch_id: &str) -> Result<QuarantineRecord, StateError>;

    async fn put_staged(&self, staged: &StagedBatch) -> Result<(), StateError>;

    /// Staged batches awaiting commit, oldest first.
    async fn list_staged(&self, entity: &EntityId) -> Result<Vec<StagedBatch>, StateError>;

    async fn delete_staged(&self, entity: &EntityId, batch_id: &str) -> Result<(), StateError>;

    async fn load_breaker(
        &self,
        entity: &EntityId,
    ) -> Result<Option<BreakerSnapshot>, StateError>;

    async fn save_breaker(&self, snapshot: &BreakerSnapshot) -> Result<(), StateError>;

    async fn append_event(&self, event: &SyncEvent) -> Result<(), StateError>;

    /// The most recent `limit` events for an entity, oldest first.
    async fn events(&self, entity: &EntityId, limit: usize) -> Result<Vec<SyncEvent>, StateError>;
}
