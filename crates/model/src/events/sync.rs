use crate::{
    core::{identifiers::EntityId, watermark::Watermark},
    execution::sync_job::SyncStatus,
    schema::drift::DriftClass,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable journal entry, one per stage transition of a sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEvent {
    JobStarted {
        entity: EntityId,
        job_id: String,
        watermark: Option<Watermark>,
        at: DateTime<Utc>,
    },
    BatchStaged {
        entity: EntityId,
        job_id: String,
        batch_id: String,
        seq: u32,
        drift: DriftClass,
        at: DateTime<Utc>,
    },
    BatchCommitted {
        entity: EntityId,
        job_id: String,
        batch_id: String,
        rows: u64,
        at: DateTime<Utc>,
    },
    BatchQuarantined {
        entity: EntityId,
        job_id: String,
        batch_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    CheckpointAdvanced {
        entity: EntityId,
        job_id: String,
        watermark: Watermark,
        at: DateTime<Utc>,
    },
    JobFinished {
        entity: EntityId,
        job_id: String,
        status: SyncStatus,
        cause: Option<String>,
        at: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn entity(&self) -> &EntityId {
        match self {
            SyncEvent::JobStarted { entity, .. }
            | SyncEvent::BatchStaged { entity, .. }
            | SyncEvent::BatchCommitted { entity, .. }
            | SyncEvent::BatchQuarantined { entity, .. }
            | SyncEvent::CheckpointAdvanced { entity, .. }
            | SyncEvent::JobFinished { entity, .. } => entity,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            SyncEvent::JobStarted { job_id, .. }
            | SyncEvent::BatchStaged { job_id, .. }
            | SyncEvent::BatchCommitted { job_id, .. }
            | SyncEvent::BatchQuarantined { job_id, .. }
            | SyncEvent::CheckpointAdvanced { job_id, .. }
            | SyncEvent::JobFinished { job_id, .. } => job_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            SyncEvent::JobStarted { at, .. }
            | SyncEvent::BatchStaged { at, .. }
            | SyncEvent::BatchCommitted { at, .. }
            | SyncEvent::BatchQuarantined { at, .. }
            | SyncEvent::CheckpointAdvanced { at, .. }
            | SyncEvent::JobFinished { at, .. } => *at,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::JobStarted { .. } => "job.started",
            SyncEvent::BatchStaged { .. } => "batch.staged",
            SyncEvent::BatchCommitted { .. } => "batch.committed",
            SyncEvent::BatchQuarantined { .. } => "batch.quarantined",
            SyncEvent::CheckpointAdvanced { .. } => "checkpoint.advanced",
            SyncEvent::JobFinished { .. } => "job.finished",
        }
    }
}
