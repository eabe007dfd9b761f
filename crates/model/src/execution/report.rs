use crate::{
    core::{identifiers::EntityId, watermark::Watermark},
    execution::sync_job::SyncStatus,
};
use serde::{Deserialize, Serialize};

/// What the scheduler receives back for one triggered sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_id: String,
    pub entity: EntityId,
    pub status: SyncStatus,
    pub rows_written: u64,
    pub quarantine_count: u64,
    pub batches_committed: u64,
    pub batches_recovered: u64,
    pub watermark_start: Option<Watermark>,
    pub watermark_end: Option<Watermark>,
    pub requests: u64,
    pub retries: u64,
    pub duration_ms: u64,
    pub cause: Option<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Succeeded
    }
}
