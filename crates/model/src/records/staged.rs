use crate::core::{identifiers::EntityId, watermark::Watermark};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest entry for a batch written to the staging store but not yet
/// acknowledged by the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedBatch {
    pub batch_id: String,
    pub entity: EntityId,
    pub job_id: String,
    pub seq: u32,
    pub location: String,
    pub validated: bool,
    pub schema_version: u32,
    pub watermark: Option<Watermark>,
    /// Fixed at staging time: false once an earlier batch of the same job was
    /// quarantined or failed, so replaying this batch must not move the
    /// checkpoint past that gap.
    pub advances_checkpoint: bool,
    pub staged_at: DateTime<Utc>,
}
