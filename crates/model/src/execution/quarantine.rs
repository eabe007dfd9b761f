use crate::{core::identifiers::EntityId, schema::drift::FieldChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// The batch's schema conflicts with the registered version.
    BreakingDrift,
    /// The batch failed validation (missing keys, bad cursor, mixed types).
    Validation(String),
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuarantineReason::BreakingDrift => write!(f, "breaking schema drift"),
            QuarantineReason::Validation(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

/// A batch held aside from the load path until an operator resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub batch_id: String,
    pub entity: EntityId,
    pub job_id: String,
    pub seq: u32,
    pub reason: QuarantineReason,
    pub diff: Vec<FieldChange>,
    /// Where the raw batch was parked in the staging store.
    pub location: Option<String>,
    pub row_count: usize,
    pub quarantined_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl QuarantineRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
