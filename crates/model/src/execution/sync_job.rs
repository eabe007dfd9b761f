use crate::{
    core::{
        identifiers::{EntityId, new_job_id},
        watermark::Watermark,
    },
    execution::errors::ModelError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallyFailed,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Succeeded | SyncStatus::Failed | SyncStatus::PartiallyFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Succeeded => "succeeded",
            SyncStatus::Failed => "failed",
            SyncStatus::PartiallyFailed => "partially_failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sync attempt for one entity.
///
/// Moves `pending -> running -> {succeeded | failed | partially_failed}`;
/// terminal states reject any further transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub entity: EntityId,
    pub watermark_start: Option<Watermark>,
    pub watermark_end: Option<Watermark>,
    pub status: SyncStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cause: Option<String>,
}

impl SyncJob {
    pub fn new(entity: EntityId) -> Self {
        Self {
            id: new_job_id(),
            entity,
            watermark_start: None,
            watermark_end: None,
            status: SyncStatus::Pending,
            started_at: None,
            ended_at: None,
            cause: None,
        }
    }

    /// Enters `running` once the starting watermark is known.
    pub fn start(&mut self, watermark: Option<Watermark>) -> Result<(), ModelError> {
        self.transition(SyncStatus::Running)?;
        self.watermark_start = watermark.clone();
        self.watermark_end = watermark;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Records the watermark the checkpoint has been advanced to.
    pub fn advance(&mut self, watermark: Watermark) {
        if self.status == SyncStatus::Running {
            self.watermark_end = Some(watermark);
        }
    }

    pub fn finish(&mut self, status: SyncStatus, cause: Option<String>) -> Result<(), ModelError> {
        if !status.is_terminal() {
            return Err(ModelError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.transition(status)?;
        self.cause = cause;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: SyncStatus) -> Result<(), ModelError> {
        let allowed = match (self.status, to) {
            (SyncStatus::Pending, SyncStatus::Running) => true,
            (SyncStatus::Running, next) => next.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(ModelError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
