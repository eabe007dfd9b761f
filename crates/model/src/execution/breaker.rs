use crate::core::identifiers::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted circuit-breaker state for one entity. `open_until` is wall
/// clock time so the cooldown keeps running across process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub entity: EntityId,
    pub consecutive_failures: u32,
    pub open_until: Option<DateTime<Utc>>,
    pub half_open: bool,
    pub updated_at: DateTime<Utc>,
}

impl BreakerSnapshot {
    pub fn closed(entity: EntityId) -> Self {
        Self {
            entity,
            consecutive_failures: 0,
            open_until: None,
            half_open: false,
            updated_at: Utc::now(),
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }
}
