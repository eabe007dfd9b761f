use crate::core::{identifiers::EntityId, watermark::Watermark};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub entity: EntityId,
    pub watermark: Watermark,
    pub committed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(entity: EntityId, watermark: Watermark) -> Self {
        Self {
            entity,
            watermark,
            committed_at: Utc::now(),
        }
    }
}
