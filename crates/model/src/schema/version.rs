use crate::{core::identifiers::EntityId, schema::field_map::FieldMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable entry in an entity's schema history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub entity: EntityId,
    pub version: u32,
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
}
