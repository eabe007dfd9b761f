use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one source entity, e.g. `facebook_ads.campaigns`.
///
/// Checkpoints, schema versions and staged batches are all keyed by this id,
/// so two entities never share a watermark or a version sequence.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn qualified(source: &str, entity: &str) -> Self {
        Self(format!("{source}.{entity}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Warehouse table name for this entity, e.g. `facebook_ads__campaigns`.
    pub fn table_name(&self) -> String {
        self.0
            .chars()
            .map(|c| match c {
                '.' => "__".to_string(),
                c if c.is_ascii_alphanumeric() || c == '_' => c.to_ascii_lowercase().to_string(),
                _ => "_".to_string(),
            })
            .collect()
    }

    /// The source half of a qualified id, if there is one.
    pub fn source(&self) -> Option<&str> {
        self.0.split_once('.').map(|(source, _)| source)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

pub fn new_job_id() -> String {
    format!("job-{}", uuid::Uuid::new_v4().simple())
}
