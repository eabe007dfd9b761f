use crate::core::field_type::FieldType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a schema delta, ordered from harmless to breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClass {
    Unchanged,
    Additive,
    Widened,
    Breaking,
}

impl DriftClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftClass::Unchanged => "unchanged",
            DriftClass::Additive => "additive",
            DriftClass::Widened => "widened",
            DriftClass::Breaking => "breaking",
        }
    }

    /// Whether a batch with this drift may be loaded.
    pub fn is_loadable(&self) -> bool {
        *self != DriftClass::Breaking
    }
}

impl fmt::Display for DriftClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Registered but absent from the batch; treated as nullable.
    Missing { registered: FieldType },
    Added { incoming: FieldType },
    Widened { from: FieldType, to: FieldType },
    Breaking { registered: FieldType, incoming: FieldType },
}

impl ChangeKind {
    pub fn class(&self) -> DriftClass {
        match self {
            ChangeKind::Missing { .. } => DriftClass::Unchanged,
            ChangeKind::Added { .. } => DriftClass::Additive,
            ChangeKind::Widened { .. } => DriftClass::Widened,
            ChangeKind::Breaking { .. } => DriftClass::Breaking,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub kind: ChangeKind,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ChangeKind::Missing { registered } => {
                write!(f, "{} missing (registered {registered})", self.field)
            }
            ChangeKind::Added { incoming } => write!(f, "{} added as {incoming}", self.field),
            ChangeKind::Widened { from, to } => {
                write!(f, "{} widened {from} -> {to}", self.field)
            }
            ChangeKind::Breaking {
                registered,
                incoming,
            } => write!(f, "{} conflicts {registered} -> {incoming}", self.field),
        }
    }
}

/// Result of comparing an incoming field map against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub class: DriftClass,
    pub changes: Vec<FieldChange>,
}

impl DriftReport {
    pub fn breaking_changes(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes
            .iter()
            .filter(|c| c.kind.class() == DriftClass::Breaking)
    }
}
