use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest string that still infers as [`FieldType::VarChar`].
pub const VARCHAR_MAX_LEN: usize = 255;

/// Structural type of a field, inferred from JSON values.
///
/// The lattice is deliberately small: `Null` generalizes to everything,
/// `Integer` widens to `Decimal` and `VarChar` widens to `Text`. Every other
/// pair of distinct types is incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Null,
    Boolean,
    Integer,
    Decimal,
    VarChar,
    Text,
    Object,
    Array,
}

impl FieldType {
    pub fn infer(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
            Value::Number(_) => FieldType::Decimal,
            Value::String(s) if s.chars().count() <= VARCHAR_MAX_LEN => FieldType::VarChar,
            Value::String(_) => FieldType::Text,
            Value::Array(_) => FieldType::Array,
            Value::Object(_) => FieldType::Object,
        }
    }

    /// True when `self` strictly generalizes to `to` without losing values.
    pub fn widens_to(&self, to: &FieldType) -> bool {
        match (self, to) {
            (FieldType::Null, other) => *other != FieldType::Null,
            (FieldType::Integer, FieldType::Decimal) => true,
            (FieldType::VarChar, FieldType::Text) => true,
            _ => false,
        }
    }

    /// True when a column of type `self` can hold values of type `incoming`
    /// as they are.
    pub fn accepts(&self, incoming: &FieldType) -> bool {
        self == incoming || incoming.widens_to(self)
    }

    /// Least upper bound of two types, if one exists.
    pub fn unify(&self, other: &FieldType) -> Option<FieldType> {
        if self.accepts(other) {
            Some(*self)
        } else if other.accepts(self) {
            Some(*other)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Null => "null",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::VarChar => "varchar",
            FieldType::Text => "text",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
