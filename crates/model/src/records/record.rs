use crate::execution::errors::ModelError;
use serde_json::Value;

/// A raw source record as returned by the API, after page flattening.
pub type Record = serde_json::Map<String, Value>;

const KEY_SEPARATOR: char = '\u{1f}';

/// Stable byte representation of a record.
///
/// `serde_json::Map` keeps keys sorted, so equal records always produce equal
/// bytes regardless of the order the API sent fields in.
pub fn canonical_bytes(record: &Record) -> Vec<u8> {
    // Serializing a string-keyed map of JSON values cannot fail.
    serde_json::to_vec(record).unwrap_or_default()
}

/// Upsert key for a record.
///
/// With a declared primary key the key is the rendered key values; without
/// one it is a content hash, so re-delivering an identical record still maps
/// onto the same warehouse row.
pub fn record_key(record: &Record, primary_key: &[String], index: usize) -> Result<String, ModelError> {
    if primary_key.is_empty() {
        return Ok(blake3::hash(&canonical_bytes(record)).to_hex().to_string());
    }

    let mut parts = Vec::with_capacity(primary_key.len());
    for field in primary_key {
        match record.get(field) {
            None | Some(Value::Null) => {
                return Err(ModelError::MissingKey {
                    field: field.clone(),
                    index,
                });
            }
            Some(Value::String(s)) => parts.push(s.clone()),
            Some(other) => parts.push(other.to_string()),
        }
    }
    Ok(parts.join(&KEY_SEPARATOR.to_string()))
}
