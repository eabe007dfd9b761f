use crate::{core::field_type::FieldType, execution::errors::ModelError, records::record::Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name to type mapping for one entity.
///
/// Backed by a `BTreeMap` so iteration order, and therefore every diff
/// computed from it, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, FieldType>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infers the shape of a batch.
    ///
    /// A field absent from some records is not a conflict; a field holding
    /// values with no common upper bound is.
    pub fn infer(records: &[Record]) -> Result<Self, ModelError> {
        let mut fields: BTreeMap<String, FieldType> = BTreeMap::new();
        for record in records {
            for (name, value) in record {
                let incoming = FieldType::infer(value);
                match fields.get(name) {
                    None => {
                        fields.insert(name.clone(), incoming);
                    }
                    Some(current) => {
                        let unified = current.unify(&incoming).ok_or_else(|| {
                            ModelError::ConflictingTypes {
                                field: name.clone(),
                                left: current.to_string(),
                                right: incoming.to_string(),
                            }
                        })?;
                        fields.insert(name.clone(), unified);
                    }
                }
            }
        }
        Ok(Self(fields))
    }

    pub fn get(&self, field: &str) -> Option<&FieldType> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, ty: FieldType) -> Option<FieldType> {
        self.0.insert(field.into(), ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldType)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `incoming` over `self`, keeping the wider type on overlap.
    ///
    /// Fields only present in `self` are kept; the registry never forgets a
    /// column just because one batch did not carry it.
    pub fn merged_with(&self, incoming: &FieldMap) -> FieldMap {
        let mut merged = self.0.clone();
        for (name, ty) in incoming.iter() {
            let next = match merged.get(name) {
                Some(current) => current.unify(ty).unwrap_or(*ty),
                None => *ty,
            };
            merged.insert(name.clone(), next);
        }
        FieldMap(merged)
    }
}

impl FromIterator<(String, FieldType)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldType)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
