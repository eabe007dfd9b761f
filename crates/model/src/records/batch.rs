use crate::{
    core::{identifiers::EntityId, watermark::Watermark},
    execution::errors::ModelError,
    records::record::{Record, canonical_bytes},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// One fetched page of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub entity: EntityId,
    pub job_id: String,
    /// Position of the page within its sync job, starting at 0.
    pub seq: u32,
    pub page_token: Option<String>, // cursor used to request this page
    pub next_token: Option<String>, // cursor for the following page, if any
    pub records: Vec<Record>,
    /// Schema version active when the page was fetched.
    pub schema_version: Option<u32>,
    pub manifest: Manifest,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub row_count: usize,
    pub checksum_xxh3: u64, // rolling checksum over canonicalized records
}

pub fn manifest_for(records: &[Record]) -> Manifest {
    let mut h: u64 = 0;
    for r in records {
        h = xxh3_64_with_seed(&canonical_bytes(r), h);
    }
    Manifest {
        row_count: records.len(),
        checksum_xxh3: h,
    }
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.next_token.is_none()
    }

    /// Checks the manifest against the records, e.g. after reading a staged
    /// copy back.
    pub fn verify(&self) -> Result<(), ModelError> {
        if manifest_for(&self.records) == self.manifest {
            Ok(())
        } else {
            Err(ModelError::ManifestMismatch {
                batch_id: self.id.clone(),
            })
        }
    }

    /// Highest watermark among the records' cursor values.
    ///
    /// Every record must carry a parseable cursor; a single bad record fails
    /// the batch rather than silently shrinking its watermark.
    pub fn watermark(&self, cursor_field: &str) -> Result<Option<Watermark>, ModelError> {
        let mut max: Option<Watermark> = None;
        for (index, record) in self.records.iter().enumerate() {
            let wm = record
                .get(cursor_field)
                .and_then(Watermark::from_json)
                .ok_or_else(|| ModelError::MissingWatermark {
                    field: cursor_field.to_string(),
                    index,
                })?;
            if let Some(current) = &max
                && !current.same_kind(&wm)
            {
                return Err(ModelError::MissingWatermark {
                    field: cursor_field.to_string(),
                    index,
                });
            }
            max = match max {
                Some(current) if current >= wm => Some(current),
                _ => Some(wm),
            };
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(records: Vec<serde_json::Value>) -> Batch {
        let records: Vec<Record> = records
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        Batch {
            id: "b1".into(),
            entity: "fb.campaigns".into(),
            job_id: "j1".into(),
            seq: 0,
            page_token: None,
            next_token: None,
            manifest: manifest_for(&records),
            records,
            schema_version: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn watermark_is_max_cursor() {
        let b = batch(vec![
            json!({"date": "2025-06-02"}),
            json!({"date": "2025-06-05"}),
            json!({"date": "2025-06-01"}),
        ]);
        assert_eq!(
            b.watermark("date").unwrap(),
            Some("2025-06-05".parse().unwrap())
        );
    }

    #[test]
    fn watermark_requires_every_cursor() {
        let b = batch(vec![json!({"date": "2025-06-02"}), json!({"other": 1})]);
        assert!(matches!(
            b.watermark("date"),
            Err(ModelError::MissingWatermark { index: 1, .. })
        ));
    }

    #[test]
    fn manifest_detects_tampering() {
        let mut b = batch(vec![json!({"id": 1}), json!({"id": 2})]);
        assert!(b.verify().is_ok());
        b.records.pop();
        assert!(b.verify().is_err());
    }

    #[test]
    fn checksum_depends_on_order() {
        let a = batch(vec![json!({"id": 1}), json!({"id": 2})]);
        let b = batch(vec![json!({"id": 2}), json!({"id": 1})]);
        assert_ne!(a.manifest.checksum_xxh3, b.manifest.checksum_xxh3);
    }
}
