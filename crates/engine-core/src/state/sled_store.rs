use crate::{
    error::StateError,
    state::{CheckpointAdvance, StateStore},
};
use async_trait::async_trait;
use chrono::Utc;
use model::{
    core::{identifiers::EntityId, watermark::Watermark},
    events::sync::SyncEvent,
    execution::{breaker::BreakerSnapshot, checkpoint::Checkpoint, quarantine::QuarantineRecord},
    records::staged::StagedBatch,
    schema::{field_map::FieldMap, version::SchemaVersion},
};
use serde::de::DeserializeOwned;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use std::path::Path;
use tracing::debug;

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory store that disappears on drop.
    pub fn temporary() -> Result<Self, StateError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    #[inline]
    fn chk_key(entity: &EntityId) -> String {
        format!("chk:{entity}")
    }

    #[inline]
    fn schema_key(entity: &EntityId, version: u32) -> String {
        format!("sch:{entity}:{version:010}")
    }

    #[inline]
    fn schema_latest_key(entity: &EntityId) -> String {
        format!("schl:{entity}")
    }

    #[inline]
    fn quarantine_key(batch_id: &str) -> String {
        format!("qua:{batch_id}")
    }

    #[inline]
    fn staged_key(entity: &EntityId, batch_id: &str) -> String {
        format!("stg:{entity}:{batch_id}")
    }

    #[inline]
    fn breaker_key(entity: &EntityId) -> String {
        format!("brk:{entity}")
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StateError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (_key, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn abort(err: impl Into<StateError>) -> ConflictableTransactionError<StateError> {
        ConflictableTransactionError::Abort(err.into())
    }

    fn unwrap_tx<T>(result: Result<T, TransactionError<StateError>>) -> Result<T, StateError> {
        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StateError::Storage(e)),
        }
    }
}

fn describe(watermark: Option<&Watermark>) -> String {
    watermark.map_or_else(|| "none".to_string(), |w| w.to_string())
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn load_checkpoint(&self, entity: &EntityId) -> Result<Option<Checkpoint>, StateError> {
        self.get(&Self::chk_key(entity))
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StateError> {
        self.scan("chk:")
    }

    async fn advance_checkpoint(
        &self,
        entity: &EntityId,
        expected: Option<&Watermark>,
        proposed: &Watermark,
    ) -> Result<CheckpointAdvance, StateError> {
        let key = Self::chk_key(entity);
        let candidate = Checkpoint::new(entity.clone(), proposed.clone());
        let new_bytes = bincode::serialize(&candidate)?;

        // Check-then-set inside one transaction so two writers racing on the
        // same entity cannot both win.
        let result = self.db.transaction(
            |tx_db| -> ConflictableTransactionResult<CheckpointAdvance, StateError> {
                let existing = match tx_db.get(&key)? {
                    Some(bytes) => Some(
                        bincode::deserialize::<Checkpoint>(&bytes).map_err(Self::abort)?,
                    ),
                    None => None,
                };
                let current = existing.as_ref().map(|cp| &cp.watermark);

                if let Some(current) = current
                    && !current.same_kind(proposed)
                {
                    return Err(Self::abort(StateError::WatermarkKind {
                        entity: entity.to_string(),
                        stored: current.to_string(),
                        proposed: proposed.to_string(),
                    }));
                }

                if current != expected {
                    return Err(Self::abort(StateError::Conflict {
                        key: key.clone(),
                        expected: describe(expected),
                        found: describe(current),
                    }));
                }

                if let Some(cp) = existing
                    && cp.watermark >= *proposed
                {
                    return Ok(CheckpointAdvance::Behind(cp));
                }

                tx_db.insert(key.as_bytes(), new_bytes.as_slice())?;
                Ok(CheckpointAdvance::Advanced(candidate.clone()))
            },
        );

        let outcome = Self::unwrap_tx(result)?;
        if outcome.is_advanced() {
            self.db.flush()?;
            debug!(entity = %entity, watermark = %proposed, "Checkpoint advanced");
        }
        Ok(outcome)
    }

    async fn latest_schema(&self, entity: &EntityId) -> Result<Option<SchemaVersion>, StateError> {
        match self.get::<u32>(&Self::schema_latest_key(entity))? {
            Some(version) => self.get(&Self::schema_key(entity, version)),
            None => Ok(None),
        }
    }

    async fn schema_version(
        &self,
        entity: &EntityId,
        version: u32,
    ) -> Result<Option<SchemaVersion>, StateError> {
        self.get(&Self::schema_key(entity, version))
    }

    async fn list_schemas(&self, entity: &EntityId) -> Result<Vec<SchemaVersion>, StateError> {
        self.scan(&format!("sch:{entity}:"))
    }

    async fn append_schema(
        &self,
        entity: &EntityId,
        expected_latest: Option<u32>,
        fields: FieldMap,
    ) -> Result<SchemaVersion, StateError> {
        let latest_key = Self::schema_latest_key(entity);
        let created_at = Utc::now();

        let result = self.db.transaction(
            |tx_db| -> ConflictableTransactionResult<SchemaVersion, StateError> {
                let latest = match tx_db.get(&latest_key)? {
                    Some(bytes) => Some(bincode::deserialize::<u32>(&bytes).map_err(Self::abort)?),
                    None => None,
                };

                if latest != expected_latest {
                    return Err(Self::abort(StateError::Conflict {
                        key: latest_key.clone(),
                        expected: format!("{expected_latest:?}"),
                        found: format!("{latest:?}"),
                    }));
                }

                let version = SchemaVersion {
                    entity: entity.clone(),
                    version: latest.map_or(1, |v| v + 1),
                    fields: fields.clone(),
                    created_at,
                };
                let bytes = bincode::serialize(&version).map_err(Self::abort)?;
                let latest_bytes = bincode::serialize(&version.version).map_err(Self::abort)?;

                tx_db.insert(
                    Self::schema_key(entity, version.version).as_bytes(),
                    bytes.as_slice(),
                )?;
                tx_db.insert(latest_key.as_bytes(), latest_bytes.as_slice())?;
                Ok(version)
            },
        );

        let version = Self::unwrap_tx(result)?;
        self.db.flush()?;
        Ok(version)
    }

    async fn put_quarantine(&self, record: &QuarantineRecord) -> Result<(), StateError> {
        let value = bincode::serialize(record)?;
        self.db
            .insert(Self::quarantine_key(&record.batch_id), value)?;
        self.db.flush()?;
        Ok(())
    }

    async fn list_quarantine(
        &self,
        entity: Option<&EntityId>,
    ) -> Result<Vec<QuarantineRecord>, StateError> {
        let mut records: Vec<QuarantineRecord> = self.scan("qua:")?;
        if let Some(entity) = entity {
            records.retain(|r| &r.entity == entity);
        }
        records.sort_by(|a, b| a.quarantined_at.cmp(&b.quarantined_at));
        Ok(records)
    }

    async fn resolve_quarantine(&self, batch_id: &str) -> Result<QuarantineRecord, StateError> {
        let key = Self::quarantine_key(batch_id);
        let mut record: QuarantineRecord = self
            .get(&key)?
            .ok_or_else(|| StateError::QuarantineNotFound(batch_id.to_string()))?;

        if record.resolved_at.is_none() {
            record.resolved_at = Some(Utc::now());
            self.db.insert(key, bincode::serialize(&record)?)?;
            self.db.flush()?;
        }
        Ok(record)
    }

    async fn put_staged(&self, staged: &StagedBatch) -> Result<(), StateError> {
        let key = Self::staged_key(&staged.entity, &staged.batch_id);
        self.db.insert(key, bincode::serialize(staged)?)?;
        self.db.flush()?;
        Ok(())
    }

    async fn list_staged(&self, entity: &EntityId) -> Result<Vec<StagedBatch>, StateError> {
        let mut staged: Vec<StagedBatch> = self.scan(&format!("stg:{entity}:"))?;
        staged.sort_by(|a, b| (a.staged_at, a.seq).cmp(&(b.staged_at, b.seq)));
        Ok(staged)
    }

    async fn delete_staged(&self, entity: &EntityId, batch_id: &str) -> Result<(), StateError> {
        self.db.remove(Self::staged_key(entity, batch_id))?;
        Ok(())
    }

    async fn load_breaker(
        &self,
        entity: &EntityId,
    ) -> Result<Option<BreakerSnapshot>, StateError> {
        self.get(&Self::breaker_key(entity))
    }

    async fn save_breaker(&self, snapshot: &BreakerSnapshot) -> Result<(), StateError> {
        self.db.insert(
            Self::breaker_key(&snapshot.entity),
            bincode::serialize(snapshot)?,
        )?;
        self.db.flush()?;
        Ok(())
    }

    async fn append_event(&self, event: &SyncEvent) -> Result<(), StateError> {
        // generate_id is monotonic across restarts, so keys sort in append order.
        let seq = self.db.generate_id()?;
        let key = format!("evt:{}:{seq:020}", event.entity());
        self.db.insert(key, bincode::serialize(event)?)?;
        Ok(())
    }

    async fn events(&self, entity: &EntityId, limit: usize) -> Result<Vec<SyncEvent>, StateError> {
        let mut events = Vec::with_capacity(limit);
        for item in self.db.scan_prefix(format!("evt:{entity}:")).rev().take(limit) {
            let (_key, value) = item?;
            events.push(bincode::deserialize(&value)?);
        }
        events.reverse();
        Ok(events)
    }
}
