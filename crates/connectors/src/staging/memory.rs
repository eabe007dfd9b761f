use crate::staging::validate_path;
use async_trait::async_trait;
use engine_core::{connectors::staging::StagingStore, error::StagingError};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;

/// In-process staging store. Can be switched offline to exercise
/// storage-unavailable paths.
#[derive(Default)]
pub struct MemoryStagingStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    fn check_online(&self) -> Result<(), StagingError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StagingError::Unavailable("staging store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StagingError> {
        validate_path(path)?;
        self.check_online()?;

        let mut objects = self.objects.write().await;
        match objects.get(path) {
            Some(existing) if existing.as_slice() == bytes => Ok(()),
            Some(_) => Err(StagingError::AlreadyExists(path.to_string())),
            None => {
                objects.insert(path.to_string(), bytes.to_vec());
                Ok(())
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StagingError> {
        self.check_online()?;
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StagingError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StagingError> {
        self.check_online()?;
        Ok(self.objects.read().await.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_store_rejects_writes() {
        let store = MemoryStagingStore::new();
        store.put("a/b.json", b"{}").await.unwrap();

        store.set_offline(true);
        assert!(matches!(
            store.put("a/c.json", b"{}").await,
            Err(StagingError::Unavailable(_))
        ));

        store.set_offline(false);
        assert_eq!(store.paths().await, vec!["a/b.json".to_string()]);
        assert!(matches!(
            store.put("a/b.json", b"[]").await,
            Err(StagingError::AlreadyExists(_))
        ));
    }
}
