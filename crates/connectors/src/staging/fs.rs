use crate::staging::validate_path;
use async_trait::async_trait;
use engine_core::{connectors::staging::StagingStore, error::StagingError};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

/// Staging objects stored as files under a root directory.
///
/// Objects are written to a temporary sibling, synced and then renamed into
/// place, so a reader never observes a partially written object.
pub struct FsStagingStore {
    root: PathBuf,
}

impl FsStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StagingError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl StagingStore for FsStagingStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StagingError> {
        let target = self.resolve(path)?;

        match fs::read(&target).await {
            Ok(existing) if existing == bytes => return Ok(()),
            Ok(_) => return Err(StagingError::AlreadyExists(path.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = target.with_extension(format!("tmp-{}", std::process::id()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &target).await?;

        debug!(path, bytes = bytes.len(), "Staged object written");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StagingError> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StagingError::NotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StagingError> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await?)
    }
}
