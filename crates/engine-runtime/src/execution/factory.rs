use crate::{
    error::SyncError,
    execution::context::{EntityPipeline, SyncContext},
};
use connectors::{
    http::{HttpAdSource, ResponseLayout},
    staging::{FsStagingStore, MemoryStagingStore},
    warehouse::{MemoryWarehouse, PostgresWarehouse},
};
use engine_config::settings::{
    AdSyncConfig, EntityConfig, LayoutKind, SourceConfig, StagingKind, WarehouseKind,
};
use engine_core::{
    connectors::{
        secrets::SecretStore, source::AdSource, staging::StagingStore, warehouse::Warehouse,
    },
    rate_limit::RateLimiter,
    state::{StateStore, sled_store::SledStateStore},
};
use engine_processing::{cb::BreakerRegistry, loader::LoadTarget};
use model::core::identifiers::EntityId;
use std::sync::Arc;
use tracing::info;

pub fn open_state(config: &AdSyncConfig) -> Result<Arc<SledStateStore>, SyncError> {
    let state = SledStateStore::open(&config.state.path)?;
    info!(path = %config.state.path.display(), "Opened state store");
    Ok(Arc::new(state))
}

pub fn create_staging(config: &AdSyncConfig) -> Arc<dyn StagingStore> {
    match config.staging.kind {
        StagingKind::Fs => Arc::new(FsStagingStore::new(&config.staging.path)),
        StagingKind::Memory => Arc::new(MemoryStagingStore::new()),
    }
}

pub async fn create_warehouse(
    config: &AdSyncConfig,
    secrets: &dyn SecretStore,
) -> Result<Arc<dyn Warehouse>, SyncError> {
    match config.warehouse.kind {
        WarehouseKind::Memory => Ok(Arc::new(MemoryWarehouse::new())),
        WarehouseKind::Postgres => {
            let name = config.warehouse.url_credential.as_deref().ok_or_else(|| {
                SyncError::Initialization(
                    "warehouse.url_credential is required for a postgres warehouse".to_string(),
                )
            })?;
            let url = secrets.get_credential(name).await?;
            let warehouse =
                PostgresWarehouse::connect(url.expose(), config.warehouse.schema.clone()).await?;
            info!(schema = %config.warehouse.schema, "Connected to postgres warehouse");
            Ok(Arc::new(warehouse))
        }
    }
}

pub fn create_source(
    source: &SourceConfig,
    entity: &EntityConfig,
    secrets: Arc<dyn SecretStore>,
) -> Result<Arc<dyn AdSource>, SyncError> {
    let layout = match entity.layout {
        LayoutKind::Nested => ResponseLayout::Nested,
        LayoutKind::Flat => ResponseLayout::Flat {
            records_key: entity.records_key.clone(),
        },
    };
    let mut builder = HttpAdSource::builder(&source.base_url, &entity.path)
        .credential(source.credential.clone())
        .timeout(source.request_timeout())
        .layout(layout);
    if let Some(identifier) = &entity.identifier {
        builder = builder.identifier(identifier.clone());
    }
    Ok(Arc::new(builder.build(secrets)?))
}

pub fn create_pipeline(
    config: &AdSyncConfig,
    id: &EntityId,
    secrets: Arc<dyn SecretStore>,
) -> Result<EntityPipeline, SyncError> {
    let (source, entity) = config
        .find_entity(id)
        .ok_or_else(|| SyncError::UnknownEntity(id.clone()))?;

    let target = LoadTarget::new(id.clone(), entity.cursor_field.clone())
        .with_primary_key(entity.primary_key.clone());
    let limiter = RateLimiter::new(source.requests_per_second, source.burst);

    Ok(
        EntityPipeline::new(create_source(source, entity, secrets)?, target)
            .with_limiter(Arc::new(limiter))
            .with_start_watermark(entity.initial_watermark()),
    )
}

/// Wires the shared collaborators described by `config`.
pub async fn create_context(
    config: &AdSyncConfig,
    secrets: &dyn SecretStore,
) -> Result<SyncContext, SyncError> {
    let state: Arc<dyn StateStore> = open_state(config)?;
    let staging = create_staging(config);
    let warehouse = create_warehouse(config, secrets).await?;
    let breakers = BreakerRegistry::from_config(&config.breaker).with_store(state.clone());

    Ok(SyncContext::new(state, staging, warehouse)
        .with_breakers(Arc::new(breakers))
        .with_retry(config.retry.policy())
        .with_run_timeout(config.sync.run_timeout()))
}
