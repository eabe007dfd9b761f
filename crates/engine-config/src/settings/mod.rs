use engine_core::retry::RetryPolicy;
use model::core::{identifiers::EntityId, watermark::Watermark};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

pub mod validator;

/// Root of `adsync.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdSyncConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl AdSyncConfig {
    /// Every configured entity together with the source it belongs to.
    pub fn entities(&self) -> impl Iterator<Item = (&SourceConfig, &EntityConfig)> {
        self.sources
            .iter()
            .flat_map(|source| source.entities.iter().map(move |entity| (source, entity)))
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities()
            .map(|(source, entity)| entity.id(source))
            .collect()
    }

    pub fn find_entity(&self, id: &EntityId) -> Option<(&SourceConfig, &EntityConfig)> {
        self.entities().find(|(source, entity)| &entity.id(source) == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingKind {
    #[default]
    Fs,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagingConfig {
    #[serde(default)]
    pub kind: StagingKind,
    #[serde(default = "default_staging_path")]
    pub path: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            kind: StagingKind::default(),
            path: default_staging_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub kind: WarehouseKind,
    /// Name of the secret holding the connection string.
    #[serde(default)]
    pub url_credential: Option<String>,
    #[serde(default = "default_warehouse_schema")]
    pub schema: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            kind: WarehouseKind::default(),
            url_credential: None,
            schema: default_warehouse_schema(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_entities")]
    pub max_concurrent_entities: usize,
}

impl SyncConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
            max_concurrent_entities: default_max_concurrent_entities(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_total_wait_ms")]
    pub max_total_wait_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_max_total_wait(Duration::from_millis(self.max_total_wait_ms))
        .with_jitter(self.jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_total_wait_ms: default_max_total_wait_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive exhausted retry rounds before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    /// Name of the secret holding the bearer token.
    pub credential: String,
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[default]
    Nested,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub layout: LayoutKind,
    #[serde(default = "default_records_key")]
    pub records_key: String,
    pub cursor_field: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Used when the entity has no checkpoint yet.
    #[serde(default)]
    pub start_watermark: Option<String>,
}

impl EntityConfig {
    pub fn id(&self, source: &SourceConfig) -> EntityId {
        EntityId::qualified(&source.name, &self.name)
    }

    /// The parsed start watermark. Validation guarantees it parses.
    pub fn initial_watermark(&self) -> Option<Watermark> {
        self.start_watermark.as_deref().and_then(|s| s.parse().ok())
    }
}

fn adsync_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".adsync")
}

fn default_state_path() -> PathBuf {
    adsync_home().join("state")
}

fn default_staging_path() -> PathBuf {
    adsync_home().join("staging")
}

fn default_warehouse_schema() -> String {
    "raw".to_string()
}

fn default_run_timeout_secs() -> u64 {
    900
}

fn default_max_concurrent_entities() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_total_wait_ms() -> u64 {
    120_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_burst() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_records_key() -> String {
    "records".to_string()
}
