use crate::{
    error::ConfigError,
    settings::{AdSyncConfig, EntityConfig, SourceConfig, WarehouseKind},
};
use model::core::watermark::Watermark;
use std::collections::HashSet;
use tracing::{info, warn};

/// Checks a parsed config and collects every problem before failing, so an
/// operator can fix them in one pass.
pub struct ConfigValidator<'a> {
    config: &'a AdSyncConfig,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(config: &'a AdSyncConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_sync(&mut errors);
        self.validate_retry(&mut errors);
        self.validate_breaker(&mut errors);
        self.validate_warehouse(&mut errors);
        self.validate_sources(&mut errors);

        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed(errors));
        }

        info!(
            sources = self.config.sources.len(),
            entities = self.config.entities().count(),
            "Configuration validated"
        );
        Ok(())
    }

    fn validate_sync(&self, errors: &mut Vec<String>) {
        let sync = &self.config.sync;
        if sync.run_timeout_secs == 0 {
            errors.push("sync.run_timeout_secs must be positive".to_string());
        }
        if sync.max_concurrent_entities == 0 {
            errors.push("sync.max_concurrent_entities must be at least 1".to_string());
        }
    }

    fn validate_retry(&self, errors: &mut Vec<String>) {
        let retry = &self.config.retry;
        if retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            errors.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                retry.base_delay_ms, retry.max_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            errors.push(format!("retry.jitter must be within 0..=1, got {}", retry.jitter));
        }
        if retry.max_total_wait_ms < retry.base_delay_ms {
            warn!(
                max_total_wait_ms = retry.max_total_wait_ms,
                base_delay_ms = retry.base_delay_ms,
                "Total wait budget is below the base delay, retries will never wait"
            );
        }
    }

    fn validate_breaker(&self, errors: &mut Vec<String>) {
        if self.config.breaker.failure_threshold == 0 {
            errors.push("breaker.failure_threshold must be at least 1".to_string());
        }
    }

    fn validate_warehouse(&self, errors: &mut Vec<String>) {
        let warehouse = &self.config.warehouse;
        if warehouse.kind == WarehouseKind::Postgres && warehouse.url_credential.is_none() {
            errors.push("warehouse.url_credential is required for postgres".to_string());
        }
        if !is_identifier(&warehouse.schema) {
            errors.push(format!("invalid warehouse schema '{}'", warehouse.schema));
        }
    }

    fn validate_sources(&self, errors: &mut Vec<String>) {
        if self.config.sources.is_empty() {
            warn!("No sources configured");
        }

        let mut seen = HashSet::new();
        for source in &self.config.sources {
            self.validate_source(source, errors);
            for entity in &source.entities {
                let id = entity.id(source);
                if !seen.insert(id.clone()) {
                    errors.push(format!("duplicate entity '{id}'"));
                }
                self.validate_entity(source, entity, errors);
            }
        }
    }

    fn validate_source(&self, source: &SourceConfig, errors: &mut Vec<String>) {
        if !is_identifier(&source.name) {
            errors.push(format!(
                "source name '{}' may only contain letters, digits, '_' and '-'",
                source.name
            ));
        }
        if !(source.base_url.starts_with("http://") || source.base_url.starts_with("https://")) {
            errors.push(format!(
                "source '{}': base_url must be an http(s) URL",
                source.name
            ));
        }
        if source.credential.trim().is_empty() {
            errors.push(format!("source '{}': credential is empty", source.name));
        }
        if !(source.requests_per_second > 0.0 && source.requests_per_second.is_finite()) {
            errors.push(format!(
                "source '{}': requests_per_second must be positive",
                source.name
            ));
        }
        if source.burst == 0 {
            errors.push(format!("source '{}': burst must be at least 1", source.name));
        }
        if source.request_timeout_secs == 0 {
            errors.push(format!(
                "source '{}': request_timeout_secs must be positive",
                source.name
            ));
        }
        if source.entities.is_empty() {
            warn!(source = %source.name, "Source has no entities");
        }
    }

    fn validate_entity(&self, source: &SourceConfig, entity: &EntityConfig, errors: &mut Vec<String>) {
        let id = entity.id(source);
        if !is_identifier(&entity.name) {
            errors.push(format!(
                "entity '{id}': name may only contain letters, digits, '_' and '-'"
            ));
        }
        if entity.cursor_field.trim().is_empty() {
            errors.push(format!("entity '{id}': cursor_field is empty"));
        }
        if entity.primary_key.iter().any(|k| k.trim().is_empty()) {
            errors.push(format!("entity '{id}': primary_key contains an empty field"));
        }
        if let Some(start) = &entity.start_watermark
            && start.parse::<Watermark>().is_err()
        {
            errors.push(format!(
                "entity '{id}': start_watermark '{start}' is not a date, timestamp or sequence"
            ));
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
