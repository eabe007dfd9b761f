use chrono::Utc;
use engine_config::settings::BreakerConfig;
use engine_core::state::StateStore;
use model::{core::identifiers::EntityId, execution::breaker::BreakerSnapshot};
use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{error, info, warn};

/// Per-entity breaker: opens after `threshold` consecutive exhausted retry
/// rounds and rejects calls until `cooldown` has passed.
///
/// Once the cooldown elapses the breaker is half-open: one call goes
/// through, a success closes it and another failure opens it again.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    cooldown: Duration,
    open_until: Option<Instant>,
    half_open: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed { failures: u32 },
    Open { remaining: Duration },
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            cooldown,
            open_until: None,
            half_open: false,
        }
    }

    pub fn default_source() -> Self {
        Self::new(3, Duration::from_secs(300))
    }

    /// Rebuilds a breaker from persisted state. A cooldown that ran out while
    /// no job was running leaves the breaker half-open.
    pub fn restore(threshold: u32, cooldown: Duration, saved: &BreakerSnapshot) -> Self {
        let mut breaker = Self::new(threshold, cooldown);
        breaker.consecutive_failures = saved.consecutive_failures;
        breaker.half_open = saved.half_open;
        if let Some(until) = saved.open_until {
            match (until - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => {
                    breaker.open_until = Some(Instant::now() + remaining);
                }
                _ => breaker.half_open = true,
            }
        }
        breaker
    }

    pub fn snapshot(&self, entity: &EntityId) -> BreakerSnapshot {
        let now = Utc::now();
        let open_until = self.open_until.map(|until| {
            let remaining = until.saturating_duration_since(Instant::now());
            now + chrono::Duration::from_std(remaining)
                .unwrap_or_else(|_| chrono::Duration::zero())
        });
        BreakerSnapshot {
            entity: entity.clone(),
            consecutive_failures: self.consecutive_failures,
            open_until,
            half_open: self.half_open,
            updated_at: now,
        }
    }

    /// `Err(remaining)` while the breaker is open.
    pub fn check(&mut self) -> Result<(), Duration> {
        match self.open_until {
            Some(until) => {
                let now = Instant::now();
                if now < until {
                    Err(until - now)
                } else {
                    self.open_until = None;
                    self.half_open = true;
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    pub fn record_failure(&mut self) -> CircuitBreakerState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.half_open || self.consecutive_failures >= self.threshold {
            self.half_open = false;
            self.open_until = Some(Instant::now() + self.cooldown);
            CircuitBreakerState::Open {
                remaining: self.cooldown,
            }
        } else {
            CircuitBreakerState::Closed {
                failures: self.consecutive_failures,
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
        self.half_open = false;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_open(&self) -> bool {
        self.open_until.is_some_and(|until| Instant::now() < until)
    }
}

/// Breakers for every entity, shared by all jobs so an open breaker
/// outlives the job that tripped it. With a state store attached the state
/// is written through on every transition and read back the first time an
/// entity is seen, so it also outlives the process.
pub struct BreakerRegistry {
    threshold: u32,
    cooldown: Duration,
    breakers: Mutex<HashMap<EntityId, CircuitBreaker>>,
    store: Option<Arc<dyn StateStore>>,
}

impl BreakerRegistry {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            breakers: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn check(&self, entity: &EntityId) -> Result<(), Duration> {
        let mut breakers = self.breakers.lock().await;
        let breaker = self.breaker(&mut breakers, entity).await;
        let was_open = breaker.open_until.is_some();
        breaker.check()?;
        if was_open {
            info!(entity = %entity, "circuit breaker half-open");
            self.persist(entity, breaker).await;
        }
        Ok(())
    }

    pub async fn record_failure(&self, entity: &EntityId) -> CircuitBreakerState {
        let mut breakers = self.breakers.lock().await;
        let breaker = self.breaker(&mut breakers, entity).await;
        let state = breaker.record_failure();
        if let CircuitBreakerState::Open { remaining } = state {
            error!(
                entity = %entity,
                failures = breaker.consecutive_failures(),
                cooldown_ms = remaining.as_millis() as u64,
                "circuit breaker opened"
            );
        }
        self.persist(entity, breaker).await;
        state
    }

    pub async fn record_success(&self, entity: &EntityId) {
        let mut breakers = self.breakers.lock().await;
        let breaker = self.breaker(&mut breakers, entity).await;
        if breaker.consecutive_failures() == 0 && !breaker.half_open {
            return;
        }
        info!(entity = %entity, "circuit breaker closed");
        breaker.record_success();
        self.persist(entity, breaker).await;
    }

    pub async fn is_open(&self, entity: &EntityId) -> bool {
        let mut breakers = self.breakers.lock().await;
        self.breaker(&mut breakers, entity).await.is_open()
    }

    async fn breaker<'a>(
        &self,
        breakers: &'a mut HashMap<EntityId, CircuitBreaker>,
        entity: &EntityId,
    ) -> &'a mut CircuitBreaker {
        match breakers.entry(entity.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(self.load(entity).await),
        }
    }

    async fn load(&self, entity: &EntityId) -> CircuitBreaker {
        let saved = match &self.store {
            Some(store) => store.load_breaker(entity).await.unwrap_or_else(|error| {
                warn!(entity = %entity, %error, "Failed to load circuit breaker state");
                None
            }),
            None => None,
        };
        match saved {
            Some(saved) => CircuitBreaker::restore(self.threshold, self.cooldown, &saved),
            None => CircuitBreaker::new(self.threshold, self.cooldown),
        }
    }

    // Store errors never fail the job; the in-memory breaker stays authoritative.
    async fn persist(&self, entity: &EntityId, breaker: &CircuitBreaker) {
        if let Some(store) = &self.store
            && let Err(error) = store.save_breaker(&breaker.snapshot(entity)).await
        {
            warn!(entity = %entity, %error, "Failed to persist circuit breaker state");
        }
    }
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::state::sled_store::SledStateStore;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_during_cooldown() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(60));
        assert_eq!(cb.record_failure(), CircuitBreakerState::Closed { failures: 1 });
        assert!(cb.check().is_ok());
        assert!(matches!(cb.record_failure(), CircuitBreakerState::Open { .. }));

        tokio::time::advance(Duration::from_secs(10)).await;
        let remaining = cb.check().unwrap_err();
        assert_eq!(remaining, Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_immediately() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(5));
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cb.check().is_ok());
        assert!(matches!(cb.record_failure(), CircuitBreakerState::Open { .. }));
        assert!(cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_count() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(5));
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.record_failure(), CircuitBreakerState::Closed { failures: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn registry_isolates_entities() {
        let registry = BreakerRegistry::new(1, Duration::from_secs(30));
        let fb = EntityId::new("fb.campaigns");
        let tt = EntityId::new("tiktok.ads");

        registry.record_failure(&fb).await;
        assert!(registry.check(&fb).await.is_err());
        assert!(registry.check(&tt).await.is_ok());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(registry.check(&fb).await.is_ok());
        registry.record_success(&fb).await;
        assert!(!registry.is_open(&fb).await);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_is_restored_by_a_fresh_registry() {
        let store: Arc<dyn StateStore> = Arc::new(SledStateStore::temporary().unwrap());
        let fb = EntityId::new("fb.campaigns");

        let first = BreakerRegistry::new(2, Duration::from_secs(300)).with_store(store.clone());
        first.record_failure(&fb).await;
        assert!(first.check(&fb).await.is_ok());
        assert!(matches!(
            first.record_failure(&fb).await,
            CircuitBreakerState::Open { .. }
        ));
        drop(first);

        let second = BreakerRegistry::new(2, Duration::from_secs(300)).with_store(store.clone());
        let remaining = second.check(&fb).await.unwrap_err();
        assert!(remaining > Duration::from_secs(290));

        let saved = store.load_breaker(&fb).await.unwrap().unwrap();
        assert_eq!(saved.consecutive_failures, 2);
        assert!(saved.is_open_at(Utc::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_cooldown_restores_half_open() {
        let store: Arc<dyn StateStore> = Arc::new(SledStateStore::temporary().unwrap());
        let fb = EntityId::new("fb.campaigns");
        store
            .save_breaker(&BreakerSnapshot {
                consecutive_failures: 3,
                open_until: Some(Utc::now() - chrono::Duration::seconds(5)),
                ..BreakerSnapshot::closed(fb.clone())
            })
            .await
            .unwrap();

        let registry = BreakerRegistry::new(5, Duration::from_secs(60)).with_store(store.clone());
        assert!(registry.check(&fb).await.is_ok());
        // one failed trial call reopens it, well below the threshold
        assert!(matches!(
            registry.record_failure(&fb).await,
            CircuitBreakerState::Open { .. }
        ));

        let fresh = BreakerRegistry::new(5, Duration::from_secs(60)).with_store(store);
        assert!(fresh.check(&fb).await.is_err());
    }
}
