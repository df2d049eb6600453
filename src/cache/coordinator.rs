//! Three-tier cache coordination.

use super::backend::{CacheTier, ColdStore, CompactionReport};
use super::entry::{CacheEntry, TierKind, TtlPolicy};
use super::key::CacheKey;
use super::memory::MemoryTier;
use crate::clock::SharedClock;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Timeouts and expiry for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub ttl: TtlPolicy,
    /// Upper bound for any single warm-tier call.
    pub warm_timeout: Duration,
    /// Upper bound for any single cold-tier call on the request path.
    pub cold_timeout: Duration,
    /// Consecutive warm failures before the tier is skipped for `warm_cooldown`.
    pub warm_failure_threshold: u32,
    pub warm_cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::default(),
            warm_timeout: Duration::from_millis(150),
            cold_timeout: Duration::from_secs(1),
            warm_failure_threshold: 3,
            warm_cooldown: Duration::from_secs(30),
        }
    }
}

/// Entry counts per tier. `None` means the tier is disabled or did not answer in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierSizes {
    pub memory: usize,
    pub warm: Option<usize>,
    pub cold: Option<usize>,
}

/// Unifies memory, warm and cold tiers behind one get/set contract.
///
/// Reads probe memory, then warm, then cold; a hit below memory is promoted
/// into memory in the background. Writes land in memory synchronously, in the
/// warm tier best-effort in the background, and in the cold tier before `set`
/// returns. Warm and cold failures never surface from `get`; a dead warm tier
/// is detected per call (bounded by `warm_timeout`) and then skipped for a
/// cooldown by a circuit breaker.
pub struct CacheCoordinator {
    memory: Arc<MemoryTier>,
    warm: Arc<dyn CacheTier>,
    cold: Arc<dyn ColdStore>,
    config: CoordinatorConfig,
    warm_breaker: Arc<CircuitBreaker>,
    clock: SharedClock,
}

impl CacheCoordinator {
    pub fn new(
        memory: Arc<MemoryTier>,
        warm: Arc<dyn CacheTier>,
        cold: Arc<dyn ColdStore>,
        config: CoordinatorConfig,
        clock: SharedClock,
    ) -> Self {
        let warm_breaker = Arc::new(CircuitBreaker::new(
            "warm_tier",
            CircuitBreakerConfig::new()
                .with_failure_threshold(config.warm_failure_threshold)
                .with_cooldown(config.warm_cooldown),
        ));
        Self {
            memory,
            warm,
            cold,
            config,
            warm_breaker,
            clock,
        }
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.config.ttl
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn tier_enabled(&self, tier: TierKind) -> bool {
        match tier {
            TierKind::Memory => true,
            TierKind::Warm => self.warm.is_enabled(),
            TierKind::Cold => self.cold.is_enabled(),
        }
    }

    pub fn warm_health(&self) -> CircuitBreakerSnapshot {
        self.warm_breaker.snapshot()
    }

    /// Fires when the cold tier goes over its size cap.
    pub fn compaction_signal(&self) -> Option<Arc<Notify>> {
        self.cold.pressure()
    }

    /// Look `key` up tier by tier. The returned entry's `tier_origin` names the tier that served it.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get_sync(key) {
            debug!(key = %key, tier = "memory", "cache hit");
            return Some(entry);
        }
        if let Some(entry) = self.probe_warm(key).await {
            debug!(key = %key, tier = "warm", "cache hit");
            self.promote(&entry);
            return Some(entry);
        }
        if let Some(entry) = self.probe_cold(key).await {
            debug!(key = %key, tier = "cold", "cache hit");
            self.promote(&entry);
            return Some(entry);
        }
        debug!(key = %key, "cache miss");
        None
    }

    async fn probe_warm(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.warm.is_enabled() {
            return None;
        }
        if let Err(open) = self.warm_breaker.allow() {
            debug!(
                remaining_ms = open.remaining.as_millis() as u64,
                "warm tier skipped: breaker open"
            );
            return None;
        }
        match timeout(self.config.warm_timeout, self.warm.get(key)).await {
            Ok(Ok(found)) => {
                self.warm_breaker.on_success();
                found
            }
            Ok(Err(e)) => {
                self.warm_breaker.on_failure();
                warn!(key = %key, error = %e, "warm tier read failed; degrading to cold tier");
                None
            }
            Err(_) => {
                self.warm_breaker.on_failure();
                warn!(
                    key = %key,
                    timeout_ms = self.config.warm_timeout.as_millis() as u64,
                    "warm tier read timed out; degrading to cold tier"
                );
                None
            }
        }
    }

    async fn probe_cold(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.cold.is_enabled() {
            return None;
        }
        match timeout(self.config.cold_timeout, self.cold.get(key)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "cold tier read failed");
                None
            }
            Err(_) => {
                warn!(
                    key = %key,
                    timeout_ms = self.config.cold_timeout.as_millis() as u64,
                    "cold tier read timed out"
                );
                None
            }
        }
    }

    /// Copy a lower-tier hit into memory for at most its remaining lifetime.
    fn promote(&self, entry: &CacheEntry) {
        let now = self.clock.now_millis();
        let ttl = self.config.ttl.memory.min(entry.remaining_ttl(now));
        if ttl.is_zero() {
            return;
        }
        let memory = Arc::clone(&self.memory);
        let entry = entry.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.put(&entry, ttl).await {
                warn!(key = %entry.key, error = %e, "promotion into memory failed");
            }
        });
    }

    /// Write under the configured TTL policy.
    pub async fn set(&self, entry: &CacheEntry) -> Result<()> {
        let policy = self.config.ttl;
        self.set_with_policy(entry, &policy).await
    }

    /// Write to every tier. Returns once the cold tier has acknowledged the write.
    pub async fn set_with_policy(&self, entry: &CacheEntry, policy: &TtlPolicy) -> Result<()> {
        self.memory.put_sync(entry, policy.for_tier(TierKind::Memory));

        if self.warm.is_enabled() && self.warm_breaker.allow().is_ok() {
            let warm = Arc::clone(&self.warm);
            let breaker = Arc::clone(&self.warm_breaker);
            let entry = entry.clone();
            let ttl = policy.for_tier(TierKind::Warm);
            let limit = self.config.warm_timeout;
            tokio::spawn(async move {
                match timeout(limit, warm.put(&entry, ttl)).await {
                    Ok(Ok(())) => breaker.on_success(),
                    Ok(Err(e)) => {
                        breaker.on_failure();
                        warn!(key = %entry.key, error = %e, "warm tier write failed");
                    }
                    Err(_) => {
                        breaker.on_failure();
                        warn!(key = %entry.key, "warm tier write timed out");
                    }
                }
            });
        }

        if !self.cold.is_enabled() {
            return Ok(());
        }
        let cold_ttl = policy.for_tier(TierKind::Cold);
        match timeout(self.config.cold_timeout, self.cold.put(entry, cold_ttl)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::tier_unavailable(TierKind::Cold, e.to_string())),
            Err(_) => Err(Error::timeout("cold tier write", self.config.cold_timeout)),
        }
    }

    /// Remove `key` from every tier. Returns whether any tier held it.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let mut removed = self.memory.remove_sync(key);

        if self.warm.is_enabled() {
            match timeout(self.config.warm_timeout, self.warm.remove(key)).await {
                Ok(Ok(r)) => removed |= r,
                Ok(Err(e)) => warn!(key = %key, error = %e, "warm tier invalidate failed"),
                Err(_) => warn!(key = %key, "warm tier invalidate timed out"),
            }
        }

        if self.cold.is_enabled() {
            match timeout(self.config.cold_timeout, self.cold.remove(key)).await {
                Ok(Ok(r)) => removed |= r,
                Ok(Err(e)) => return Err(Error::tier_unavailable(TierKind::Cold, e.to_string())),
                Err(_) => return Err(Error::timeout("cold tier invalidate", self.config.cold_timeout)),
            }
        }
        Ok(removed)
    }

    /// Maintenance pass: purge expired memory entries and compact the cold tier.
    /// Runs from the compaction task or tooling, never on the request path.
    pub async fn compact(&self) -> Result<CompactionReport> {
        let purged = self.memory.purge_expired();
        if purged > 0 {
            debug!(purged, "memory tier purged expired entries");
        }
        self.cold.compact().await
    }

    pub async fn cold_total_size(&self) -> Result<u64> {
        self.cold.total_size().await
    }

    pub async fn tier_sizes(&self) -> TierSizes {
        let warm = if self.warm.is_enabled() {
            timeout(self.config.warm_timeout, self.warm.len())
                .await
                .ok()
                .and_then(|r| r.ok())
        } else {
            None
        };
        let cold = if self.cold.is_enabled() {
            timeout(self.config.cold_timeout, self.cold.len())
                .await
                .ok()
                .and_then(|r| r.ok())
        } else {
            None
        };
        TierSizes {
            memory: self.memory.len_sync(),
            warm,
            cold,
        }
    }
}
