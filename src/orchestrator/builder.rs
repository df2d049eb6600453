use super::single_flight::SingleFlight;
use super::{Inner, Orchestrator, OrchestratorSettings};
use crate::backend::{GenerationBackend, OllamaBackend, RemoteChatBackend};
use crate::cache::{
    CacheCoordinator, CacheKeyGenerator, CacheTier, ColdStore, MemoryTier, NullTier, SqliteColdTier,
    TierKind,
};
use crate::clock::{system_clock, SharedClock};
use crate::config::OrchestratorConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
use crate::routing::{ComplexityAnalyzer, ModelCatalog, ModelRouter};
use crate::search::{NoopSearch, SearchProvider};
use crate::stats::StatsCollector;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FLIGHT_SHARDS: usize = 64;

/// Assembles an [`Orchestrator`] from configuration.
///
/// Every collaborator can be replaced before [`OrchestratorBuilder::build`];
/// anything not replaced is constructed from the config.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    clock: Option<SharedClock>,
    warm: Option<Arc<dyn CacheTier>>,
    cold: Option<Arc<dyn ColdStore>>,
    local: Option<Arc<dyn GenerationBackend>>,
    remote: Option<Option<Arc<dyn GenerationBackend>>>,
    search: Option<Arc<dyn SearchProvider>>,
    stats: Option<Arc<StatsCollector>>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            clock: None,
            warm: None,
            cold: None,
            local: None,
            remote: None,
            search: None,
            stats: None,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_warm_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.warm = Some(tier);
        self
    }

    pub fn with_cold_tier(mut self, tier: Arc<dyn ColdStore>) -> Self {
        self.cold = Some(tier);
        self
    }

    pub fn with_local_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    /// `None` disables the remote backend regardless of configuration.
    pub fn with_remote_backend(mut self, backend: Option<Arc<dyn GenerationBackend>>) -> Self {
        self.remote = Some(backend);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    #[cfg(feature = "warm-redis")]
    fn default_warm(config: &OrchestratorConfig, clock: &SharedClock) -> Arc<dyn CacheTier> {
        if !config.cache.warm_enabled {
            return Arc::new(NullTier::new(TierKind::Warm));
        }
        match crate::cache::RedisWarmTier::new(&config.cache.redis_url, clock.clone()) {
            Ok(tier) => Arc::new(tier.with_max_memory_mb(config.cache.redis_max_memory_mb)),
            Err(e) => {
                warn!(error = %e, "warm tier disabled");
                Arc::new(NullTier::new(TierKind::Warm))
            }
        }
    }

    #[cfg(not(feature = "warm-redis"))]
    fn default_warm(config: &OrchestratorConfig, _clock: &SharedClock) -> Arc<dyn CacheTier> {
        if config.cache.warm_enabled {
            info!("built without warm-redis; running memory + cold only");
        }
        Arc::new(NullTier::new(TierKind::Warm))
    }

    /// Open the configured cache tiers on their own, without any backend.
    ///
    /// Used by maintenance tooling that compacts or invalidates entries.
    pub fn open_cache(config: &OrchestratorConfig) -> Result<Arc<CacheCoordinator>> {
        config.validate()?;
        Self::assemble_cache(config, &system_clock(), None, None)
    }

    fn assemble_cache(
        cfg: &OrchestratorConfig,
        clock: &SharedClock,
        warm: Option<Arc<dyn CacheTier>>,
        cold: Option<Arc<dyn ColdStore>>,
    ) -> Result<Arc<CacheCoordinator>> {
        let memory = Arc::new(MemoryTier::new(
            cfg.cache.memory_entries,
            cfg.cache.memory_shards,
            clock.clone(),
        ));
        let warm = match warm {
            Some(tier) => tier,
            None => Self::default_warm(cfg, clock),
        };
        let cold: Arc<dyn ColdStore> = match cold {
            Some(tier) => tier,
            None => Arc::new(SqliteColdTier::open(
                &cfg.cache.sqlite_path,
                cfg.cache.cold_max_bytes(),
                clock.clone(),
            )?),
        };
        Ok(Arc::new(CacheCoordinator::new(
            memory,
            warm,
            cold,
            cfg.cache.coordinator_config(),
            clock.clone(),
        )))
    }

    pub fn build(self) -> Result<Orchestrator> {
        let cfg = self.config;
        cfg.validate()?;
        let clock = self.clock.unwrap_or_else(system_clock);

        let cache = Self::assemble_cache(&cfg, &clock, self.warm, self.cold)?;

        let local: Arc<dyn GenerationBackend> = match self.local {
            Some(b) => b,
            None => {
                let mut backend = OllamaBackend::new(&cfg.local.base_url, cfg.local.model.clone(), &cfg.local_http())?
                    .with_context_length(cfg.local.context_length);
                if let Some(m) = &cfg.local.embedding_model {
                    backend = backend.with_embedding_model(m.clone());
                }
                Arc::new(backend)
            }
        };
        let remote: Option<Arc<dyn GenerationBackend>> = match self.remote {
            Some(explicit) => explicit,
            None if cfg.remote.is_configured() => Some(Arc::new(RemoteChatBackend::new(
                &cfg.remote.base_url,
                cfg.remote.api_key.clone(),
                cfg.remote.default_model.clone(),
                &cfg.remote_http(),
            )?)),
            None => None,
        };

        let catalog = Arc::new(ModelCatalog::new(
            cfg.remote.default_model.clone(),
            cfg.remote.models.clone(),
        )?);
        let breaker = Arc::new(CircuitBreaker::new(
            "remote_backend",
            CircuitBreakerConfig::new()
                .with_failure_threshold(cfg.remote.failure_threshold)
                .with_cooldown(Duration::from_secs(cfg.remote.cooldown_secs)),
        ));
        let quota = Arc::new(RateLimiter::new(cfg.remote_quota()));
        let router = ModelRouter::new(
            catalog,
            local.model().to_string(),
            remote.is_some(),
            breaker,
            quota,
        );

        let search: Arc<dyn SearchProvider> = match self.search {
            Some(s) if cfg.search.enabled => s,
            _ => Arc::new(NoopSearch),
        };

        info!(
            local_model = %local.model(),
            remote = remote.is_some(),
            warm = cache.tier_enabled(TierKind::Warm),
            search = search.name(),
            "orchestrator ready"
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                keys: CacheKeyGenerator::new().with_salt(cfg.cache.key_salt.clone()),
                cache,
                analyzer: ComplexityAnalyzer::new(cfg.routing.thresholds()),
                router,
                local,
                remote,
                search,
                stats: self.stats.unwrap_or_default(),
                flights: Arc::new(SingleFlight::new(FLIGHT_SHARDS)),
                settings: OrchestratorSettings {
                    generation_timeout: cfg.generation_timeout(),
                    search_timeout: cfg.search_timeout(),
                    search_max_results: cfg.search.max_results,
                    compaction_interval: cfg.cache.compaction_interval(),
                },
                clock,
            }),
        })
    }
}
