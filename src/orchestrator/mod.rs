//! 编排模块：缓存查找 → 复杂度分析 → 路由 → 生成 → 回写缓存 → 统计。
//!
//! # Orchestrator
//!
//! The request path for one [`GenerationRequest`]:
//!
//! 1. derive the [`CacheKey`];
//! 2. probe the cache (memory, warm, cold) and return on a hit;
//! 3. on a miss, join or start the single in-flight generation for that key;
//! 4. classify, route, optionally enrich with search results;
//! 5. run the chosen backend under the generation timeout, degrading a failed
//!    remote call to the local backend;
//! 6. write the assembled response through the cache and record statistics.
//!
//! Generation runs on its own task. A caller that disconnects does not stop it,
//! and the result still lands in the cache for the next caller.

mod builder;
mod single_flight;

pub use builder::OrchestratorBuilder;
pub use single_flight::{Flight, FlightResult, SingleFlight};

use crate::backend::{BackendRequest, GenerationBackend};
use crate::cache::{CacheCoordinator, CacheEntry, CacheKey, CacheKeyGenerator, CompactionTask, TierKind};
use crate::clock::SharedClock;
use crate::error::BackendId;
use crate::routing::{ComplexityAnalyzer, FallbackReason, ModelRouter, RouteDecision};
use crate::search::{enrich_prompt, SearchProvider};
use crate::stats::{StatsCollector, StatsEvent, StatsSnapshot};
use crate::types::{GenerationRequest, GenerationResponse, OrchestratedResponse, StreamEvent};
use crate::{Error, Result};
use futures::{stream, FutureExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Stream of delivery events; always ends with exactly one terminal event.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Timing knobs for the request path.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub generation_timeout: Duration,
    pub search_timeout: Duration,
    pub search_max_results: usize,
    pub compaction_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(120),
            search_timeout: Duration::from_secs(2),
            search_max_results: 5,
            compaction_interval: Duration::from_secs(300),
        }
    }
}

/// What one flight produces; shared by every caller that joined it.
#[derive(Debug, Clone)]
pub struct Generated {
    pub response: GenerationResponse,
    /// `None` when the flight found the response already cached.
    pub route: Option<RouteDecision>,
    pub cache_tier: Option<TierKind>,
}

type ChunkSink = mpsc::UnboundedSender<String>;

/// Why a remote attempt produced no content.
enum RemoteMiss {
    /// Serve the request locally instead.
    Fallback(FallbackReason, Error),
    /// Surface to the caller.
    Fatal(Error),
}

struct Inner {
    keys: CacheKeyGenerator,
    cache: Arc<CacheCoordinator>,
    analyzer: ComplexityAnalyzer,
    router: ModelRouter,
    local: Arc<dyn GenerationBackend>,
    remote: Option<Arc<dyn GenerationBackend>>,
    search: Arc<dyn SearchProvider>,
    stats: Arc<StatsCollector>,
    flights: Arc<SingleFlight<Generated>>,
    settings: OrchestratorSettings,
    clock: SharedClock,
}

/// Top-level entry point. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(config: crate::config::OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.inner.cache
    }

    pub fn router(&self) -> &ModelRouter {
        &self.inner.router
    }

    pub fn analyzer(&self) -> &ComplexityAnalyzer {
        &self.inner.analyzer
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn local_backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.inner.local
    }

    pub fn remote_backend(&self) -> Option<&Arc<dyn GenerationBackend>> {
        self.inner.remote.as_ref()
    }

    pub fn key_for(&self, request: &GenerationRequest) -> Result<CacheKey> {
        self.inner.keys.generate(request)
    }

    /// Readiness of the local backend, which every route can fall back to.
    pub async fn ready(&self) -> bool {
        self.inner.local.ready().await
    }

    /// Local models followed by remote catalog models, each with its backend.
    pub async fn models(&self) -> Vec<(BackendId, String)> {
        let local = match self.inner.local.models().await {
            Ok(models) => models,
            Err(e) => {
                warn!(error = %e, "listing local models failed");
                vec![self.inner.local.model().to_string()]
            }
        };
        let mut models: Vec<(BackendId, String)> =
            local.into_iter().map(|m| (BackendId::Local, m)).collect();
        if self.inner.remote.is_some() {
            for m in self.inner.router.catalog().list() {
                if !models.iter().any(|(_, name)| *name == m.name) {
                    models.push((BackendId::Remote, m.name));
                }
            }
        }
        models
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        self.inner.cache.invalidate(key).await
    }

    /// Start periodic cold-tier compaction on the current runtime.
    pub fn spawn_compaction(&self) -> CompactionTask {
        CompactionTask::spawn(self.inner.cache.clone(), self.inner.settings.compaction_interval)
    }

    /// Serve `request` from cache or by generating it.
    pub async fn handle(&self, request: GenerationRequest) -> Result<OrchestratedResponse> {
        let started = Instant::now();
        validate(&request)?;

        if request.cache_bypass {
            let generated = self.inner.generate(&request, None).await?;
            return Ok(self.finish(generated, false, started));
        }

        let key = self.inner.keys.generate(&request)?;
        if let Some(hit) = self.lookup(&key, started).await {
            return Ok(hit);
        }

        let (flight, leader) = self.start_or_join(&key, &request, None);
        let generated = flight.await.map_err(|e| e.replicate())?;
        Ok(self.finish(generated, !leader, started))
    }

    /// Streamed variant of [`Orchestrator::handle`].
    ///
    /// Input errors are returned before any event. Afterwards every outcome,
    /// failure included, arrives as events. Chunks are forwarded as the backend
    /// produces them; the cache only sees the fully assembled response.
    pub async fn handle_stream(&self, request: GenerationRequest) -> Result<EventStream> {
        let started = Instant::now();
        validate(&request)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let flight = if request.cache_bypass {
            let inner = self.inner.clone();
            let req = request.clone();
            let handle = tokio::spawn(async move { inner.generate(&req, Some(tx)).await });
            async move {
                match handle.await {
                    Ok(out) => out,
                    Err(join) => Err(Error::GenerationFailed(format!("generation task aborted: {}", join))),
                }
            }
            .boxed()
        } else {
            let key = self.inner.keys.generate(&request)?;
            if let Some(hit) = self.lookup(&key, started).await {
                return Ok(replay(hit.response, hit.cache_tier));
            }
            let (flight, leader) = self.start_or_join(&key, &request, Some(tx));
            if !leader {
                let generated = flight.await.map_err(|e| e.replicate());
                return Ok(match generated {
                    Ok(g) => replay(g.response, g.cache_tier),
                    Err(e) => Box::pin(stream::iter(vec![error_event(&e)])),
                });
            }
            async move { flight.await.map_err(|e| e.replicate()) }.boxed()
        };

        let deltas = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|content| (StreamEvent::Delta { content }, rx))
        });
        let terminal = stream::once(async move {
            match flight.await {
                Ok(g) => StreamEvent::Done {
                    cache_hit: g.cache_tier.is_some(),
                    cache_tier: g.cache_tier,
                    backend: g.response.backend,
                    model: g.response.model,
                },
                Err(e) => error_event(&e),
            }
        });
        Ok(Box::pin(deltas.chain(terminal)))
    }

    async fn lookup(&self, key: &CacheKey, started: Instant) -> Option<OrchestratedResponse> {
        match self.inner.cache.get(key).await {
            Some(entry) => {
                let latency = started.elapsed();
                debug!(key = %key, tier = %entry.tier_origin, elapsed_ms = latency.as_millis() as u64, "cache hit");
                self.inner.stats.record(StatsEvent::CacheHit {
                    tier: entry.tier_origin,
                    latency,
                });
                Some(OrchestratedResponse {
                    response: entry.payload,
                    cache_hit: true,
                    cache_tier: Some(entry.tier_origin),
                    route: None,
                    latency,
                })
            }
            None => {
                self.inner.stats.record(StatsEvent::CacheMiss);
                None
            }
        }
    }

    fn start_or_join(
        &self,
        key: &CacheKey,
        request: &GenerationRequest,
        sink: Option<ChunkSink>,
    ) -> (Flight<Generated>, bool) {
        let inner = self.inner.clone();
        let req = request.clone();
        let owned_key = key.clone();
        let (flight, leader) = self
            .inner
            .flights
            .join_or_start(key, move || async move { inner.generate_and_store(owned_key, req, sink).await });
        if !leader {
            self.inner.stats.record(StatsEvent::Coalesced);
        }
        (flight, leader)
    }

    fn finish(&self, generated: Generated, joined: bool, started: Instant) -> OrchestratedResponse {
        OrchestratedResponse {
            response: generated.response,
            cache_hit: generated.cache_tier.is_some(),
            cache_tier: generated.cache_tier,
            route: if joined { None } else { generated.route },
            latency: started.elapsed(),
        }
    }
}

fn validate(request: &GenerationRequest) -> Result<()> {
    if request.prompt.trim().is_empty() {
        return Err(Error::invalid_input("prompt must not be empty"));
    }
    Ok(())
}

fn error_event(e: &Error) -> StreamEvent {
    StreamEvent::Error {
        code: e.code().to_string(),
        message: e.to_string(),
    }
}

/// Deliver an already assembled response as a stream.
fn replay(response: GenerationResponse, cache_tier: Option<TierKind>) -> EventStream {
    let done = StreamEvent::Done {
        cache_hit: cache_tier.is_some(),
        cache_tier,
        backend: response.backend,
        model: response.model,
    };
    Box::pin(stream::iter(vec![
        StreamEvent::Delta {
            content: response.content,
        },
        done,
    ]))
}

impl Inner {
    /// Flight body: re-check memory, generate, write through the cache.
    async fn generate_and_store(
        self: Arc<Self>,
        key: CacheKey,
        request: GenerationRequest,
        sink: Option<ChunkSink>,
    ) -> Result<Generated> {
        // A flight that just finished may have filled memory between our miss and now.
        if let Some(entry) = self.cache.memory().get_sync(&key) {
            if let Some(tx) = &sink {
                let _ = tx.send(entry.payload.content.clone());
            }
            return Ok(Generated {
                response: entry.payload,
                route: None,
                cache_tier: Some(TierKind::Memory),
            });
        }

        let generated = self.generate(&request, sink).await?;
        let entry = CacheEntry::new(key, generated.response.clone(), self.clock.now_millis());
        if let Err(e) = self.cache.set(&entry).await {
            warn!(key = %entry.key, error = %e, "cache write-back failed");
            self.stats.record(StatsEvent::CacheWriteFailed);
        }
        Ok(generated)
    }

    async fn generate(&self, request: &GenerationRequest, sink: Option<ChunkSink>) -> Result<Generated> {
        let score = self.analyzer.classify(&request.prompt, request.kind);
        let mut decision = self.router.decide(&score, request).await;
        if decision.fallback.is_some() {
            self.stats.record(StatsEvent::Fallback);
        }

        let (prompt, enriched) = if decision.enrich {
            self.enrich(&request.prompt).await
        } else {
            (request.prompt.clone(), false)
        };

        let content = match decision.backend {
            BackendId::Remote => match self.run_remote(&decision, request, &prompt, sink.as_ref()).await {
                Ok(content) => content,
                Err(RemoteMiss::Fatal(e)) => return Err(e),
                Err(RemoteMiss::Fallback(reason, e)) => {
                    warn!(reason = ?reason, error = %e, "remote generation unavailable, serving locally");
                    self.stats.record(StatsEvent::Fallback);
                    decision = decision.to_local(self.router.local_model_for(request), reason);
                    self.run(self.local.as_ref(), &decision, request, &prompt, sink.as_ref())
                        .await?
                }
            },
            BackendId::Local => {
                self.run(self.local.as_ref(), &decision, request, &prompt, sink.as_ref())
                    .await?
            }
        };

        Ok(Generated {
            response: GenerationResponse {
                content,
                model: decision.model.clone(),
                backend: decision.backend,
                enriched,
                complexity: score.tier,
            },
            route: Some(decision),
            cache_tier: None,
        })
    }

    /// Remote call guarded by the breaker and the quota limiter.
    async fn run_remote(
        &self,
        decision: &RouteDecision,
        request: &GenerationRequest,
        prompt: &str,
        sink: Option<&ChunkSink>,
    ) -> std::result::Result<String, RemoteMiss> {
        let remote = match &self.remote {
            Some(r) => r,
            None => {
                return Err(RemoteMiss::Fallback(
                    FallbackReason::RemoteNotConfigured,
                    Error::backend_unavailable(BackendId::Remote, "remote backend not configured"),
                ))
            }
        };
        let breaker = self.router.remote_breaker();
        if let Err(open) = breaker.allow() {
            return Err(RemoteMiss::Fallback(
                FallbackReason::RemoteCircuitOpen,
                Error::backend_unavailable(BackendId::Remote, open.to_string()),
            ));
        }
        let quota = self.router.remote_quota();
        if !quota.try_acquire().await {
            return Err(RemoteMiss::Fallback(
                FallbackReason::RemoteQuotaExhausted,
                Error::RateLimited {
                    retry_after: quota.retry_after().await,
                },
            ));
        }

        // Remote output is held back until it completes: a remote failure falls back to
        // the local backend, and the consumer must not see text from both.
        match self.run(remote.as_ref(), decision, request, prompt, None).await {
            Ok(content) => {
                breaker.on_success();
                if let Some(tx) = sink {
                    let _ = tx.send(content.clone());
                }
                Ok(content)
            }
            Err(e) if e.is_fallbackable() => {
                breaker.on_failure();
                if let Error::BackendUnavailable {
                    retry_after: Some(after),
                    ..
                } = &e
                {
                    quota.block_for(*after).await;
                }
                Err(RemoteMiss::Fallback(FallbackReason::RemoteFailed, e))
            }
            Err(e) => {
                // The provider answered; it is reachable.
                breaker.on_success();
                Err(RemoteMiss::Fatal(e))
            }
        }
    }

    /// Run one backend to completion under the generation timeout.
    async fn run(
        &self,
        backend: &dyn GenerationBackend,
        decision: &RouteDecision,
        request: &GenerationRequest,
        prompt: &str,
        sink: Option<&ChunkSink>,
    ) -> Result<String> {
        let started = Instant::now();
        let id = backend.id();
        let call = BackendRequest::new(prompt, decision.model.clone())
            .with_system(request.system.clone())
            .with_params(request.params.clone());
        let limit = self.settings.generation_timeout;

        let assembled = tokio::time::timeout(limit, async {
            let mut chunks = backend.generate(call).await?;
            let mut out = String::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if let Some(tx) = sink {
                    // A departed consumer does not stop generation.
                    let _ = tx.send(chunk.clone());
                }
                out.push_str(&chunk);
            }
            Ok::<_, Error>(out)
        })
        .await
        .unwrap_or_else(|_| Err(Error::timeout(format!("{} generation", id), limit)))
        .and_then(|out| {
            if out.trim().is_empty() {
                Err(Error::GenerationFailed(format!("{} backend produced no output", id)))
            } else {
                Ok(out)
            }
        });

        match assembled {
            Ok(content) => {
                let latency = started.elapsed();
                info!(
                    backend = %id,
                    model = %decision.model,
                    tier = %decision.tier,
                    elapsed_ms = latency.as_millis() as u64,
                    chars = content.len(),
                    "generation complete"
                );
                self.stats.record(StatsEvent::Generation {
                    backend: id,
                    estimated_cost: decision.estimated_cost,
                    latency,
                });
                Ok(content)
            }
            Err(e) => {
                error!(backend = %id, model = %decision.model, error = %e, "generation failed");
                self.stats.record(StatsEvent::GenerationFailed { backend: id });
                Err(e)
            }
        }
    }

    /// Fold search results into the prompt. Search trouble only costs the enrichment.
    async fn enrich(&self, prompt: &str) -> (String, bool) {
        let limit = self.settings.search_timeout;
        match tokio::time::timeout(limit, self.search.search(prompt)).await {
            Ok(Ok(mut results)) => {
                results.truncate(self.settings.search_max_results);
                let applied = !results.is_empty();
                (enrich_prompt(prompt, &results), applied)
            }
            Ok(Err(e)) => {
                warn!(provider = self.search.name(), error = %e, "search failed, generating without enrichment");
                (prompt.to_string(), false)
            }
            Err(_) => {
                warn!(provider = self.search.name(), timeout_ms = limit.as_millis() as u64, "search timed out");
                (prompt.to_string(), false)
            }
        }
    }
}
