//! Shared fixtures for integration tests: scripted backends, fake search and
//! misbehaving warm tiers, plus a harness that wires them into an orchestrator.

#![allow(dead_code)]

use ai_lib_orchestrator::backend::{BackendRequest, ChunkStream, GenerationBackend};
use ai_lib_orchestrator::cache::{CacheEntry, CacheKey, CacheTier, SqliteColdTier, TierKind};
use ai_lib_orchestrator::clock::{ManualClock, SharedClock};
use ai_lib_orchestrator::search::{SearchProvider, SearchResult};
use ai_lib_orchestrator::{BackendId, Error, Orchestrator, OrchestratorConfig, Result};
use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const COLD_CAP_BYTES: u64 = 10 * 1024 * 1024;

/// Generation backend that replays fixed chunks and counts invocations.
pub struct ScriptedBackend {
    id: BackendId,
    model: String,
    chunks: Vec<String>,
    delay: Duration,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    failure: fn() -> Error,
    break_stream: Option<fn() -> Error>,
    ready: AtomicBool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(id: BackendId, model: &str, chunks: &[&str]) -> Self {
        Self {
            id,
            model: model.to_string(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            failure: || Error::GenerationFailed("scripted failure".into()),
            break_stream: None,
            ready: AtomicBool::new(true),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn local(chunks: &[&str]) -> Self {
        Self::new(BackendId::Local, "llama3.2", chunks)
    }

    pub fn remote(chunks: &[&str]) -> Self {
        Self::new(BackendId::Remote, "openrouter/auto", chunks)
    }

    /// Sleep before answering, to hold a flight open.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `times` calls with `failure()`, then answer normally.
    pub fn failing(mut self, times: usize, failure: fn() -> Error) -> Self {
        self.failures_left = AtomicUsize::new(times);
        self.failure = failure;
        self
    }

    /// Emit every chunk, then end the stream with an error.
    pub fn breaking_stream(self) -> Self {
        self.breaking_stream_with(|| Error::GenerationFailed("stream ended before completion".into()))
    }

    /// Emit every chunk, then end the stream with `failure()`.
    pub fn breaking_stream_with(mut self, failure: fn() -> Error) -> Self {
        self.break_stream = Some(failure);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: BackendRequest) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err((self.failure)());
        }
        let mut items: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(failure) = self.break_stream {
            items.push(Err(failure()));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    async fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Search provider with canned results, optionally failing or hanging first.
pub struct FakeSearch {
    results: Vec<SearchResult>,
    calls: AtomicUsize,
    fail: bool,
    delay: Duration,
}

impl FakeSearch {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
            fail: false,
            delay: Duration::ZERO,
        }
    }

    /// Every search errors, like a provider answering 5xx.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_one_result()
        }
    }

    /// Every search hangs for `delay` before answering.
    pub fn stalled(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::with_one_result()
        }
    }

    pub fn with_one_result() -> Self {
        Self::new(vec![SearchResult::new(
            "TCP handshake",
            "https://example.org/tcp",
            "SYN, SYN-ACK, ACK",
        )])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(Error::backend_unavailable(BackendId::Remote, "search provider returned 502"));
        }
        Ok(self.results.clone())
    }
}

/// Warm tier whose every call fails immediately, like a refused connection.
#[derive(Default)]
pub struct UnreachableWarmTier {
    pub calls: AtomicUsize,
}

impl UnreachableWarmTier {
    fn refuse<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::tier_unavailable(TierKind::Warm, "connection refused"))
    }
}

#[async_trait]
impl CacheTier for UnreachableWarmTier {
    fn kind(&self) -> TierKind {
        TierKind::Warm
    }
    async fn get(&self, _: &CacheKey) -> Result<Option<CacheEntry>> {
        self.refuse()
    }
    async fn put(&self, _: &CacheEntry, _: Duration) -> Result<()> {
        self.refuse()
    }
    async fn remove(&self, _: &CacheKey) -> Result<bool> {
        self.refuse()
    }
    async fn len(&self) -> Result<usize> {
        self.refuse()
    }
    fn name(&self) -> &'static str {
        "unreachable"
    }
}

/// Warm tier that hangs on every call for `delay`, like a stalled network.
pub struct StalledWarmTier {
    pub delay: Duration,
}

#[async_trait]
impl CacheTier for StalledWarmTier {
    fn kind(&self) -> TierKind {
        TierKind::Warm
    }
    async fn get(&self, _: &CacheKey) -> Result<Option<CacheEntry>> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
    async fn put(&self, _: &CacheEntry, _: Duration) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
    async fn remove(&self, _: &CacheKey) -> Result<bool> {
        tokio::time::sleep(self.delay).await;
        Ok(false)
    }
    async fn len(&self) -> Result<usize> {
        tokio::time::sleep(self.delay).await;
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "stalled"
    }
}

/// Config for tests: no Redis, short timeouts, search on.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.cache.warm_enabled = false;
    config.cache.redis_timeout_ms = 50;
    config.generation.timeout_secs = 5;
    config.search.enabled = true;
    config.search.timeout_ms = 200;
    config
}

/// A prompt the analyzer classifies as `High`: long and full of reasoning markers.
pub fn high_complexity_prompt() -> String {
    format!(
        "Compare the trade-offs of these designs step by step and explain why one wins. {}",
        "The cluster spans three regions with asynchronous replication. ".repeat(20)
    )
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub local: Arc<ScriptedBackend>,
    pub remote: Option<Arc<ScriptedBackend>>,
    pub search: Arc<FakeSearch>,
    pub clock: Arc<ManualClock>,
}

pub struct HarnessBuilder {
    config: OrchestratorConfig,
    local: ScriptedBackend,
    remote: Option<ScriptedBackend>,
    warm: Option<Arc<dyn CacheTier>>,
    search: FakeSearch,
}

impl HarnessBuilder {
    pub fn new(local: ScriptedBackend) -> Self {
        Self {
            config: test_config(),
            local,
            remote: None,
            warm: None,
            search: FakeSearch::with_one_result(),
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut OrchestratorConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn remote(mut self, remote: ScriptedBackend) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn warm(mut self, warm: Arc<dyn CacheTier>) -> Self {
        self.warm = Some(warm);
        self
    }

    pub fn search(mut self, search: FakeSearch) -> Self {
        self.search = search;
        self
    }

    pub fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let shared: SharedClock = clock.clone();
        let local = Arc::new(self.local);
        let remote = self.remote.map(Arc::new);
        let search = Arc::new(self.search);

        let mut builder = Orchestrator::builder(self.config)
            .with_clock(shared.clone())
            .with_cold_tier(Arc::new(
                SqliteColdTier::in_memory(COLD_CAP_BYTES, shared).expect("in-memory sqlite"),
            ))
            .with_local_backend(local.clone())
            .with_remote_backend(
                remote
                    .clone()
                    .map(|r| r as Arc<dyn GenerationBackend>),
            )
            .with_search(search.clone());
        if let Some(warm) = self.warm {
            builder = builder.with_warm_tier(warm);
        }

        Harness {
            orchestrator: builder.build().expect("orchestrator builds"),
            local,
            remote,
            search,
            clock,
        }
    }
}

pub fn harness(local: ScriptedBackend) -> Harness {
    HarnessBuilder::new(local).build()
}
