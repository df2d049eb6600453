//! # ai-lib-orchestrator
//!
//! 面向 LLM 推理服务的编排引擎：三级响应缓存、复杂度路由与单飞请求合并。
//!
//! Orchestration engine for LLM inference: a three-tier response cache, complexity-based
//! routing between a local and a remote backend, and single-flight deduplication of
//! identical in-flight requests.
//!
//! ## Overview
//!
//! Every request passes through the same path: derive a deterministic cache key, probe
//! memory, warm (Redis) and cold (SQLite) tiers in order, and on a miss run exactly one
//! generation per key no matter how many callers are waiting for it. Generation picks a
//! backend from the prompt's complexity and the backends' health, optionally enriches
//! the prompt with search results, and writes the assembled response back through every
//! tier.
//!
//! ## Core Properties
//!
//! - **Degrade, don't fail**: an unreachable warm or cold tier is skipped after a bounded
//!   timeout; cache trouble never reaches the caller
//! - **One generation per key**: concurrent identical requests share a single backend call
//! - **Detached generation**: a caller that disconnects does not cancel the work, and the
//!   result is still cached
//! - **Deterministic routing**: the same complexity and health snapshot always yields the
//!   same decision
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_orchestrator::{GenerationRequest, Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_orchestrator::Result<()> {
//!     let config = OrchestratorConfig::load()?;
//!     let orchestrator = Orchestrator::builder(config).build()?;
//!     let _compaction = orchestrator.spawn_compaction();
//!
//!     let out = orchestrator
//!         .handle(GenerationRequest::chat("explain TCP handshake"))
//!         .await?;
//!     println!("{} (cache hit: {})", out.content(), out.cache_hit);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | Request path, single-flight guard and builder |
//! | [`cache`] | Cache keys, entries, the three tiers, coordinator and compaction |
//! | [`routing`] | Complexity analysis, model catalog and backend routing |
//! | [`backend`] | Local (Ollama-compatible) and remote (OpenAI-compatible) generation |
//! | [`resilience`] | Circuit breaker and token-bucket rate limiter |
//! | [`search`] | Prompt enrichment from search providers |
//! | [`embeddings`] | Embedders and vector helpers |
//! | [`stats`] | Hit/miss, cost and latency statistics |
//! | [`api`] | Transport-agnostic implementation of the HTTP endpoints |
//! | [`config`] | YAML + environment configuration |
//! | [`types`] | Requests, responses and stream events |

pub mod api;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod embeddings;
pub mod orchestrator;
pub mod resilience;
pub mod routing;
pub mod search;
pub mod stats;
pub mod types;

// Re-export main types for convenience
pub use api::{ApiError, ApiService};
pub use cache::{CacheCoordinator, CacheEntry, CacheKey, TierKind};
pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use routing::{ComplexityTier, RouteDecision};
pub use stats::StatsSnapshot;
pub use types::{
    GenerationParams, GenerationRequest, GenerationResponse, OrchestratedResponse, RequestKind,
    StreamEvent,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{BackendId, Error, ErrorContext};
