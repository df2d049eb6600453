//! Generation response types.

use crate::cache::TierKind;
use crate::error::BackendId;
use crate::routing::{ComplexityTier, RouteDecision};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fully assembled generation output. This is the payload stored in every cache tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    /// Model that produced the content.
    pub model: String,
    pub backend: BackendId,
    /// Whether search results were folded into the prompt.
    pub enriched: bool,
    pub complexity: ComplexityTier,
}

/// What the orchestrator hands back for one `handle` call.
#[derive(Debug, Clone)]
pub struct OrchestratedResponse {
    pub response: GenerationResponse,
    pub cache_hit: bool,
    /// Tier that served the hit, if any.
    pub cache_tier: Option<TierKind>,
    /// Routing decision taken for this call; `None` on cache hits and for
    /// single-flight followers that joined someone else's generation.
    pub route: Option<RouteDecision>,
    pub latency: Duration,
}

impl OrchestratedResponse {
    pub fn content(&self) -> &str {
        &self.response.content
    }
}
