//! Complexity-based backend selection.

use super::catalog::ModelCatalog;
use super::complexity::{ComplexityScore, ComplexityTier};
use super::cost::CharacterEstimator;
use crate::error::BackendId;
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::types::GenerationRequest;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Why a high-complexity request was served locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    RemoteNotConfigured,
    RemoteCircuitOpen,
    RemoteQuotaExhausted,
    /// The remote call itself failed or timed out.
    RemoteFailed,
}

/// Point-in-time view of remote backend availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    pub remote_configured: bool,
    pub remote_circuit_open: bool,
    pub remote_quota_available: bool,
}

impl BackendHealth {
    pub fn healthy() -> Self {
        Self {
            remote_configured: true,
            remote_circuit_open: false,
            remote_quota_available: true,
        }
    }

    fn remote_blocker(&self) -> Option<FallbackReason> {
        if !self.remote_configured {
            Some(FallbackReason::RemoteNotConfigured)
        } else if self.remote_circuit_open {
            Some(FallbackReason::RemoteCircuitOpen)
        } else if !self.remote_quota_available {
            Some(FallbackReason::RemoteQuotaExhausted)
        } else {
            None
        }
    }
}

/// Which backend serves a request, and how.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub backend: BackendId,
    pub model: String,
    /// Whether the prompt is enriched with search results first.
    pub enrich: bool,
    /// Estimated cost units; zero for the local backend.
    pub estimated_cost: f64,
    pub tier: ComplexityTier,
    pub fallback: Option<FallbackReason>,
}

impl RouteDecision {
    /// The Medium-tier local route a failed remote decision degrades to.
    pub fn to_local(&self, model: impl Into<String>, reason: FallbackReason) -> Self {
        Self {
            backend: BackendId::Local,
            model: model.into(),
            enrich: true,
            estimated_cost: 0.0,
            tier: self.tier,
            fallback: Some(reason),
        }
    }
}

/// Maps a complexity score to a backend.
///
/// - `Low` goes to the local backend without enrichment.
/// - `Medium` goes to the local backend with enrichment.
/// - `High` goes to a remote catalog model with enrichment, or degrades to the
///   `Medium` route when the remote backend is unconfigured, tripped or out of quota.
///
/// Decisions are made fresh for every request from [`BackendHealth`]; nothing is cached.
pub struct ModelRouter {
    catalog: Arc<ModelCatalog>,
    local_model: String,
    remote_configured: bool,
    remote_breaker: Arc<CircuitBreaker>,
    remote_quota: Arc<RateLimiter>,
    estimator: CharacterEstimator,
}

impl ModelRouter {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        local_model: impl Into<String>,
        remote_configured: bool,
        remote_breaker: Arc<CircuitBreaker>,
        remote_quota: Arc<RateLimiter>,
    ) -> Self {
        Self {
            catalog,
            local_model: local_model.into(),
            remote_configured,
            remote_breaker,
            remote_quota,
            estimator: CharacterEstimator::default(),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn remote_breaker(&self) -> &CircuitBreaker {
        &self.remote_breaker
    }

    pub fn remote_quota(&self) -> &RateLimiter {
        &self.remote_quota
    }

    pub fn estimator(&self) -> &CharacterEstimator {
        &self.estimator
    }

    /// Local model for `request`: an explicitly requested non-catalog model, else the configured one.
    pub fn local_model_for(&self, request: &GenerationRequest) -> String {
        match request.model.as_deref() {
            Some(m) if !m.trim().is_empty() && !self.catalog.contains(m) => m.to_string(),
            _ => self.local_model.clone(),
        }
    }

    /// Observe remote availability without consuming quota.
    pub async fn health(&self) -> BackendHealth {
        BackendHealth {
            remote_configured: self.remote_configured,
            remote_circuit_open: self.remote_breaker.is_open(),
            remote_quota_available: self.remote_quota.has_capacity().await,
        }
    }

    /// Pure routing policy: the same score, request and health always give the same decision.
    pub fn route(
        &self,
        score: &ComplexityScore,
        request: &GenerationRequest,
        health: &BackendHealth,
    ) -> RouteDecision {
        let local = |enrich: bool, fallback: Option<FallbackReason>| RouteDecision {
            backend: BackendId::Local,
            model: self.local_model_for(request),
            enrich,
            estimated_cost: 0.0,
            tier: score.tier,
            fallback,
        };

        let decision = match score.tier {
            ComplexityTier::Low => local(false, None),
            ComplexityTier::Medium => local(true, None),
            ComplexityTier::High => match health.remote_blocker() {
                Some(reason) => local(true, Some(reason)),
                None => {
                    let model = self.catalog.select(request.model.as_deref());
                    RouteDecision {
                        backend: BackendId::Remote,
                        estimated_cost: self.estimator.estimate_cost(
                            &request.prompt,
                            request.params.max_tokens,
                            &model.pricing,
                        ),
                        model: model.name,
                        enrich: true,
                        tier: score.tier,
                        fallback: None,
                    }
                }
            },
        };

        debug!(
            tier = %score.tier,
            backend = %decision.backend,
            model = %decision.model,
            enrich = decision.enrich,
            fallback = ?decision.fallback,
            "route decided"
        );
        decision
    }

    /// Observe health, then route.
    pub async fn decide(&self, score: &ComplexityScore, request: &GenerationRequest) -> RouteDecision {
        let health = self.health().await;
        self.route(score, request, &health)
    }
}
