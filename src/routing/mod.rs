//! Complexity analysis and model routing.
//!
//! This module is **pure policy**: classification never performs I/O and the
//! routing decision is a function of the score, the request and a
//! [`BackendHealth`] snapshot. Live health is read from the remote circuit
//! breaker and quota limiter right before each decision.
//!
//! ```rust
//! use ai_lib_orchestrator::routing::{ComplexityAnalyzer, ComplexityTier};
//! use ai_lib_orchestrator::types::RequestKind;
//!
//! let score = ComplexityAnalyzer::default().classify("What is 2+2?", RequestKind::Chat);
//! assert_eq!(score.tier, ComplexityTier::Low);
//! ```

mod catalog;
mod complexity;
mod cost;
mod router;

pub use catalog::{ModelCatalog, ModelInfo, PricingInfo};
pub use complexity::{
    decide, ComplexityAnalyzer, ComplexityScore, ComplexitySignals, ComplexityThresholds,
    ComplexityTier, LengthBucket, ReasoningLevel, RequestShape,
};
pub use cost::CharacterEstimator;
pub use router::{BackendHealth, FallbackReason, ModelRouter, RouteDecision};
