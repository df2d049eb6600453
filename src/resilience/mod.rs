//! 弹性模式模块：熔断器与限流器。
//!
//! # Resilience Primitives
//!
//! | Component | Used for |
//! |-----------|----------|
//! | [`circuit_breaker`] | Skipping the warm tier and the remote backend while they are failing |
//! | [`rate_limiter`] | Remote-backend quota and API admission |
//!
//! ```rust
//! use ai_lib_orchestrator::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "remote",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//!
//! if breaker.allow().is_ok() {
//!     // call the backend, then:
//!     breaker.on_success();
//! }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
