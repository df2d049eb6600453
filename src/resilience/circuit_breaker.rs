use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Time left before a probe is let through; `None` while closed.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Returned by [`CircuitBreaker::allow`] while the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpen {
    pub remaining: Duration,
}

impl fmt::Display for BreakerOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circuit open for another {}ms", self.remaining.as_millis())
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant, failures: u32 },
}

/// Consecutive-failure breaker guarding one dependency (the remote provider,
/// the warm tier).
///
/// Closed, it counts failures in a row; reaching the threshold opens it for
/// the cooldown. Once the cooldown has passed the next [`allow`] closes it
/// again and that call acts as the probe: one more failure re-opens it only
/// after the threshold is reached anew.
///
/// [`allow`]: CircuitBreaker::allow
pub struct CircuitBreaker {
    name: &'static str,
    cfg: CircuitBreakerConfig,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name,
            cfg,
            phase: Mutex::new(Phase::Closed { failures: 0 }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Gate a call. An expired open phase closes here.
    pub fn allow(&self) -> Result<(), BreakerOpen> {
        let mut phase = self.phase();
        if let Phase::Open { until, .. } = *phase {
            let now = Instant::now();
            if now < until {
                return Err(BreakerOpen {
                    remaining: until - now,
                });
            }
            tracing::debug!(breaker = self.name, "cooldown elapsed, probing");
            *phase = Phase::Closed { failures: 0 };
        }
        Ok(())
    }

    /// Read-only health check; never transitions state.
    pub fn is_open(&self) -> bool {
        matches!(*self.phase(), Phase::Open { until, .. } if Instant::now() < until)
    }

    pub fn on_success(&self) {
        let mut phase = self.phase();
        if let Phase::Open { .. } = *phase {
            tracing::info!(breaker = self.name, "circuit closed");
        }
        *phase = Phase::Closed { failures: 0 };
    }

    pub fn on_failure(&self) {
        let mut phase = self.phase();
        *phase = match *phase {
            Phase::Closed { failures } => {
                let failures = failures.saturating_add(1);
                if failures >= self.cfg.failure_threshold {
                    tracing::warn!(
                        breaker = self.name,
                        failures,
                        cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                        "circuit opened"
                    );
                    Phase::Open {
                        until: Instant::now() + self.cfg.cooldown,
                        failures,
                    }
                } else {
                    Phase::Closed { failures }
                }
            }
            // Late failures from calls admitted before opening do not extend the cooldown.
            Phase::Open { until, failures } => Phase::Open {
                until,
                failures: failures.saturating_add(1),
            },
        };
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let (failures, open_remaining_ms) = match *self.phase() {
            Phase::Closed { failures } => (failures, None),
            Phase::Open { until, failures } => (
                failures,
                until
                    .checked_duration_since(Instant::now())
                    .filter(|left| !left.is_zero())
                    .map(|left| left.as_millis() as u64),
            ),
        };
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: failures,
            open_remaining_ms,
        }
    }
}
