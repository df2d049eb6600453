//! 统计模块：按缓存层、后端聚合命中、调用次数、成本与延迟分布。
//!
//! Request statistics.
//!
//! Counters are plain atomics, so [`StatsCollector::record`] never blocks on
//! them. Only latency samples go through a mutex, held just long enough to
//! push one value into a rolling window. A [`StatsSnapshot`] is an owned copy:
//! every counter is read atomically and only ever grows, and percentiles are
//! computed after the window lock is released.

use crate::cache::TierKind;
use crate::error::BackendId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// Samples kept per latency window.
pub const LATENCY_WINDOW: usize = 1024;

/// One thing worth counting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatsEvent {
    CacheHit { tier: TierKind, latency: Duration },
    CacheMiss,
    Generation {
        backend: BackendId,
        estimated_cost: f64,
        latency: Duration,
    },
    GenerationFailed { backend: BackendId },
    /// A High-tier request was served locally instead of remotely.
    Fallback,
    /// A caller joined a generation already in flight for its key.
    Coalesced,
    /// The durable write after a generation did not complete.
    CacheWriteFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub memory: u64,
    pub warm: u64,
    pub cold: u64,
}

impl TierCounts {
    pub fn total(&self) -> u64 {
        self.memory + self.warm + self.cold
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCounts {
    pub local: u64,
    pub remote: u64,
}

impl BackendCounts {
    pub fn total(&self) -> u64 {
        self.local + self.remote
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Samples in the current window.
    pub samples: usize,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    fn from_micros(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let pick = |q: f64| {
            // nearest-rank
            let rank = (q * samples.len() as f64).ceil() as usize;
            samples[rank.clamp(1, samples.len()) - 1] as f64 / 1000.0
        };
        Self {
            samples: samples.len(),
            p50_ms: pick(0.50),
            p90_ms: pick(0.90),
            p99_ms: pick(0.99),
            max_ms: samples[samples.len() - 1] as f64 / 1000.0,
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hits: TierCounts,
    pub misses: u64,
    pub generations: BackendCounts,
    pub generation_failures: BackendCounts,
    pub fallbacks: u64,
    pub coalesced: u64,
    pub cache_write_failures: u64,
    /// Sum of estimated cost units over successful generations.
    pub estimated_cost: f64,
    pub hit_latency: LatencySummary,
    pub generation_latency: LatencySummary,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    pub fn lookups(&self) -> u64 {
        self.hits.total() + self.misses
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            0.0
        } else {
            self.hits.total() as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct AtomicTierCounts {
    memory: AtomicU64,
    warm: AtomicU64,
    cold: AtomicU64,
}

impl AtomicTierCounts {
    fn bump(&self, tier: TierKind) {
        let slot = match tier {
            TierKind::Memory => &self.memory,
            TierKind::Warm => &self.warm,
            TierKind::Cold => &self.cold,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    fn load(&self) -> TierCounts {
        TierCounts {
            memory: self.memory.load(Ordering::Relaxed),
            warm: self.warm.load(Ordering::Relaxed),
            cold: self.cold.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct AtomicBackendCounts {
    local: AtomicU64,
    remote: AtomicU64,
}

impl AtomicBackendCounts {
    fn bump(&self, backend: BackendId) {
        let slot = match backend {
            BackendId::Local => &self.local,
            BackendId::Remote => &self.remote,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    fn load(&self) -> BackendCounts {
        BackendCounts {
            local: self.local.load(Ordering::Relaxed),
            remote: self.remote.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct AtomicCounters {
    hits: AtomicTierCounts,
    misses: AtomicU64,
    generations: AtomicBackendCounts,
    generation_failures: AtomicBackendCounts,
    fallbacks: AtomicU64,
    coalesced: AtomicU64,
    cache_write_failures: AtomicU64,
    /// f64 bit pattern; 0 is `0.0`.
    estimated_cost_bits: AtomicU64,
}

impl AtomicCounters {
    fn add_cost(&self, cost: f64) {
        // the closure always returns Some, so the update cannot fail
        let _ = self
            .estimated_cost_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + cost).to_bits())
            });
    }

    fn estimated_cost(&self) -> f64 {
        f64::from_bits(self.estimated_cost_bits.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct LatencyWindows {
    hit: VecDeque<u64>,
    generation: VecDeque<u64>,
}

fn push_sample(window: &mut VecDeque<u64>, latency: Duration) {
    if window.len() == LATENCY_WINDOW {
        window.pop_front();
    }
    window.push_back(latency.as_micros().min(u64::MAX as u128) as u64);
}

pub struct StatsCollector {
    counters: AtomicCounters,
    latency: Mutex<LatencyWindows>,
    started: Instant,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            counters: AtomicCounters::default(),
            latency: Mutex::new(LatencyWindows::default()),
            started: Instant::now(),
        }
    }

    fn sample(&self, generation: bool, latency: Duration) {
        let mut w = self.latency.lock().unwrap_or_else(|e| e.into_inner());
        let window = if generation { &mut w.generation } else { &mut w.hit };
        push_sample(window, latency);
    }

    pub fn record(&self, event: StatsEvent) {
        trace!(?event, "stats event");
        let c = &self.counters;
        match event {
            StatsEvent::CacheHit { tier, latency } => {
                c.hits.bump(tier);
                self.sample(false, latency);
            }
            StatsEvent::CacheMiss => {
                c.misses.fetch_add(1, Ordering::Relaxed);
            }
            StatsEvent::Generation {
                backend,
                estimated_cost,
                latency,
            } => {
                c.generations.bump(backend);
                if estimated_cost.is_finite() && estimated_cost > 0.0 {
                    c.add_cost(estimated_cost);
                }
                self.sample(true, latency);
            }
            StatsEvent::GenerationFailed { backend } => c.generation_failures.bump(backend),
            StatsEvent::Fallback => {
                c.fallbacks.fetch_add(1, Ordering::Relaxed);
            }
            StatsEvent::Coalesced => {
                c.coalesced.fetch_add(1, Ordering::Relaxed);
            }
            StatsEvent::CacheWriteFailed => {
                c.cache_write_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        let (hit_samples, gen_samples) = {
            let w = self.latency.lock().unwrap_or_else(|e| e.into_inner());
            (
                w.hit.iter().copied().collect::<Vec<_>>(),
                w.generation.iter().copied().collect::<Vec<_>>(),
            )
        };
        StatsSnapshot {
            hits: c.hits.load(),
            misses: c.misses.load(Ordering::Relaxed),
            generations: c.generations.load(),
            generation_failures: c.generation_failures.load(),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            cache_write_failures: c.cache_write_failures.load(Ordering::Relaxed),
            estimated_cost: c.estimated_cost(),
            hit_latency: LatencySummary::from_micros(hit_samples),
            generation_latency: LatencySummary::from_micros(gen_samples),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
