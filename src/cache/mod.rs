//! 三级响应缓存：内存、Redis 与 SQLite。
//!
//! # Three-Tier Response Cache
//!
//! Generated responses are cached in three layers, probed fastest first:
//!
//! | Tier | Implementation | Role |
//! |------|----------------|------|
//! | Memory | [`MemoryTier`] | Sharded in-process LRU, rebuilt from lower tiers at will |
//! | Warm | [`RedisWarmTier`] | Shared across processes, Redis-native TTL and memory cap |
//! | Cold | [`SqliteColdTier`] | Durable, size-bounded, compacted in the background |
//!
//! [`CacheCoordinator`] ties them together; [`CompactionTask`] keeps the cold
//! tier under its size cap. Keys come from [`CacheKeyGenerator`].
//!
//! ```rust
//! use ai_lib_orchestrator::cache::{
//!     CacheCoordinator, CoordinatorConfig, MemoryTier, NullTier, SqliteColdTier, TierKind,
//! };
//! use ai_lib_orchestrator::clock::system_clock;
//! use std::sync::Arc;
//!
//! # fn main() -> ai_lib_orchestrator::Result<()> {
//! let clock = system_clock();
//! let cache = CacheCoordinator::new(
//!     Arc::new(MemoryTier::new(512, 8, clock.clone())),
//!     Arc::new(NullTier::new(TierKind::Warm)),
//!     Arc::new(SqliteColdTier::in_memory(10 * 1024 * 1024, clock.clone())?),
//!     CoordinatorConfig::default(),
//!     clock,
//! );
//! # let _ = cache;
//! # Ok(())
//! # }
//! ```

mod backend;
mod cold;
mod compaction;
mod coordinator;
mod entry;
mod key;
mod memory;
#[cfg(feature = "warm-redis")]
mod warm;

pub use backend::{CacheTier, ColdStore, CompactionReport, NullTier};
pub use cold::SqliteColdTier;
pub use compaction::CompactionTask;
pub use coordinator::{CacheCoordinator, CoordinatorConfig, TierSizes};
pub use entry::{CacheEntry, TierKind, TtlPolicy};
pub use key::{normalize, CacheKey, CacheKeyGenerator, AUTO_MODEL};
pub use memory::MemoryTier;
#[cfg(feature = "warm-redis")]
pub use warm::RedisWarmTier;
