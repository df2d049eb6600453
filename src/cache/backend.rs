//! Cache tier abstractions.

use super::entry::{CacheEntry, TierKind};
use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One storage layer of the response cache.
///
/// `get` returns only live entries and refreshes their access bookkeeping.
/// `put` stamps the entry with the tier's own expiry (`now + ttl`).
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn kind(&self) -> TierKind;
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;
    async fn put(&self, entry: &CacheEntry, ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &CacheKey) -> Result<bool>;
    async fn len(&self) -> Result<usize>;

    /// `false` for placeholder tiers that never hold data.
    fn is_enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Outcome of one cold-tier compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub expired_removed: u64,
    pub evicted: u64,
    pub size_before: u64,
    pub size_after: u64,
}

impl CompactionReport {
    pub fn removed(&self) -> u64 {
        self.expired_removed + self.evicted
    }
}

/// The durable, size-bounded tier.
#[async_trait]
pub trait ColdStore: CacheTier {
    /// Drop expired rows, then least-recently-accessed rows until under the size cap.
    async fn compact(&self) -> Result<CompactionReport>;
    /// Bytes currently accounted to stored entries.
    async fn total_size(&self) -> Result<u64>;
    /// Signal fired when a write leaves the store above its size cap.
    fn pressure(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Tier that stores nothing; stands in for a disabled warm or cold layer.
#[derive(Debug, Clone, Copy)]
pub struct NullTier {
    kind: TierKind,
}

impl NullTier {
    pub fn new(kind: TierKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl CacheTier for NullTier {
    fn kind(&self) -> TierKind {
        self.kind
    }
    async fn get(&self, _: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(None)
    }
    async fn put(&self, _: &CacheEntry, _: Duration) -> Result<()> {
        Ok(())
    }
    async fn remove(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn is_enabled(&self) -> bool {
        false
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

#[async_trait]
impl ColdStore for NullTier {
    async fn compact(&self) -> Result<CompactionReport> {
        Ok(CompactionReport::default())
    }
    async fn total_size(&self) -> Result<u64> {
        Ok(0)
    }
}
