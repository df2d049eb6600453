//! Cache entries and tier identities.

use super::key::CacheKey;
use crate::types::GenerationResponse;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The three storage layers, ordered by increasing latency and durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Memory,
    Warm,
    Cold,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Warm => "warm",
            TierKind::Cold => "cold",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier time-to-live used by `CacheCoordinator::set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub memory: Duration,
    pub warm: Duration,
    pub cold: Duration,
}

impl TtlPolicy {
    pub fn for_tier(&self, tier: TierKind) -> Duration {
        match tier {
            TierKind::Memory => self.memory,
            TierKind::Warm => self.warm,
            TierKind::Cold => self.cold,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            memory: Duration::from_secs(300),
            warm: Duration::from_secs(3600),
            cold: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// A cached generation plus bookkeeping. All timestamps are clock milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: GenerationResponse,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub access_count: u64,
    /// Tier this copy was read from or written to.
    pub tier_origin: TierKind,
    pub expires_at: u64,
}

impl CacheEntry {
    /// Fresh entry for a just-generated response. Tiers stamp their own expiry on write.
    pub fn new(key: CacheKey, payload: GenerationResponse, now_ms: u64) -> Self {
        Self {
            key,
            payload,
            created_at: now_ms,
            last_accessed_at: now_ms,
            access_count: 0,
            tier_origin: TierKind::Memory,
            expires_at: now_ms,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn remaining_ttl(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_ms))
    }

    /// Copy of this entry as stored in `tier` for `ttl` starting at `now_ms`.
    /// A write counts as an access.
    pub fn stored_in(&self, tier: TierKind, ttl: Duration, now_ms: u64) -> Self {
        let mut copy = self.clone();
        copy.tier_origin = tier;
        copy.last_accessed_at = copy.last_accessed_at.max(now_ms);
        copy.expires_at = now_ms.saturating_add(ttl.as_millis() as u64);
        copy
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_accessed_at = now_ms;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Equality ignoring tier bookkeeping.
    pub fn same_content(&self, other: &CacheEntry) -> bool {
        self.key == other.key && self.payload == other.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendId;
    use crate::routing::ComplexityTier;

    fn entry(now: u64) -> CacheEntry {
        let key = CacheKey::from_hex("a".repeat(64)).unwrap();
        let payload = GenerationResponse {
            content: "4".into(),
            model: "llama3.2".into(),
            backend: BackendId::Local,
            enriched: false,
            complexity: ComplexityTier::Low,
        };
        CacheEntry::new(key, payload, now)
    }

    #[test]
    fn expiry_is_stamped_per_tier() {
        let e = entry(500).stored_in(TierKind::Warm, Duration::from_secs(2), 1_000);
        assert_eq!(e.tier_origin, TierKind::Warm);
        assert_eq!(e.created_at, 500);
        assert_eq!(e.last_accessed_at, 1_000);
        assert!(!e.is_expired(2_999));
        assert!(e.is_expired(3_000));
        assert_eq!(e.remaining_ttl(2_500), Duration::from_millis(500));
        assert_eq!(e.remaining_ttl(9_000), Duration::ZERO);
    }

    #[test]
    fn ttl_policy_picks_each_tier() {
        let policy = TtlPolicy {
            memory: Duration::from_secs(1),
            warm: Duration::from_secs(2),
            cold: Duration::from_secs(3),
        };
        assert_eq!(policy.for_tier(TierKind::Memory), Duration::from_secs(1));
        assert_eq!(policy.for_tier(TierKind::Warm), Duration::from_secs(2));
        assert_eq!(policy.for_tier(TierKind::Cold), Duration::from_secs(3));
    }

    #[test]
    fn touch_refreshes_bookkeeping_only() {
        let original = entry(10);
        let mut touched = original.clone();
        touched.touch(50);
        assert_eq!(touched.access_count, 1);
        assert_eq!(touched.last_accessed_at, 50);
        assert!(touched.same_content(&original));
        assert_ne!(touched, original);
    }
}
