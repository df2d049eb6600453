//! In-process LRU tier.

use super::backend::CacheTier;
use super::entry::{CacheEntry, TierKind};
use super::key::CacheKey;
use crate::clock::SharedClock;
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Bounded in-memory tier.
///
/// Entries are spread over independently locked shards by key fingerprint, so
/// unrelated keys rarely contend. Each shard is a strict LRU over its share
/// of the total capacity, and the shares add up to `capacity` exactly; with a
/// single shard the whole tier is one strict LRU over `capacity` entries.
pub struct MemoryTier {
    shards: Vec<Mutex<LruCache<CacheKey, CacheEntry>>>,
    clock: SharedClock,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize, shards: usize, clock: SharedClock) -> Self {
        let capacity = capacity.max(1);
        let shard_count = shards.clamp(1, capacity);
        // Shard sizes sum to exactly `capacity`; the first `capacity % shard_count` take one extra.
        let (base, extra) = (capacity / shard_count, capacity % shard_count);
        let shards = (0..shard_count)
            .map(|i| {
                let size = base + usize::from(i < extra);
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN),
                ))
            })
            .collect();
        Self {
            shards,
            clock,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &CacheKey) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        let idx = (key.shard_hint() % self.shards.len() as u64) as usize;
        // A poisoned shard still holds consistent LRU state; keep serving it.
        self.shards[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().unwrap_or_else(|p| p.into_inner());
            let expired: Vec<CacheKey> = guard
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for k in expired {
                guard.pop(&k);
                removed += 1;
            }
        }
        removed
    }

    pub fn get_sync(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.now_millis();
        let mut shard = self.shard(key);
        let expired = match shard.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now);
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            shard.pop(key);
        }
        None
    }

    pub fn put_sync(&self, entry: &CacheEntry, ttl: Duration) {
        let now = self.clock.now_millis();
        let stored = entry.stored_in(TierKind::Memory, ttl, now);
        self.shard(&entry.key).put(entry.key.clone(), stored);
    }

    pub fn remove_sync(&self, key: &CacheKey) -> bool {
        self.shard(key).pop(key).is_some()
    }

    pub fn len_sync(&self) -> usize {
        let now = self.clock.now_millis();
        self.shards
            .iter()
            .map(|s| {
                s.lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .count()
            })
            .sum()
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.get_sync(key))
    }
    async fn put(&self, entry: &CacheEntry, ttl: Duration) -> Result<()> {
        self.put_sync(entry, ttl);
        Ok(())
    }
    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.remove_sync(key))
    }
    async fn len(&self) -> Result<usize> {
        Ok(self.len_sync())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}
