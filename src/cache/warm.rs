//! Redis-backed warm tier.

use super::backend::CacheTier;
use super::entry::{CacheEntry, TierKind};
use super::key::CacheKey;
use crate::clock::SharedClock;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared network cache. Expiry is delegated to Redis (`SET .. EX`), and the
/// memory cap is enforced by the server's own `maxmemory` eviction policy.
///
/// The connection is established lazily and re-established after failures, so
/// a Redis that is down at startup only degrades the tier instead of
/// preventing the process from starting.
pub struct RedisWarmTier {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    prefix: String,
    max_memory_mb: Option<u64>,
    clock: SharedClock,
}

impl RedisWarmTier {
    pub fn new(url: &str, clock: SharedClock) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            prefix: "ai-orch:resp:".to_string(),
            max_memory_mb: None,
            clock,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Ask the server to cap its memory (LRU eviction) on first connect.
    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = Some(mb).filter(|mb| *mb > 0);
        self
    }

    fn make_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let mut conn = ConnectionManager::new(self.client.clone()).await?;
        if let Some(mb) = self.max_memory_mb {
            // Managed Redis often forbids CONFIG; the tier works without it.
            let applied: redis::RedisResult<()> = redis::pipe()
                .cmd("CONFIG")
                .arg("SET")
                .arg("maxmemory")
                .arg(format!("{}mb", mb))
                .ignore()
                .cmd("CONFIG")
                .arg("SET")
                .arg("maxmemory-policy")
                .arg("allkeys-lru")
                .ignore()
                .query_async(&mut conn)
                .await;
            if let Err(e) = applied {
                warn!(error = %e, "could not apply warm tier memory cap");
            }
        }
        debug!("warm tier connected");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.conn.lock().await = None;
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match op(conn).await {
            Ok(v) => Ok(v),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    self.reset_connection().await;
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl CacheTier for RedisWarmTier {
    fn kind(&self) -> TierKind {
        TierKind::Warm
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let redis_key = self.make_key(key);
        let raw: Option<String> = self
            .run(|mut conn| async move { conn.get(redis_key).await })
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "dropping undecodable warm entry");
                let _ = self.remove(key).await;
                return Ok(None);
            }
        };
        let now = self.clock.now_millis();
        if entry.is_expired(now) {
            return Ok(None);
        }
        // Access bookkeeping is not written back; Redis owns expiry here.
        entry.touch(now);
        entry.tier_origin = TierKind::Warm;
        Ok(Some(entry))
    }

    async fn put(&self, entry: &CacheEntry, ttl: Duration) -> Result<()> {
        let now = self.clock.now_millis();
        let stored = entry.stored_in(TierKind::Warm, ttl, now);
        let body = serde_json::to_string(&stored)?;
        let redis_key = self.make_key(&entry.key);
        let secs = ttl.as_secs().max(1);
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(redis_key, body, secs).await })
            .await
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let redis_key = self.make_key(key);
        let removed: u64 = self
            .run(|mut conn| async move { conn.del(redis_key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn len(&self) -> Result<usize> {
        let pattern = format!("{}*", self.prefix);
        self.run(|mut conn| async move {
            let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
            let mut count = 0usize;
            while iter.next_item().await.is_some() {
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
