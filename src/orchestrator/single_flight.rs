//! Per-key collapsing of concurrent identical generations.

use crate::cache::CacheKey;
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Outcome every waiter of one flight observes. The error is shared, callers
/// hand out copies with [`Error::replicate`].
pub type FlightResult<T> = std::result::Result<T, Arc<Error>>;

/// Handle on an in-flight call. Cloning is cheap; awaiting never cancels the call.
pub type Flight<T> = Shared<BoxFuture<'static, FlightResult<T>>>;

struct Slot<T: Clone> {
    id: u64,
    flight: Flight<T>,
}

/// In-flight table, sharded by key so unrelated keys never contend on one lock.
///
/// The first caller for a key starts the work on a spawned task and becomes the
/// leader; callers arriving while it runs join the same [`Flight`]. The work
/// outlives every waiter, so a caller that goes away does not abort it. The
/// slot is cleared by the task itself once the work finishes, success or not,
/// so the next caller after a failure starts fresh.
pub struct SingleFlight<T: Clone> {
    shards: Vec<Mutex<HashMap<CacheKey, Slot<T>>>>,
    next_id: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            next_id: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> MutexGuard<'_, HashMap<CacheKey, Slot<T>>> {
        let idx = (key.shard_hint() % self.shards.len() as u64) as usize;
        self.shards[idx].lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the flight for `key`, or start one from `make`.
    ///
    /// `make` is only called when no flight is running; the boolean is `true`
    /// for the caller that started it. Must be called within a tokio runtime.
    pub fn join_or_start<F, Fut>(self: &Arc<Self>, key: &CacheKey, make: F) -> (Flight<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut slots = self.shard(key);
        if let Some(slot) = slots.get(key) {
            debug!(key = %key, "joining in-flight generation");
            return (slot.flight.clone(), false);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work = make();
        let table = Arc::clone(self);
        let owned_key = key.clone();
        let handle = tokio::spawn(async move {
            let out = work.await.map_err(Arc::new);
            table.finish(&owned_key, id);
            out
        });
        let flight = async move {
            match handle.await {
                Ok(out) => out,
                Err(join) => Err(Arc::new(Error::GenerationFailed(format!(
                    "generation task aborted: {}",
                    join
                )))),
            }
        }
        .boxed()
        .shared();

        slots.insert(
            key.clone(),
            Slot {
                id,
                flight: flight.clone(),
            },
        );
        (flight, true)
    }

    fn finish(&self, key: &CacheKey, id: u64) {
        let mut slots = self.shard(key);
        if slots.get(key).map(|s| s.id) == Some(id) {
            slots.remove(key);
        }
    }

    /// Keys with a flight currently running.
    pub fn in_flight(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }
}
