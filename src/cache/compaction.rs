//! Background cold-tier compaction.

use super::coordinator::CacheCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodic maintenance task, independent of request handling.
///
/// Runs [`CacheCoordinator::compact`] every `interval`, and early whenever the
/// cold tier reports it went over its size cap. Stop it with
/// [`CompactionTask::shutdown`]; dropping the handle detaches the task.
pub struct CompactionTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<u64>,
}

impl CompactionTask {
    pub fn spawn(coordinator: Arc<CacheCoordinator>, interval: Duration) -> Self {
        let (tx, mut rx) = oneshot::channel::<()>();
        let pressure = coordinator.compaction_signal();
        let interval = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            let mut runs = 0u64;
            info!(interval_ms = interval.as_millis() as u64, "compaction task started");

            loop {
                let trigger = tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => "schedule",
                    _ = wait_for(pressure.as_deref()) => "pressure",
                };
                runs += 1;
                match coordinator.compact().await {
                    Ok(report) => debug!(
                        trigger,
                        removed = report.removed(),
                        size_after = report.size_after,
                        "compaction pass finished"
                    ),
                    Err(e) => warn!(trigger, error = %e, "compaction pass failed"),
                }
            }
            info!(runs, "compaction task stopped");
            runs
        });

        Self {
            shutdown: Some(tx),
            handle,
        }
    }

    /// Stop the task and wait for an in-progress pass to finish. Returns the number of passes run.
    pub async fn shutdown(mut self) -> u64 {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.handle).await.unwrap_or(0)
    }
}

async fn wait_for(signal: Option<&Notify>) {
    match signal {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        CacheCoordinator, CacheEntry, CoordinatorConfig, MemoryTier, NullTier, SqliteColdTier,
        TierKind,
    };
    use crate::cache::backend::ColdStore;
    use crate::clock::{Clock, SystemClock};
    use crate::error::BackendId;
    use crate::routing::ComplexityTier;
    use crate::types::{GenerationRequest, GenerationResponse};

    fn big_entry(prompt: &str, now: u64) -> CacheEntry {
        let key = crate::cache::CacheKeyGenerator::new()
            .generate(&GenerationRequest::chat(prompt))
            .unwrap();
        CacheEntry::new(
            key,
            GenerationResponse {
                content: "y".repeat(400),
                model: "llama3.2".into(),
                backend: BackendId::Local,
                enriched: false,
                complexity: ComplexityTier::Medium,
            },
            now,
        )
    }

    #[tokio::test]
    async fn pressure_triggers_compaction_without_waiting_for_schedule() {
        let clock: crate::clock::SharedClock = Arc::new(SystemClock);
        let cold = Arc::new(SqliteColdTier::in_memory(1_000, clock.clone()).unwrap());
        let coordinator = Arc::new(CacheCoordinator::new(
            Arc::new(MemoryTier::new(8, 1, clock.clone())),
            Arc::new(NullTier::new(TierKind::Warm)),
            cold.clone(),
            CoordinatorConfig::default(),
            clock.clone(),
        ));
        let task = CompactionTask::spawn(Arc::clone(&coordinator), Duration::from_secs(3600));

        for i in 0..4 {
            coordinator
                .set(&big_entry(&format!("p{i}"), clock.now_millis()))
                .await
                .unwrap();
        }

        let mut size = cold.total_size().await.unwrap();
        for _ in 0..100 {
            if size <= 1_000 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            size = cold.total_size().await.unwrap();
        }
        assert!(size <= 1_000, "cold tier still at {size} bytes");
        assert!(task.shutdown().await >= 1);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_task() {
        let clock: crate::clock::SharedClock = Arc::new(SystemClock);
        let coordinator = Arc::new(CacheCoordinator::new(
            Arc::new(MemoryTier::new(8, 1, clock.clone())),
            Arc::new(NullTier::new(TierKind::Warm)),
            Arc::new(NullTier::new(TierKind::Cold)),
            CoordinatorConfig::default(),
            clock,
        ));
        let task = CompactionTask::spawn(coordinator, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(task.shutdown().await >= 1);
    }
}
