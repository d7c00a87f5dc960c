//! Worker lifecycle controller.
//!
//! The worker does not own a thread: "running" is a flag in the store that an
//! external poller reads (via the tick endpoint) to decide whether to keep
//! calling. After `empty_tick_threshold` consecutive empty ticks the flag is
//! cleared and the poller stops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use leadflow_outbound::WorkerState;

use crate::store::{StoreResult, WorkerStateStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub started: bool,
    pub already_running: bool,
    pub state: WorkerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmptyTick {
    pub empty_tick_count: u32,
    /// This tick reached the threshold and stopped the worker.
    pub stopped: bool,
}

pub struct LifecycleController<S: ?Sized> {
    store: Arc<S>,
    empty_tick_threshold: u32,
}

impl<S: ?Sized> Clone for LifecycleController<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            empty_tick_threshold: self.empty_tick_threshold,
        }
    }
}

impl<S> LifecycleController<S>
where
    S: WorkerStateStore + ?Sized,
{
    pub fn new(store: Arc<S>, empty_tick_threshold: u32) -> Self {
        Self {
            store,
            empty_tick_threshold,
        }
    }

    /// Idempotent: a second call while running changes nothing.
    pub async fn start(&self, now: DateTime<Utc>) -> StoreResult<StartOutcome> {
        let (started, state) = self.store.start_worker(now).await?;
        if started {
            info!(worker = %state.id, "outbound worker started");
        }
        Ok(StartOutcome {
            started,
            already_running: !started,
            state,
        })
    }

    pub async fn is_running(&self) -> StoreResult<bool> {
        Ok(self.store.worker_state().await?.is_running)
    }

    pub async fn increment_empty_tick_count(&self, now: DateTime<Utc>) -> StoreResult<EmptyTick> {
        let (stopped, state) = self
            .store
            .increment_empty_tick(self.empty_tick_threshold, now)
            .await?;
        if stopped {
            info!(
                worker = %state.id,
                empty_ticks = state.empty_tick_count,
                "outbound worker stopped after consecutive empty ticks"
            );
        }
        Ok(EmptyTick {
            empty_tick_count: state.empty_tick_count,
            stopped,
        })
    }

    pub async fn reset_empty_tick_count(&self, now: DateTime<Utc>) -> StoreResult<()> {
        self.store.reset_empty_tick(now).await?;
        Ok(())
    }

    pub async fn stop(&self, now: DateTime<Utc>) -> StoreResult<WorkerState> {
        let state = self.store.stop_worker(now).await?;
        info!(worker = %state.id, "outbound worker stopped");
        Ok(state)
    }

    pub async fn status(&self) -> StoreResult<WorkerState> {
        self.store.worker_state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn controller() -> LifecycleController<InMemoryStore> {
        LifecycleController::new(InMemoryStore::arc(), 3)
    }

    #[tokio::test]
    async fn start_twice_reports_already_running() {
        let lifecycle = controller();
        let now = Utc::now();

        let first = lifecycle.start(now).await.unwrap();
        assert!(first.started);
        assert!(!first.already_running);

        let second = lifecycle.start(now).await.unwrap();
        assert!(!second.started);
        assert!(second.already_running);
        assert!(lifecycle.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn third_empty_tick_stops_the_worker() {
        let lifecycle = controller();
        let now = Utc::now();
        lifecycle.start(now).await.unwrap();

        assert!(!lifecycle.increment_empty_tick_count(now).await.unwrap().stopped);
        assert!(!lifecycle.increment_empty_tick_count(now).await.unwrap().stopped);
        let third = lifecycle.increment_empty_tick_count(now).await.unwrap();

        assert!(third.stopped);
        assert_eq!(third.empty_tick_count, 3);
        assert!(!lifecycle.is_running().await.unwrap());
        assert_eq!(lifecycle.status().await.unwrap().stopped_at, Some(now));
    }

    #[tokio::test]
    async fn reset_between_empty_ticks_keeps_running() {
        let lifecycle = controller();
        let now = Utc::now();
        lifecycle.start(now).await.unwrap();

        lifecycle.increment_empty_tick_count(now).await.unwrap();
        lifecycle.increment_empty_tick_count(now).await.unwrap();
        lifecycle.reset_empty_tick_count(now).await.unwrap();
        lifecycle.increment_empty_tick_count(now).await.unwrap();

        let state = lifecycle.status().await.unwrap();
        assert!(state.is_running);
        assert_eq!(state.empty_tick_count, 1);
        assert_eq!(state.last_tick_at, Some(now));
    }

    #[tokio::test]
    async fn status_of_fresh_store_is_stopped() {
        let state = controller().status().await.unwrap();
        assert_eq!(state.id, "outbound");
        assert!(!state.is_running);
        assert_eq!(state.started_at, None);
    }
}
