//! Background sync loop.
//!
//! Runs [`SyncEngine::run_sync_cycle`] on a fixed interval and on demand.
//! The latest cycle report is published on a watch channel for the UI.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use driftsync_store::Store;

use crate::engine::SyncEngine;
use crate::report::SyncReport;
use crate::transport::RemoteTransport;

/// Handle to a running background sync task.
pub struct SyncScheduler {
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
    reports: watch::Receiver<Option<SyncReport>>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start the loop. The first cycle runs immediately, then every
    /// `sync_interval` from the engine's config.
    pub fn spawn<S, R>(engine: Arc<SyncEngine<S, R>>) -> Self
    where
        S: Store + 'static,
        R: RemoteTransport + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());
        let (tx, reports) = watch::channel(None);
        let period = engine.config().sync_interval;

        let handle = tokio::spawn(run(
            engine,
            period,
            trigger.clone(),
            shutdown.clone(),
            tx,
        ));

        Self {
            trigger,
            shutdown,
            reports,
            handle,
        }
    }

    /// Run a cycle as soon as the current one (if any) finishes.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Receiver of cycle reports. Holds `None` until the first cycle ends.
    pub fn subscribe(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    /// The most recent cycle report.
    pub fn latest(&self) -> Option<SyncReport> {
        self.reports.borrow().clone()
    }

    /// Stop the loop and wait for an in-flight cycle to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "sync scheduler task ended abnormally");
        }
    }
}

async fn run<S, R>(
    engine: Arc<SyncEngine<S, R>>,
    period: Duration,
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
    reports: watch::Sender<Option<SyncReport>>,
) where
    S: Store + 'static,
    R: RemoteTransport + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(?period, "sync scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = trigger.notified() => {}
            _ = ticker.tick() => {}
        }

        match engine.run_sync_cycle().await {
            Ok(report) => {
                reports.send_replace(Some(report));
            }
            Err(err) => tracing::error!(error = %err, "sync cycle failed"),
        }
    }

    tracing::debug!("sync scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::{CollectionSchema, Origin, Record, Schema};
    use driftsync_store::{MemoryStore, Outbox, RecordStore};

    use crate::config::SyncConfig;
    use crate::transport::memory::MemoryRemote;

    async fn next_report(rx: &mut watch::Receiver<Option<SyncReport>>) -> SyncReport {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("no report within 5s")
            .unwrap();
        rx.borrow_and_update().clone().unwrap()
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_triggers() {
        let store =
            Arc::new(MemoryStore::new(Schema::new().collection(CollectionSchema::new("beds"))).unwrap());
        let remote = MemoryRemote::new();
        let config = SyncConfig::default().with_sync_interval(Duration::from_secs(3600));
        let engine = Arc::new(SyncEngine::new(store.clone(), remote.clone(), config));

        store
            .put("beds", Record::new("b1", 1), Origin::Local)
            .await
            .unwrap();

        let scheduler = SyncScheduler::spawn(engine);
        let mut rx = scheduler.subscribe();

        let first = next_report(&mut rx).await;
        assert_eq!(first.processed, 1);

        store
            .put("beds", Record::new("b2", 2), Origin::Local)
            .await
            .unwrap();
        scheduler.trigger();
        let second = next_report(&mut rx).await;
        assert_eq!(second.processed, 1);
        assert_eq!(scheduler.latest(), Some(second));

        scheduler.shutdown().await;
        assert!(store.enumerate_pending().await.unwrap().is_empty());
        assert!(remote.get("beds", "b2").await.is_some());
    }

    #[tokio::test]
    async fn test_scheduler_reports_offline_cycles() {
        let store =
            Arc::new(MemoryStore::new(Schema::new().collection(CollectionSchema::new("beds"))).unwrap());
        let remote = MemoryRemote::new();
        remote.set_reachable(false);
        let engine = Arc::new(SyncEngine::new(store, remote, SyncConfig::default()));

        let scheduler = SyncScheduler::spawn(engine);
        let mut rx = scheduler.subscribe();
        assert!(next_report(&mut rx).await.offline);
        scheduler.shutdown().await;
    }
}
