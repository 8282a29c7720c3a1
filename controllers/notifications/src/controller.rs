//! Main controller implementation.
//!
//! This module contains the `Handoff` that orchestrates startup: it starts
//! the three watch sources, waits until every cache is synced, and only then
//! builds and runs the reconciliation loop.
//!
//! Any failure before reconciliation starts is fatal. There is no degraded
//! mode: notifying against a cold cache produces both missed and spurious
//! notifications.

use crate::error::ControllerError;
use crate::reconciler::Reconciliation;
use crate::sync::wait_for_cache_sync;
use crate::watcher::{DriverOutcome, SourceDrivers, WatchSource, WatchSourceSet};
use kube::core::DynamicObject;
use notifications_api::{Factory, NotificationContext};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Grace period for watch drivers to stop after cancellation
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Orchestrates startup and hands off to reconciliation.
#[derive(Debug, Clone)]
pub struct Handoff {
    concurrency: NonZeroUsize,
    sync_timeout: Option<Duration>,
    grace_period: Duration,
    ready: Arc<AtomicBool>,
}

impl Handoff {
    /// Creates a handoff that runs reconciliation with `concurrency` workers
    /// and waits indefinitely for caches to sync.
    pub fn new(concurrency: NonZeroUsize) -> Self {
        Self {
            concurrency,
            sync_timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bounds the startup cache sync. `None` waits until cancelled.
    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// How long shutdown waits for reconciliation and watches to stop.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Flag set once every cache is synced, shared with the readiness probe.
    #[must_use]
    pub fn with_readiness(mut self, ready: Arc<AtomicBool>) -> Self {
        self.ready = ready;
        self
    }

    /// Runs until `cancel` fires or a fatal error occurs.
    ///
    /// `build` is invoked exactly once, after every source has synced, with
    /// the target source and the notification context read from the caches.
    /// It is never invoked when synchronization fails.
    ///
    /// On return the token is cancelled and the watch drivers are given the
    /// grace period to stop before they are aborted.
    pub async fn run<R, B>(
        &self,
        sources: WatchSourceSet,
        drivers: SourceDrivers,
        factory: &Factory,
        build: B,
        cancel: CancellationToken,
    ) -> Result<(), ControllerError>
    where
        R: Reconciliation,
        B: FnOnce(WatchSource<DynamicObject>, NotificationContext) -> R,
    {
        let mut tasks = JoinSet::new();
        drivers.spawn(&mut tasks, &cancel);

        let result = self.serve(sources, &mut tasks, factory, build, &cancel).await;
        if let Err(e) = &result {
            error!("Notifications controller failed: {}", e);
        }

        cancel.cancel();
        self.drain(tasks).await;
        result
    }

    async fn serve<R, B>(
        &self,
        sources: WatchSourceSet,
        tasks: &mut JoinSet<DriverOutcome>,
        factory: &Factory,
        build: B,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError>
    where
        R: Reconciliation,
        B: FnOnce(WatchSource<DynamicObject>, NotificationContext) -> R,
    {
        info!("Waiting for informers to sync");
        wait_for_cache_sync(&sources.all(), cancel, self.sync_timeout).await?;
        self.ready.store(true, Ordering::Relaxed);
        info!("All informers synced");

        let context = factory.context()?;
        info!(
            "Loaded notification configuration from {}: {} services, {} triggers",
            factory.namespace(),
            context.config.services.len(),
            context.config.triggers.len()
        );

        let reconciler = build(sources.targets, context);

        tokio::select! {
            result = reconciler.run(self.concurrency, cancel.clone()) => result,
            Some(joined) = tasks.join_next() => driver_exit(joined, cancel),
        }
    }

    async fn drain(&self, mut tasks: JoinSet<DriverOutcome>) {
        let drained = tokio::time::timeout(self.grace_period, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((kind, Ok(()))) => debug!("{} watcher finished", kind),
                    Ok((kind, Err(e))) => warn!("{} watcher finished with error: {}", kind, e),
                    Err(e) => warn!("Watcher task failed: {}", e),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Watchers did not stop within {:?}, aborting {} remaining",
                self.grace_period,
                tasks.len()
            );
            tasks.abort_all();
        }
    }
}

/// Maps a driver that ended while reconciliation was running to the outcome
/// of the whole run.
fn driver_exit(
    joined: Result<DriverOutcome, tokio::task::JoinError>,
    cancel: &CancellationToken,
) -> Result<(), ControllerError> {
    match joined {
        Ok((_, Ok(()))) if cancel.is_cancelled() => Ok(()),
        Ok((kind, Ok(()))) => Err(ControllerError::Watch(format!("{kind} watcher exited"))),
        Ok((_, Err(e))) => Err(e),
        Err(e) => Err(ControllerError::Watch(format!("watcher task panicked: {e}"))),
    }
}
