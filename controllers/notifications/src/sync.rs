//! Startup barrier over the watch sources.
//!
//! Reconciliation must not start until every cache reflects its initial
//! list. Waiting ends early when the shared cancellation signal fires, when
//! the optional timeout elapses, or when a source stops before syncing.

use crate::error::{ControllerError, SyncFailure};
use crate::watcher::SyncStatus;
use futures::future::try_join_all;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits until every source in `sources` reports synced.
///
/// Cancellation takes priority: a cancelled token fails the wait even if
/// the sources are synced. `timeout` of `None` waits indefinitely.
pub async fn wait_for_cache_sync(
    sources: &[&dyn SyncStatus],
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<(), ControllerError> {
    let waits = sources.iter().map(|source| {
        let kind = source.source_kind();
        let mut state = source.state_receiver();
        async move {
            let synced = state.wait_for(|s| s.is_synced()).await.is_ok();
            if synced {
                info!("{} cache synced", kind);
                Ok(())
            } else {
                Err(kind)
            }
        }
    });

    let deadline = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SyncFailure::Cancelled),
        () = deadline => Err(SyncFailure::TimedOut),
        res = try_join_all(waits) => res.map(|_| ()).map_err(|_| SyncFailure::SourceStopped),
    };

    outcome.map_err(|reason| {
        let pending = pending_sources(sources);
        error!("Failed to sync caches ({}), pending: {}", reason, pending);
        ControllerError::CacheSync { reason, pending }
    })
}

fn pending_sources(sources: &[&dyn SyncStatus]) -> String {
    sources
        .iter()
        .filter(|source| !source.state_receiver().borrow().is_synced())
        .map(|source| source.source_kind().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::{SourceKind, SourceState};
    use tokio::sync::watch;

    struct FakeStatus {
        kind: SourceKind,
        state: watch::Sender<SourceState>,
    }

    impl FakeStatus {
        fn new(kind: SourceKind, state: SourceState) -> Self {
            Self {
                kind,
                state: watch::Sender::new(state),
            }
        }
    }

    impl SyncStatus for FakeStatus {
        fn source_kind(&self) -> SourceKind {
            self.kind
        }

        fn state_receiver(&self) -> watch::Receiver<SourceState> {
            self.state.subscribe()
        }
    }

    /// A source whose writer has gone away
    struct Orphan(watch::Receiver<SourceState>);

    impl SyncStatus for Orphan {
        fn source_kind(&self) -> SourceKind {
            SourceKind::Secret
        }

        fn state_receiver(&self) -> watch::Receiver<SourceState> {
            self.0.clone()
        }
    }

    fn three(secret: SourceState) -> [FakeStatus; 3] {
        [
            FakeStatus::new(SourceKind::Configuration, SourceState::Synced),
            FakeStatus::new(SourceKind::Secret, secret),
            FakeStatus::new(SourceKind::Target, SourceState::Synced),
        ]
    }

    #[tokio::test]
    async fn test_all_synced_succeeds() {
        let sources = three(SourceState::Synced);
        let refs: Vec<&dyn SyncStatus> = sources.iter().map(|s| s as &dyn SyncStatus).collect();

        let result = wait_for_cache_sync(&refs, &CancellationToken::new(), None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_empty_source_list_succeeds() {
        let result = wait_for_cache_sync(&[], &CancellationToken::new(), None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_waits_for_late_sync() {
        let sources = three(SourceState::Listing);
        let refs: Vec<&dyn SyncStatus> = sources.iter().map(|s| s as &dyn SyncStatus).collect();
        let secret = &sources[1].state;

        let flip = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            secret.send_replace(SourceState::Syncing);
            secret.send_replace(SourceState::Synced);
        };

        let cancel = CancellationToken::new();
        let (result, ()) = tokio::join!(wait_for_cache_sync(&refs, &cancel, None), flip);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_reports_pending_sources() {
        let sources = three(SourceState::Syncing);
        let refs: Vec<&dyn SyncStatus> = sources.iter().map(|s| s as &dyn SyncStatus).collect();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = wait_for_cache_sync(&refs, &cancel, None).await.unwrap_err();
        match err {
            ControllerError::CacheSync { reason, pending } => {
                assert_eq!(reason, SyncFailure::Cancelled);
                assert_eq!(pending, "Secret");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapses() {
        let sources = three(SourceState::Listing);
        let refs: Vec<&dyn SyncStatus> = sources.iter().map(|s| s as &dyn SyncStatus).collect();

        let err = wait_for_cache_sync(&refs, &CancellationToken::new(), Some(Duration::from_secs(300)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::CacheSync {
                reason: SyncFailure::TimedOut,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stopped_source_fails() {
        let [config, secret, target] = three(SourceState::Listing);
        config.state.send_replace(SourceState::Synced);
        target.state.send_replace(SourceState::Synced);
        let orphan = Orphan(secret.state.subscribe());
        drop(secret);

        let refs: Vec<&dyn SyncStatus> = vec![&config, &orphan, &target];
        let err = wait_for_cache_sync(&refs, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        match err {
            ControllerError::CacheSync { reason, pending } => {
                assert_eq!(reason, SyncFailure::SourceStopped);
                assert_eq!(pending, "Secret");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_first() {
        let sources = three(SourceState::Synced);
        let refs: Vec<&dyn SyncStatus> = sources.iter().map(|s| s as &dyn SyncStatus).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_cache_sync(&refs, &cancel, None).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::CacheSync {
                reason: SyncFailure::Cancelled,
                ..
            }
        ));
    }
}
