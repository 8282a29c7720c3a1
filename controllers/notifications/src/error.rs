//! Controller-specific error types.
//!
//! This module defines error types specific to the Notifications Controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use notifications_api::NotificationError;
use std::fmt;
use thiserror::Error;

/// Why the startup cache synchronization did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailure {
    /// The shared cancellation signal fired first
    Cancelled,
    /// The allotted wait elapsed
    TimedOut,
    /// A watch source stopped before reporting synced
    SourceStopped,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut => f.write_str("timed out"),
            Self::SourceStopped => f.write_str("watch source stopped"),
        }
    }
}

/// Errors that can occur in the Notifications Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster credentials or namespace could not be resolved
    #[error("Failed to resolve cluster credentials: {0}")]
    Credentials(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Notification engine error
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    /// Startup cache synchronization failed
    #[error("Failed to synchronize informers ({reason}), pending sources: {pending}")]
    CacheSync {
        /// Failure reason
        reason: SyncFailure,
        /// Comma-separated list of sources that were not synced
        pending: String,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe/metrics server failed
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),
}
