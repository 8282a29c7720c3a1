//! Recording notifier for unit testing
//!
//! Stores every notification in memory instead of delivering it. Services
//! can be marked as failing to exercise per-item error handling.

use crate::error::NotificationError;
use crate::models::Notification;
use crate::notifier::Notifier;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// In-memory notifier for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing_services: Arc<Mutex<HashSet<String>>>,
}

impl RecordingNotifier {
    /// Create a new recording notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to `service` fail
    pub fn fail_service(&self, service: impl Into<String>) {
        self.failing_services.lock().unwrap().insert(service.into());
    }

    /// Notifications delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        if self
            .failing_services
            .lock()
            .unwrap()
            .contains(&notification.destination.service)
        {
            return Err(NotificationError::Delivery {
                destination: notification.destination.to_string(),
                reason: "service marked as failing".to_string(),
            });
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
