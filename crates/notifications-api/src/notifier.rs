//! Notification delivery.
//!
//! Delivery channels (email, chat, webhook, ...) live behind the [`Notifier`]
//! trait. The trait enables mocking of delivery in unit tests.

use crate::error::NotificationError;
use crate::models::Notification;
use tracing::info;

/// Delivers rendered notifications.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Notifier that only logs what would be delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            trigger = %notification.trigger,
            destination = %notification.destination,
            object = %notification.object,
            resource_version = notification.resource_version.as_deref().unwrap_or(""),
            "Notification ready for delivery"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Destination;

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        let notification = Notification {
            trigger: "on-created".to_string(),
            destination: Destination::new("slack", "alerts"),
            object: "default/demo".to_string(),
            resource_version: Some("42".to_string()),
            vars: serde_json::Map::new(),
            created_at: chrono::Utc::now(),
        };
        assert!(LogNotifier.send(&notification).await.is_ok());
    }
}
