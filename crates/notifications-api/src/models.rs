//! Notification models

use crate::error::NotificationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a notification is delivered: a configured service plus a recipient
/// understood by that service (channel, address, webhook name, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination {
    /// Service name as configured under `service.<name>`
    pub service: String,
    /// Service-specific recipient
    pub recipient: String,
}

impl Destination {
    /// Creates a destination.
    pub fn new(service: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            recipient: recipient.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.recipient)
    }
}

/// Parses the `service:recipient` form used in default subscriptions.
impl FromStr for Destination {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (service, recipient) = s.trim().split_once(':').ok_or_else(|| {
            NotificationError::InvalidConfig(format!(
                "recipient '{s}' must have the form service:recipient"
            ))
        })?;
        if service.is_empty() || recipient.is_empty() {
            return Err(NotificationError::InvalidConfig(format!(
                "recipient '{s}' has an empty service or recipient"
            )));
        }
        Ok(Self::new(service, recipient))
    }
}

/// A notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Trigger that selected this notification
    pub trigger: String,
    /// Delivery destination
    pub destination: Destination,
    /// `namespace/name` of the observed object
    pub object: String,
    /// Resource version of the observed object when the notification was built
    pub resource_version: Option<String>,
    /// Template variables produced by the binding adapter
    pub vars: serde_json::Map<String, serde_json::Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
