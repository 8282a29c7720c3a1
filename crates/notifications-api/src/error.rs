//! Notification engine errors

use thiserror::Error;

/// Errors raised while turning an observed object into template variables.
///
/// Binding errors are per-item: the caller reports them and moves on to the
/// next object or destination.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    /// The observed object is not a JSON object (field-bag)
    #[error("observed object is not a field-bag, found {found}")]
    NotAnObject {
        /// JSON type that was found instead
        found: &'static str,
    },

    /// The object could not be converted into a generic document
    #[error("failed to convert object: {0}")]
    Conversion(String),
}

/// Errors that can occur inside the notification engine
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Configuration object is not present in the cache
    #[error("ConfigMap {namespace}/{name} not found")]
    ConfigMapNotFound {
        /// Namespace that was searched
        namespace: String,
        /// Object name
        name: String,
    },

    /// Malformed notification configuration
    #[error("Invalid notification configuration: {0}")]
    InvalidConfig(String),

    /// YAML parsing error in the configuration object
    #[error("Failed to parse {key}: {source}")]
    Parse {
        /// Configuration key being parsed
        key: String,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// Variable binding failed
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    /// Delivery through a notification service failed
    #[error("Delivery to {destination} failed: {reason}")]
    Delivery {
        /// Destination in `service:recipient` form
        destination: String,
        /// Failure description
        reason: String,
    },
}
