//! Notification settings and the configuration parsed from the
//! configuration object.
//!
//! Keys understood in the ConfigMap data:
//!
//! - `service.<name>`: a delivery service definition (opaque to this crate)
//! - `trigger.<name>`: a trigger definition (opaque to this crate)
//! - `template.<name>`: a template definition (opaque to this crate)
//! - `subscriptions`: YAML list of default subscriptions applied to every
//!   observed object

use crate::error::{BindingError, NotificationError};
use crate::models::Destination;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const SERVICE_PREFIX: &str = "service.";
const TRIGGER_PREFIX: &str = "trigger.";
const TEMPLATE_PREFIX: &str = "template.";
const SUBSCRIPTIONS_KEY: &str = "subscriptions";

/// Template variables handed to the renderer.
pub type Vars = serde_json::Map<String, serde_json::Value>;

/// Builds template variables for one observed object and one destination.
pub type GetVars =
    Arc<dyn Fn(&serde_json::Value, &Destination) -> Result<Vars, BindingError> + Send + Sync>;

/// Produces a [`GetVars`] once the configuration and secret are known.
pub type InitGetVars = Arc<
    dyn Fn(&Config, &ConfigMap, &Secret) -> Result<GetVars, NotificationError> + Send + Sync,
>;

/// Settings for the notification factory
#[derive(Clone)]
pub struct Settings {
    /// Name of the configuration ConfigMap in the operator namespace
    pub config_map_name: String,
    /// Name of the Secret in the operator namespace
    pub secret_name: String,
    /// Variable initializer
    pub init_get_vars: InitGetVars,
}

impl Settings {
    /// Creates settings.
    pub fn new(
        config_map_name: impl Into<String>,
        secret_name: impl Into<String>,
        init_get_vars: InitGetVars,
    ) -> Self {
        Self {
            config_map_name: config_map_name.into(),
            secret_name: secret_name.into(),
            init_get_vars,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("config_map_name", &self.config_map_name)
            .field("secret_name", &self.secret_name)
            .finish_non_exhaustive()
    }
}

/// A subscription applied to every observed object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DefaultSubscription {
    /// Recipients in `service:recipient` form
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Trigger names
    #[serde(default)]
    pub triggers: Vec<String>,
}

impl DefaultSubscription {
    /// Parses the recipients into destinations.
    pub fn destinations(&self) -> Result<Vec<Destination>, NotificationError> {
        self.recipients.iter().map(|r| r.parse()).collect()
    }
}

/// Notification configuration parsed from the configuration object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Raw service definitions keyed by service name
    pub services: BTreeMap<String, String>,
    /// Raw trigger definitions keyed by trigger name
    pub triggers: BTreeMap<String, String>,
    /// Raw template definitions keyed by template name
    pub templates: BTreeMap<String, String>,
    /// Default subscriptions
    pub subscriptions: Vec<DefaultSubscription>,
}

impl Config {
    /// Parses the notification configuration out of a ConfigMap.
    ///
    /// Unknown keys are ignored. An empty or missing `data` section produces
    /// an empty configuration.
    pub fn parse(config_map: &ConfigMap) -> Result<Self, NotificationError> {
        let mut config = Self::default();
        let Some(data) = config_map.data.as_ref() else {
            return Ok(config);
        };

        for (key, value) in data {
            if let Some(name) = key.strip_prefix(SERVICE_PREFIX) {
                config.services.insert(name.to_string(), value.clone());
            } else if let Some(name) = key.strip_prefix(TRIGGER_PREFIX) {
                config.triggers.insert(name.to_string(), value.clone());
            } else if let Some(name) = key.strip_prefix(TEMPLATE_PREFIX) {
                config.templates.insert(name.to_string(), value.clone());
            } else if key == SUBSCRIPTIONS_KEY {
                config.subscriptions = serde_yaml::from_str::<Option<Vec<DefaultSubscription>>>(value)
                    .map_err(|source| NotificationError::Parse {
                        key: key.clone(),
                        source,
                    })?
                    .unwrap_or_default();
            }
        }

        for subscription in &config.subscriptions {
            subscription.destinations()?;
        }

        Ok(config)
    }

    /// Returns true if a service with this name is configured.
    #[must_use]
    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Returns true if a trigger with this name is configured.
    #[must_use]
    pub fn has_trigger(&self, name: &str) -> bool {
        self.triggers.contains_key(name)
    }
}
