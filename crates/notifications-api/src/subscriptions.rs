//! Subscription resolution.
//!
//! An observed object subscribes to notifications through annotations of the
//! form
//!
//! ```text
//! notifications.argoproj.io/subscribe.<trigger>.<service>: "<recipient>;<recipient>"
//! ```
//!
//! Default subscriptions from the configuration object apply to every object.

use crate::config::Config;
use crate::models::Destination;
use std::collections::{BTreeMap, BTreeSet};

/// Annotation prefix for per-object subscriptions
pub const SUBSCRIBE_ANNOTATION_PREFIX: &str = "notifications.argoproj.io/subscribe.";

/// A single trigger/destination pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription {
    /// Trigger name
    pub trigger: String,
    /// Delivery destination
    pub destination: Destination,
}

/// Resolves the subscriptions of one object: annotation subscriptions plus
/// the configured defaults, deduplicated and sorted.
#[must_use]
pub fn subscriptions_for(
    annotations: Option<&BTreeMap<String, String>>,
    config: &Config,
) -> Vec<Subscription> {
    let mut out = BTreeSet::new();

    for (key, value) in annotations.into_iter().flatten() {
        let Some(rest) = key.strip_prefix(SUBSCRIBE_ANNOTATION_PREFIX) else {
            continue;
        };
        let Some((trigger, service)) = rest.rsplit_once('.') else {
            continue;
        };
        if trigger.is_empty() || service.is_empty() {
            continue;
        }
        for recipient in value.split(';').map(str::trim).filter(|r| !r.is_empty()) {
            out.insert(Subscription {
                trigger: trigger.to_string(),
                destination: Destination::new(service, recipient),
            });
        }
    }

    for default in &config.subscriptions {
        let destinations = default.destinations().unwrap_or_default();
        for trigger in &default.triggers {
            for destination in &destinations {
                out.insert(Subscription {
                    trigger: trigger.clone(),
                    destination: destination.clone(),
                });
            }
        }
    }

    out.into_iter().collect()
}
