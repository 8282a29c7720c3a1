//! Notifications API
//!
//! The interface boundary of the notification engine used by the
//! notifications controller.
//!
//! The controller owns the watches and the startup barrier; this crate owns
//! everything the engine needs once the caches are warm:
//!
//! - **Settings**: names of the configuration and secret objects plus the
//!   variable initializer that builds the template context
//! - **Factory**: reads both objects out of their caches and produces a
//!   [`NotificationContext`]
//! - **Subscriptions**: annotation and default subscription parsing
//! - **Delivery**: the [`Notifier`] trait and a logging implementation
//!
//! # Example
//!
//! ```no_run
//! use k8s_openapi::api::core::v1::{ConfigMap, Secret};
//! use notifications_api::{
//!     BindingError, Config, Destination, GetVars, InitGetVars, NotificationError, Settings, Vars,
//! };
//! use std::sync::Arc;
//!
//! let get_vars: GetVars = Arc::new(
//!     |obj: &serde_json::Value, _dest: &Destination| -> Result<Vars, BindingError> {
//!         let mut vars = Vars::new();
//!         vars.insert("pod".to_string(), obj.clone());
//!         Ok(vars)
//!     },
//! );
//! let init: InitGetVars = Arc::new(
//!     move |_cfg: &Config, _cm: &ConfigMap, _secret: &Secret| -> Result<GetVars, NotificationError> {
//!         Ok(get_vars.clone())
//!     },
//! );
//! let settings = Settings::new(
//!     "kubernetes-notificator-cm",
//!     "kubernetes-notificator-secret",
//!     init,
//! );
//! # let _ = settings;
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod models;
pub mod notifier;
pub mod subscriptions;
#[cfg(feature = "test-util")]
pub mod mock;

pub use config::{Config, DefaultSubscription, GetVars, InitGetVars, Settings, Vars};
pub use error::{BindingError, NotificationError};
pub use factory::{Factory, NotificationContext};
pub use models::{Destination, Notification};
pub use notifier::{LogNotifier, Notifier};
pub use subscriptions::{SUBSCRIBE_ANNOTATION_PREFIX, Subscription, subscriptions_for};
#[cfg(feature = "test-util")]
pub use mock::RecordingNotifier;
