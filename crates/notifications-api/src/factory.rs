//! Notification factory.
//!
//! Builds the [`NotificationContext`] out of the cached configuration and
//! secret objects once the controller's caches are synchronized.

use crate::config::{Config, GetVars, Settings, Vars};
use crate::error::{BindingError, NotificationError};
use crate::models::Destination;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube_runtime::reflector::{ObjectRef, Store};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads notification configuration from the operator namespace caches.
#[derive(Clone)]
pub struct Factory {
    settings: Settings,
    namespace: String,
    config_maps: Store<ConfigMap>,
    secrets: Store<Secret>,
}

impl Factory {
    /// Creates a factory over the given caches.
    pub fn new(
        settings: Settings,
        namespace: impl Into<String>,
        config_maps: Store<ConfigMap>,
        secrets: Store<Secret>,
    ) -> Self {
        Self {
            settings,
            namespace: namespace.into(),
            config_maps,
            secrets,
        }
    }

    /// Operator namespace the objects are read from
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Builds a context from the current cache contents.
    ///
    /// A missing configuration object is an error. A missing secret is
    /// treated as empty, so services that need no credentials still work.
    pub fn context(&self) -> Result<NotificationContext, NotificationError> {
        let cm_ref = ObjectRef::<ConfigMap>::new(&self.settings.config_map_name).within(&self.namespace);
        let config_map = self.config_maps.get(&cm_ref).ok_or_else(|| {
            NotificationError::ConfigMapNotFound {
                namespace: self.namespace.clone(),
                name: self.settings.config_map_name.clone(),
            }
        })?;

        let secret_ref = ObjectRef::<Secret>::new(&self.settings.secret_name).within(&self.namespace);
        let secret = self.secrets.get(&secret_ref).unwrap_or_else(|| {
            warn!(
                "Secret {}/{} not found, continuing without credentials",
                self.namespace, self.settings.secret_name
            );
            Arc::new(Secret::default())
        });

        let config = Config::parse(&config_map)?;
        debug!(
            "Loaded notification config: {} services, {} triggers, {} default subscriptions",
            config.services.len(),
            config.triggers.len(),
            config.subscriptions.len()
        );

        let get_vars = (self.settings.init_get_vars)(&config, config_map.as_ref(), secret.as_ref())?;

        Ok(NotificationContext {
            config,
            config_map,
            secret,
            get_vars,
        })
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("settings", &self.settings)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Everything the reconciliation loop needs from the notification engine.
///
/// Built once after cache synchronization and kept for the process lifetime.
#[derive(Clone)]
pub struct NotificationContext {
    /// Parsed configuration
    pub config: Config,
    /// Configuration object the context was built from
    pub config_map: Arc<ConfigMap>,
    /// Secret the context was built from
    pub secret: Arc<Secret>,
    get_vars: GetVars,
}

impl NotificationContext {
    /// Creates a context directly, bypassing the caches.
    pub fn new(config: Config, config_map: ConfigMap, secret: Secret, get_vars: GetVars) -> Self {
        Self {
            config,
            config_map: Arc::new(config_map),
            secret: Arc::new(secret),
            get_vars,
        }
    }

    /// Builds template variables for an observed object and a destination.
    pub fn vars(
        &self,
        object: &serde_json::Value,
        destination: &Destination,
    ) -> Result<Vars, BindingError> {
        (self.get_vars)(object, destination)
    }
}

impl fmt::Debug for NotificationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_runtime::{reflector, watcher};
    use std::collections::BTreeMap;

    const NS: &str = "notifications";

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            ..Default::default()
        }
    }

    fn settings() -> Settings {
        Settings::new(
            "notifications-cm",
            "notifications-secret",
            Arc::new(|_cfg: &Config, _cm: &ConfigMap, _secret: &Secret| -> Result<GetVars, NotificationError> {
                let get_vars: GetVars = Arc::new(|obj: &serde_json::Value, _dest: &Destination| -> Result<Vars, BindingError> {
                    let mut vars = Vars::new();
                    vars.insert("obj".to_string(), obj.clone());
                    Ok(vars)
                });
                Ok(get_vars)
            }),
        )
    }

    fn stores(with_secret: bool) -> (Store<ConfigMap>, Store<Secret>) {
        let (cm_store, mut cm_writer) = reflector::store::<ConfigMap>();
        cm_writer.apply_watcher_event(&watcher::Event::Apply(ConfigMap {
            metadata: meta("notifications-cm"),
            data: Some(BTreeMap::from([(
                "service.slack".to_string(),
                "token: $token".to_string(),
            )])),
            ..Default::default()
        }));

        let (secret_store, mut secret_writer) = reflector::store::<Secret>();
        if with_secret {
            secret_writer.apply_watcher_event(&watcher::Event::Apply(Secret {
                metadata: meta("notifications-secret"),
                ..Default::default()
            }));
        }
        (cm_store, secret_store)
    }

    #[test]
    fn test_context_from_caches() {
        let (cms, secrets) = stores(true);
        let factory = Factory::new(settings(), NS, cms, secrets);

        let ctx = factory.context().unwrap();
        assert!(ctx.config.has_service("slack"));
        assert_eq!(
            ctx.secret.metadata.name.as_deref(),
            Some("notifications-secret")
        );

        let obj = serde_json::json!({"metadata": {"name": "p"}});
        let vars = ctx.vars(&obj, &Destination::new("slack", "alerts")).unwrap();
        assert_eq!(vars.get("obj"), Some(&obj));
    }

    #[test]
    fn test_missing_secret_is_empty() {
        let (cms, secrets) = stores(false);
        let factory = Factory::new(settings(), NS, cms, secrets);

        let ctx = factory.context().unwrap();
        assert!(ctx.secret.metadata.name.is_none());
    }

    #[test]
    fn test_missing_config_map_is_error() {
        let (_, secrets) = stores(true);
        let (empty_cms, _writer) = reflector::store::<ConfigMap>();
        let factory = Factory::new(settings(), NS, empty_cms, secrets);

        let err = factory.context().unwrap_err();
        assert!(matches!(err, NotificationError::ConfigMapNotFound { .. }));
    }

    #[test]
    fn test_wrong_namespace_is_not_found() {
        let (cms, secrets) = stores(true);
        let factory = Factory::new(settings(), "other", cms, secrets);
        assert!(factory.context().is_err());
    }
}
