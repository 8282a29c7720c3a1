//! Cluster connection and the generic (schema-less) resource client.
//!
//! The target kind is only known at runtime as a group/version/resource
//! triple, so it is watched as `DynamicObject` through an `ApiResource`
//! resolved via API discovery.

use crate::config::ControllerOptions;
use crate::error::ControllerError;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{DynamicObject, GroupVersion, GroupVersionKind};
use kube::discovery::{self, ApiResource, Scope, verbs};
use kube::{Api, Client, Config, Resource};
use std::fmt;
use tracing::{debug, info};

/// Identifies a resource kind by group, version and plural resource name.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKindDescriptor {
    group: String,
    version: String,
    resource: String,
}

impl ResourceKindDescriptor {
    /// Creates a descriptor. `group` may be empty (core API group);
    /// `version` and `resource` may not.
    pub fn new(group: &str, version: &str, resource: &str) -> Result<Self, ControllerError> {
        if version.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "target version must not be empty".to_string(),
            ));
        }
        if resource.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "target resource must not be empty".to_string(),
            ));
        }
        Ok(Self {
            group: group.trim().to_string(),
            version: version.trim().to_string(),
            resource: resource.trim().to_string(),
        })
    }

    /// API group (empty for the core group)
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// API version
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Plural resource name
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// `apiVersion` string: `v1` for core, `group/version` otherwise
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Builds the `ApiResource` for this kind. `kind` is only descriptive;
    /// request paths depend on group, version and plural alone.
    #[must_use]
    pub fn api_resource(&self, kind: &str) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(&self.group, &self.version, kind),
            &self.resource,
        )
    }
}

impl fmt::Display for ResourceKindDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// A connected cluster client plus the operator namespace.
#[derive(Clone)]
pub struct ClusterConnection {
    /// Kubernetes client
    pub client: Client,
    /// Namespace of the active context (or the override)
    pub namespace: String,
}

impl fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Resolves cluster credentials and the operator namespace.
///
/// Without an explicit kubeconfig or context the standard inference is used
/// (in-cluster service account, then `KUBECONFIG`, then `~/.kube/config`).
pub async fn connect(opts: &ControllerOptions) -> Result<ClusterConnection, ControllerError> {
    let config = if opts.kubeconfig.is_none() && opts.context.is_none() {
        Config::infer()
            .await
            .map_err(|e| ControllerError::Credentials(e.to_string()))?
    } else {
        let kubeconfig = match &opts.kubeconfig {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        }
        .map_err(|e| ControllerError::Credentials(e.to_string()))?;
        let options = KubeConfigOptions {
            context: opts.context.clone(),
            ..Default::default()
        };
        Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| ControllerError::Credentials(e.to_string()))?
    };

    let namespace = opts
        .namespace
        .clone()
        .unwrap_or_else(|| config.default_namespace.clone());
    if namespace.is_empty() {
        return Err(ControllerError::Credentials(
            "failed to get namespace from Kubernetes config".to_string(),
        ));
    }

    info!("Connecting to {} (namespace {})", config.cluster_url, namespace);
    let client = Client::try_from(config)?;
    Ok(ClusterConnection { client, namespace })
}

/// Type-erased list/watch client for one runtime-selected resource kind.
#[derive(Clone)]
pub struct GenericClient {
    descriptor: ResourceKindDescriptor,
    resource: ApiResource,
    scope: Scope,
    namespace: Option<String>,
    api: Api<DynamicObject>,
}

impl GenericClient {
    /// Resolves the descriptor through API discovery and builds the client.
    ///
    /// Fails if the group/version is not served, if it does not serve the
    /// resource, or if the resource cannot be listed and watched.
    pub async fn build(
        descriptor: ResourceKindDescriptor,
        client: Client,
        target_namespace: Option<&str>,
    ) -> Result<Self, ControllerError> {
        let gv = GroupVersion::gv(descriptor.group(), descriptor.version());
        let group = discovery::pinned_group(&client, &gv).await?;

        let (resource, caps) = group
            .versioned_resources(descriptor.version())
            .into_iter()
            .find(|(ar, _)| ar.plural == descriptor.resource())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "{} does not serve resource '{}'",
                    descriptor.api_version(),
                    descriptor.resource()
                ))
            })?;

        if !caps.supports_operation(verbs::LIST) || !caps.supports_operation(verbs::WATCH) {
            return Err(ControllerError::InvalidConfig(format!(
                "resource {descriptor} does not support list and watch"
            )));
        }

        debug!("Discovered {} as kind {} ({:?})", descriptor, resource.kind, caps.scope);
        Ok(Self::from_parts(descriptor, client, resource, caps.scope, target_namespace))
    }

    /// Builds the client from an already resolved `ApiResource`.
    pub fn from_parts(
        descriptor: ResourceKindDescriptor,
        client: Client,
        resource: ApiResource,
        scope: Scope,
        target_namespace: Option<&str>,
    ) -> Self {
        let namespace = match scope {
            Scope::Namespaced => target_namespace.map(ToString::to_string),
            Scope::Cluster => None,
        };
        let api = match namespace.as_deref() {
            Some(ns) => Api::namespaced_with(client, ns, &resource),
            None => Api::all_with(client, &resource),
        };
        Self {
            descriptor,
            resource,
            scope,
            namespace,
            api,
        }
    }

    /// Descriptor this client was built from
    #[must_use]
    pub fn descriptor(&self) -> &ResourceKindDescriptor {
        &self.descriptor
    }

    /// Resolved API resource, used as the `DynamicObject` dynamic type
    #[must_use]
    pub fn api_resource(&self) -> &ApiResource {
        &self.resource
    }

    /// Scope of the target kind
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Underlying dynamic API
    #[must_use]
    pub fn api(&self) -> &Api<DynamicObject> {
        &self.api
    }

    /// Collection path every list and watch request is issued against
    #[must_use]
    pub fn url_path(&self) -> String {
        collection_path(&self.resource, self.namespace.as_deref())
    }
}

impl fmt::Debug for GenericClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericClient")
            .field("descriptor", &self.descriptor)
            .field("scope", &self.scope)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Collection path for a resource, optionally within one namespace.
#[must_use]
pub fn collection_path(resource: &ApiResource, namespace: Option<&str>) -> String {
    DynamicObject::url_path(resource, namespace)
}
