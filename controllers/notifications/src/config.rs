//! Controller configuration.
//!
//! All options are parsed once at startup from flags or environment
//! variables and passed by reference into each component.

use crate::client::ResourceKindDescriptor;
use crate::error::ControllerError;
use clap::Parser;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Notifications controller options
#[derive(Debug, Clone, Parser)]
#[command(
    name = "notifications-controller",
    about = "Watches a Kubernetes resource kind and sends notifications for it"
)]
pub struct ControllerOptions {
    /// Path to a kube config. Only required if out-of-cluster
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long, env = "KUBE_CONTEXT")]
    pub context: Option<String>,

    /// Operator namespace holding the ConfigMap and Secret (defaults to the
    /// namespace of the active context)
    #[arg(long, env = "POD_NAMESPACE")]
    pub namespace: Option<String>,

    /// ConfigMap name for controller
    #[arg(short = 'c', long = "configmap", env = "NOTIFICATIONS_CONFIGMAP", default_value = "kubernetes-notificator-cm")]
    pub config_map: String,

    /// Secret name for controller
    #[arg(short = 's', long, env = "NOTIFICATIONS_SECRET", default_value = "kubernetes-notificator-secret")]
    pub secret: String,

    /// apiGroup monitored by controller
    #[arg(short = 'g', long, env = "TARGET_GROUP", default_value = "")]
    pub group: String,

    /// apiVersion monitored by controller
    #[arg(short = 'v', long, env = "TARGET_VERSION", default_value = "v1")]
    pub version: String,

    /// apiResource monitored by controller
    #[arg(short = 'r', long, env = "TARGET_RESOURCE", default_value = "pods")]
    pub resource: String,

    /// Restrict the target watch to one namespace (namespaced kinds only)
    #[arg(long, env = "TARGET_NAMESPACE")]
    pub target_namespace: Option<String>,

    /// Number of concurrent reconciliation workers
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value = "10")]
    pub concurrency: NonZeroUsize,

    /// Template variable name the observed object is exposed under
    #[arg(long, env = "NOTIFICATIONS_VARS_KEY", default_value = "pod")]
    pub vars_key: String,

    /// Allotted wait for the initial cache sync (0 waits until cancelled)
    #[arg(long, env = "CACHE_SYNC_TIMEOUT", default_value = "300s", value_parser = parse_duration)]
    pub cache_sync_timeout: Duration,

    /// Periodic re-evaluation of every cached object (0 disables)
    #[arg(long, env = "RESYNC_PERIOD", default_value = "60s", value_parser = parse_duration)]
    pub resync_period: Duration,

    /// Grace period for watches to stop after cancellation
    #[arg(long, env = "SHUTDOWN_GRACE_PERIOD", default_value = "10s", value_parser = parse_duration)]
    pub shutdown_grace_period: Duration,

    /// Listen address for /healthz, /readyz and /metrics
    #[arg(long, env = "PROBE_ADDR", default_value = "0.0.0.0:8080")]
    pub probe_addr: SocketAddr,
}

impl ControllerOptions {
    /// The target resource kind selected by `--group/--version/--resource`.
    pub fn target_kind(&self) -> Result<ResourceKindDescriptor, ControllerError> {
        ResourceKindDescriptor::new(&self.group, &self.version, &self.resource)
    }

    /// Cache sync timeout, `None` when waiting until cancelled
    #[must_use]
    pub fn sync_timeout(&self) -> Option<Duration> {
        non_zero(self.cache_sync_timeout)
    }

    /// Resync period, `None` when disabled
    #[must_use]
    pub fn resync(&self) -> Option<Duration> {
        non_zero(self.resync_period)
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

/// Parses `90`, `90s`, `5m` or `1h`.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((idx, 's')) => (&s[..idx], 1),
        Some((idx, 'm')) => (&s[..idx], 60),
        Some((idx, 'h')) => (&s[..idx], 3600),
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration '{s}': {e}"))?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
