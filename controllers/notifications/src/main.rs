//! Notifications Controller
//!
//! Watches one runtime-selected Kubernetes resource kind and delivers
//! notifications for objects subscribed through annotations:
//! - ConfigMap: services, triggers, templates and default subscriptions
//! - Secret: credentials referenced by the services
//! - Target kind: the objects notifications are evaluated for
//!
//! Reconciliation starts only after all three caches are warm.

mod client;
mod config;
mod controller;
mod error;
mod metrics;
mod queue;
mod reconciler;
mod server;
mod sync;
mod vars;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::client::{GenericClient, connect};
use crate::config::ControllerOptions;
use crate::controller::Handoff;
use crate::error::ControllerError;
use crate::reconciler::NotificationController;
use crate::server::ServerState;
use crate::vars::VariableBinding;
use crate::watcher::WatchSourceSet;
use clap::Parser;
use notifications_api::{Factory, LogNotifier, Notifier, Settings};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let opts = ControllerOptions::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Notifications Controller");

    let target_kind = opts.target_kind()?;
    info!("Configuration:");
    info!("  Target: {}", target_kind);
    info!("  ConfigMap: {}", opts.config_map);
    info!("  Secret: {}", opts.secret);
    info!("  Concurrency: {}", opts.concurrency);
    info!(
        "  Target namespace: {}",
        opts.target_namespace.as_deref().unwrap_or("all namespaces")
    );

    metrics::register_metrics()?;

    let cancel = CancellationToken::new();
    shutdown_on_signal(cancel.clone());

    let conn = connect(&opts).await?;
    let target = GenericClient::build(
        target_kind,
        conn.client.clone(),
        opts.target_namespace.as_deref(),
    )
    .await?;
    info!("Watching {} at {}", target.descriptor(), target.url_path());

    let (sources, drivers) = WatchSourceSet::for_cluster(&conn, &target);
    let settings = Settings::new(
        &opts.config_map,
        &opts.secret,
        VariableBinding::new(&opts.vars_key).into_initializer(),
    );
    let factory = Factory::new(
        settings,
        conn.namespace.clone(),
        sources.config_maps.store().clone(),
        sources.secrets.store().clone(),
    );

    let ready = Arc::new(AtomicBool::new(false));
    let server = tokio::spawn(server::start_server(
        opts.probe_addr,
        Arc::new(ServerState {
            is_ready: Arc::clone(&ready),
        }),
        cancel.clone(),
    ));

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let descriptor = target.descriptor().clone();
    let resync = opts.resync();

    let result = Handoff::new(opts.concurrency)
        .with_sync_timeout(opts.sync_timeout())
        .with_grace_period(opts.shutdown_grace_period)
        .with_readiness(ready)
        .run(
            sources,
            drivers,
            &factory,
            |targets, context| {
                NotificationController::new(descriptor, targets, context, notifier).with_resync(resync)
            },
            cancel.clone(),
        )
        .await;

    cancel.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("HTTP server error: {}", e),
        Err(e) => warn!("HTTP server task failed: {}", e),
    }

    result?;
    info!("Notifications Controller stopped");
    Ok(())
}

/// Cancels `cancel` on SIGTERM or Ctrl-C.
fn shutdown_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
            () = terminate => info!("Received SIGTERM, shutting down"),
        }
        cancel.cancel();
    });
}
