//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `notifications_watch_events_total{source}` - Watch events received per source
//! - `notifications_sources_synced` - Number of watch sources whose initial list completed
//! - `notifications_reconciliations_total` - Total number of reconciliations
//! - `notifications_reconcile_errors_total` - Total number of per-item reconcile errors
//! - `notifications_sent_total` - Total number of notifications delivered

use crate::watcher::SourceKind;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "notifications_watch_events_total",
            "Total number of watch events received by source",
        ),
        &["source"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

static SOURCES_SYNCED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "notifications_sources_synced",
        "Number of watch sources whose initial list has completed",
    )
    .expect("Failed to create SOURCES_SYNCED metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "notifications_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "notifications_reconcile_errors_total",
        "Total number of per-item reconcile errors",
    )
    .expect("Failed to create RECONCILE_ERRORS_TOTAL metric - this should never happen")
});

static NOTIFICATIONS_SENT_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "notifications_sent_total",
        "Total number of notifications delivered",
    )
    .expect("Failed to create NOTIFICATIONS_SENT_TOTAL metric - this should never happen")
});

/// Registers all metrics with [`REGISTRY`]. Call once at startup.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(WATCH_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOURCES_SYNCED.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFICATIONS_SENT_TOTAL.clone()))?;
    Ok(())
}

pub fn record_watch_event(source: SourceKind) {
    WATCH_EVENTS_TOTAL
        .with_label_values(&[source.as_str()])
        .inc();
}

pub fn record_source_synced() {
    SOURCES_SYNCED.inc();
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconcile_errors() {
    RECONCILE_ERRORS_TOTAL.inc();
}

pub fn increment_notifications_sent() {
    NOTIFICATIONS_SENT_TOTAL.inc();
}
