//! Notification reconciliation loop.
//!
//! Every target object in the cache is reconciled once after startup, again
//! whenever its watch reports a change, and periodically when a resync
//! period is configured. Reconciling an object resolves its subscriptions,
//! binds template variables per destination and hands one notification per
//! subscription to the [`Notifier`].

use crate::client::ResourceKindDescriptor;
use crate::error::ControllerError;
use crate::metrics;
use crate::queue::{WorkQueue, work_queue};
use crate::vars::to_field_bag;
use crate::watcher::WatchSource;
use async_trait::async_trait;
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use kube::ResourceExt;
use kube::core::DynamicObject;
use kube_runtime::reflector::ObjectRef;
use notifications_api::{Notification, NotificationContext, Notifier, Subscription, subscriptions_for};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type TargetRef = ObjectRef<DynamicObject>;

/// A reconciliation loop started by the handoff once caches are synced.
#[async_trait]
pub trait Reconciliation: Send {
    /// Processes work with at most `concurrency` items in flight until
    /// `cancel` fires.
    async fn run(self, concurrency: NonZeroUsize, cancel: CancellationToken) -> Result<(), ControllerError>;
}

/// Default reconciliation loop: delivers subscribed notifications for the
/// target kind.
pub struct NotificationController {
    descriptor: ResourceKindDescriptor,
    targets: WatchSource<DynamicObject>,
    context: NotificationContext,
    notifier: Arc<dyn Notifier>,
    resync: Option<Duration>,
    /// Last resource version delivered per object and subscription
    delivered: Mutex<HashMap<(TargetRef, Subscription), Option<String>>>,
}

impl NotificationController {
    pub fn new(
        descriptor: ResourceKindDescriptor,
        targets: WatchSource<DynamicObject>,
        context: NotificationContext,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            descriptor,
            targets,
            context,
            notifier,
            resync: None,
            delivered: Mutex::new(HashMap::new()),
        }
    }

    /// Requeues every cached object each `period`. `None` disables resync.
    #[must_use]
    pub fn with_resync(mut self, period: Option<Duration>) -> Self {
        self.resync = period;
        self
    }

    fn enqueue_all(&self, queue: &WorkQueue<TargetRef>) -> usize {
        self.targets
            .store()
            .state()
            .iter()
            .filter(|obj| queue.add(self.targets.object_ref(obj)))
            .count()
    }

    /// Feeds the queue from the change stream and the resync timer.
    async fn feed(
        &self,
        queue: WorkQueue<TargetRef>,
        mut changes: broadcast::Receiver<TargetRef>,
        cancel: &CancellationToken,
    ) {
        let period = self.resync.unwrap_or(Duration::from_secs(3600));
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(obj_ref) => {
                        queue.add(obj_ref);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("{} change stream lagged by {} events, requeueing all", self.descriptor, missed);
                        self.enqueue_all(&queue);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick(), if self.resync.is_some() => {
                    let queued = self.enqueue_all(&queue);
                    debug!("Resync queued {} {} objects", queued, self.descriptor);
                }
            }
        }
    }

    /// Reconciles one object. Failures are logged and counted per item.
    async fn reconcile(&self, obj_ref: &TargetRef) {
        let Some(obj) = self.targets.store().get(obj_ref) else {
            debug!("{} {} no longer cached, forgetting deliveries", self.descriptor, obj_ref);
            self.forget(obj_ref);
            return;
        };
        metrics::increment_reconciliations();

        let config = &self.context.config;
        let subscriptions: Vec<Subscription> = subscriptions_for(obj.metadata.annotations.as_ref(), config)
            .into_iter()
            .filter(|subscription| {
                let configured = config.has_trigger(&subscription.trigger)
                    && config.has_service(&subscription.destination.service);
                if !configured {
                    warn!(
                        "Skipping {} {}: trigger '{}' or service '{}' is not configured",
                        self.descriptor, obj_ref, subscription.trigger, subscription.destination.service
                    );
                    metrics::increment_reconcile_errors();
                }
                configured
            })
            .collect();
        if subscriptions.is_empty() {
            return;
        }

        let field_bag = match to_field_bag(&obj) {
            Ok(bag) => bag,
            Err(e) => {
                warn!("Failed to convert {} {}: {}", self.descriptor, obj_ref, e);
                metrics::increment_reconcile_errors();
                return;
            }
        };

        let resource_version = obj.resource_version();
        let object = match obj.namespace() {
            Some(ns) => format!("{}/{}", ns, obj.name_any()),
            None => obj.name_any(),
        };

        for subscription in subscriptions {
            let key = (obj_ref.clone(), subscription);
            if self.already_delivered(&key, resource_version.as_ref()) {
                continue;
            }
            let (_, subscription) = &key;

            let vars = match self.context.vars(&field_bag, &subscription.destination) {
                Ok(vars) => vars,
                Err(e) => {
                    warn!(
                        "Failed to bind variables for {} {} ({}): {}",
                        self.descriptor, object, subscription.destination, e
                    );
                    metrics::increment_reconcile_errors();
                    continue;
                }
            };

            let notification = Notification {
                trigger: subscription.trigger.clone(),
                destination: subscription.destination.clone(),
                object: object.clone(),
                resource_version: resource_version.clone(),
                vars,
                created_at: Utc::now(),
            };

            match self.notifier.send(&notification).await {
                Ok(()) => {
                    metrics::increment_notifications_sent();
                    self.delivered
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key, resource_version.clone());
                }
                Err(e) => {
                    warn!(
                        "Failed to deliver {} for {} {}: {}",
                        notification.trigger, self.descriptor, object, e
                    );
                    metrics::increment_reconcile_errors();
                }
            }
        }
    }

    fn already_delivered(&self, key: &(TargetRef, Subscription), resource_version: Option<&String>) -> bool {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|delivered| delivered.as_ref() == resource_version)
    }

    fn forget(&self, obj_ref: &TargetRef) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(delivered_ref, _), _| delivered_ref != obj_ref);
    }
}

#[async_trait]
impl Reconciliation for NotificationController {
    async fn run(self, concurrency: NonZeroUsize, cancel: CancellationToken) -> Result<(), ControllerError> {
        let this = Arc::new(self);
        let (queue, receiver) = work_queue();
        // Subscribe before the snapshot so no change falls in between
        let changes = this.targets.subscribe();
        let initial = this.enqueue_all(&queue);
        info!(
            "Reconciling {} with {} workers, {} objects in initial pass",
            this.descriptor, concurrency, initial
        );

        let worker = Arc::clone(&this);
        let workers = receiver
            .into_stream()
            .take_until(cancel.cancelled())
            .for_each_concurrent(concurrency.get(), move |obj_ref| {
                let worker = Arc::clone(&worker);
                async move { worker.reconcile(&obj_ref).await }
            })
            .boxed();

        tokio::join!(this.feed(queue, changes, &cancel), workers);
        info!("{} reconciliation stopped", this.descriptor);
        Ok(())
    }
}
