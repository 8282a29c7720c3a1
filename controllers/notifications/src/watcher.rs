//! Kubernetes resource watchers.
//!
//! Each watch source keeps an in-memory cache of one resource collection,
//! populated by an initial list and kept current by a long-lived watch.
//! Three sources exist: the configuration ConfigMaps and Secrets of the
//! operator namespace, and the runtime-selected target kind.
//!
//! A source is split in two halves:
//! - [`WatchSource`] is the read side: cache, sync state and change stream
//! - [`SourceDriver`] is the single writer that consumes list/watch events
//!
//! Reconnect-and-relist is handled by `kube_runtime::watcher` with the
//! default backoff; drivers only log transient errors.

use crate::client::{ClusterConnection, GenericClient};
use crate::error::ControllerError;
use crate::metrics;
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::{Api, Resource};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::fmt;
use std::hash::Hash;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of each source's change stream before slow subscribers lag
const CHANGE_BUFFER: usize = 1024;

/// Which of the three watched collections a source covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Notification ConfigMaps in the operator namespace
    Configuration,
    /// Notification Secrets in the operator namespace
    Secret,
    /// The runtime-selected target resource kind
    Target,
}

impl SourceKind {
    /// Stable lowercase name, used as a metrics label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Secret => "secret",
            Self::Target => "target",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => f.write_str("ConfigMap"),
            Self::Secret => f.write_str("Secret"),
            Self::Target => f.write_str("Target"),
        }
    }
}

/// Startup state of a watch source.
///
/// `Synced` is terminal: relists after a reconnect never move a source back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Constructed, driver not running yet
    Starting,
    /// Initial list in progress
    Listing,
    /// Initial list partially applied
    Syncing,
    /// Initial list fully reflected in the cache
    Synced,
}

impl SourceState {
    /// True once the initial list is reflected in the cache
    #[must_use]
    pub fn is_synced(self) -> bool {
        self == Self::Synced
    }

    /// Next state after observing `event`.
    #[must_use]
    pub fn advance<K>(self, event: &watcher::Event<K>) -> Self {
        if self.is_synced() {
            return self;
        }
        match event {
            watcher::Event::Init => Self::Listing,
            watcher::Event::InitApply(_) => Self::Syncing,
            watcher::Event::InitDone => Self::Synced,
            watcher::Event::Apply(_) | watcher::Event::Delete(_) => self,
        }
    }
}

/// Source of list-then-watch events for one resource kind.
///
/// The stream starts with an initial list (`Init`, `InitApply`..., `InitDone`)
/// and continues with `Apply`/`Delete` events. Implementations recover from
/// connection loss by relisting.
pub trait ListWatch<K>: Send + Sync + 'static {
    /// Starts listing and watching.
    fn list_watch(&self) -> BoxStream<'static, watcher::Result<watcher::Event<K>>>;
}

impl<K> ListWatch<K> for Api<K>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    fn list_watch(&self) -> BoxStream<'static, watcher::Result<watcher::Event<K>>> {
        watcher(self.clone(), watcher::Config::default()).boxed()
    }
}

impl ListWatch<DynamicObject> for GenericClient {
    fn list_watch(&self) -> BoxStream<'static, watcher::Result<watcher::Event<DynamicObject>>> {
        self.api().list_watch()
    }
}

/// Read side of a watch source.
#[derive(Clone)]
pub struct WatchSource<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    kind: SourceKind,
    store: Store<K>,
    dyntype: K::DynamicType,
    state: watch::Receiver<SourceState>,
    changes: broadcast::Sender<ObjectRef<K>>,
}

impl<K> WatchSource<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    /// Which collection this source covers
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Cache of the latest observed object per identity
    #[must_use]
    pub fn store(&self) -> &Store<K> {
        &self.store
    }

    /// Cache key of `obj`
    #[must_use]
    pub fn object_ref(&self, obj: &K) -> ObjectRef<K> {
        ObjectRef::from_obj_with(obj, self.dyntype.clone())
    }

    /// Current startup state
    #[must_use]
    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    /// True once the initial list is reflected in the cache
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.state().is_synced()
    }

    /// Subscribes to references of objects applied or deleted from now on.
    ///
    /// A subscriber that falls behind receives `RecvError::Lagged` and must
    /// resync from the cache.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectRef<K>> {
        self.changes.subscribe()
    }
}

impl<K> fmt::Debug for WatchSource<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSource")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a source's sync state, used by the startup barrier.
pub trait SyncStatus: Send + Sync {
    /// Which collection this source covers
    fn source_kind(&self) -> SourceKind;

    /// A receiver for the source's state
    fn state_receiver(&self) -> watch::Receiver<SourceState>;
}

impl<K> SyncStatus for WatchSource<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    fn source_kind(&self) -> SourceKind {
        self.kind
    }

    fn state_receiver(&self) -> watch::Receiver<SourceState> {
        self.state.clone()
    }
}

/// Write side of a watch source. Owns the cache writer exclusively.
pub struct SourceDriver<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    kind: SourceKind,
    lister: Box<dyn ListWatch<K>>,
    writer: Writer<K>,
    dyntype: K::DynamicType,
    state: watch::Sender<SourceState>,
    changes: broadcast::Sender<ObjectRef<K>>,
}

impl<K> fmt::Debug for SourceDriver<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDriver")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Creates a watch source over `lister`, returning its read and write halves.
pub fn watch_source<K, L>(
    kind: SourceKind,
    lister: L,
    dyntype: K::DynamicType,
) -> (WatchSource<K>, SourceDriver<K>)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
    L: ListWatch<K>,
{
    let writer = Writer::new(dyntype.clone());
    let store = writer.as_reader();
    let (state_tx, state_rx) = watch::channel(SourceState::Starting);
    let (changes, _) = broadcast::channel(CHANGE_BUFFER);

    let source = WatchSource {
        kind,
        store,
        dyntype: dyntype.clone(),
        state: state_rx,
        changes: changes.clone(),
    };
    let driver = SourceDriver {
        kind,
        lister: Box::new(lister),
        writer,
        dyntype,
        state: state_tx,
        changes,
    };
    (source, driver)
}

impl<K> SourceDriver<K>
where
    K: Resource + Clone + fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    /// Which collection this driver writes
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Lists, then watches until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation. Transient watch errors are logged and
    /// retried with backoff; only an unexpected end of the event stream is an
    /// error.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let Self {
            kind,
            lister,
            writer,
            dyntype,
            state,
            changes,
        } = self;

        info!("Starting {} watcher", kind);
        state.send_replace(SourceState::Listing);

        let mut stream = Box::pin(lister.list_watch().default_backoff().reflect(writer));
        let mut relisted: Vec<ObjectRef<K>> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("{} watcher stopped", kind);
                    return Ok(());
                }
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!("{} watcher stream error (will retry): {}", kind, e);
                    continue;
                }
                None => {
                    error!("{} watcher stream ended unexpectedly", kind);
                    return Err(ControllerError::Watch(format!("{kind} watch stream ended")));
                }
            };

            metrics::record_watch_event(kind);

            state.send_if_modified(|current| {
                let next = current.advance(&event);
                if next == *current {
                    return false;
                }
                debug!("{} watcher: {:?} -> {:?}", kind, current, next);
                if next.is_synced() {
                    info!("{} watcher initialization complete", kind);
                    metrics::record_source_synced();
                }
                *current = next;
                true
            });

            match &event {
                watcher::Event::Apply(obj) | watcher::Event::Delete(obj) => {
                    // No receivers simply means nobody is reconciling yet
                    let _ = changes.send(ObjectRef::from_obj_with(obj, dyntype.clone()));
                }
                watcher::Event::Init => relisted.clear(),
                watcher::Event::InitApply(obj) => {
                    relisted.push(ObjectRef::from_obj_with(obj, dyntype.clone()));
                }
                watcher::Event::InitDone => {
                    debug!("{} watcher relisted {} objects", kind, relisted.len());
                    for obj_ref in relisted.drain(..) {
                        let _ = changes.send(obj_ref);
                    }
                }
            }
        }
    }
}

/// Task result of a driver: which source it was and how it ended
pub type DriverOutcome = (SourceKind, Result<(), ControllerError>);

/// The three watch sources.
#[derive(Debug, Clone)]
pub struct WatchSourceSet {
    /// Notification ConfigMaps
    pub config_maps: WatchSource<ConfigMap>,
    /// Notification Secrets
    pub secrets: WatchSource<Secret>,
    /// Target resource kind
    pub targets: WatchSource<DynamicObject>,
}

/// Drivers of a [`WatchSourceSet`], started by the handoff.
#[derive(Debug)]
pub struct SourceDrivers {
    config_maps: SourceDriver<ConfigMap>,
    secrets: SourceDriver<Secret>,
    targets: SourceDriver<DynamicObject>,
}

impl WatchSourceSet {
    /// Creates the three sources from explicit list/watch implementations.
    pub fn new(
        config_maps: impl ListWatch<ConfigMap>,
        secrets: impl ListWatch<Secret>,
        targets: impl ListWatch<DynamicObject>,
        target_resource: ApiResource,
    ) -> (Self, SourceDrivers) {
        let (cm_source, cm_driver) = watch_source(SourceKind::Configuration, config_maps, ());
        let (secret_source, secret_driver) = watch_source(SourceKind::Secret, secrets, ());
        let (target_source, target_driver) =
            watch_source(SourceKind::Target, targets, target_resource);

        (
            Self {
                config_maps: cm_source,
                secrets: secret_source,
                targets: target_source,
            },
            SourceDrivers {
                config_maps: cm_driver,
                secrets: secret_driver,
                targets: target_driver,
            },
        )
    }

    /// Creates the sources against a live cluster: ConfigMaps and Secrets
    /// scoped to the operator namespace, the target through `target`.
    #[must_use]
    pub fn for_cluster(conn: &ClusterConnection, target: &GenericClient) -> (Self, SourceDrivers) {
        let config_maps: Api<ConfigMap> = Api::namespaced(conn.client.clone(), &conn.namespace);
        let secrets: Api<Secret> = Api::namespaced(conn.client.clone(), &conn.namespace);
        Self::new(config_maps, secrets, target.clone(), target.api_resource().clone())
    }

    /// All sources, for the startup barrier
    #[must_use]
    pub fn all(&self) -> [&dyn SyncStatus; 3] {
        [&self.config_maps, &self.secrets, &self.targets]
    }
}

impl SourceDrivers {
    /// Starts every driver as an independent task on `tasks`.
    pub fn spawn(self, tasks: &mut JoinSet<DriverOutcome>, cancel: &CancellationToken) {
        let Self {
            config_maps,
            secrets,
            targets,
        } = self;
        spawn_driver(tasks, config_maps, cancel.clone());
        spawn_driver(tasks, secrets, cancel.clone());
        spawn_driver(tasks, targets, cancel.clone());
    }
}

fn spawn_driver<K>(
    tasks: &mut JoinSet<DriverOutcome>,
    driver: SourceDriver<K>,
    cancel: CancellationToken,
) where
    K: Resource + Clone + fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    let kind = driver.kind();
    tasks.spawn(async move { (kind, driver.run(cancel).await) });
}
