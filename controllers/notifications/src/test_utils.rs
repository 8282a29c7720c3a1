//! Test utilities for unit testing watch sources and the handoff
//!
//! This module provides fake list/watch sources and helpers for creating
//! test objects.

use crate::watcher::{ListWatch, SourceState, SyncStatus};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube_runtime::watcher;
use notifications_api::{RecordingNotifier, SUBSCRIBE_ANNOTATION_PREFIX};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Fake list/watch source replaying a fixed event script
pub struct ScriptedListWatch<K> {
    events: Vec<watcher::Event<K>>,
    ends: bool,
    calls: Arc<AtomicUsize>,
}

impl<K> ScriptedListWatch<K> {
    /// Replays `events`, then stays open like an idle watch
    pub fn new(events: Vec<watcher::Event<K>>) -> Self {
        Self {
            events,
            ends: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replays `events`, then ends the stream
    pub fn finite(events: Vec<watcher::Event<K>>) -> Self {
        Self {
            ends: true,
            ..Self::new(events)
        }
    }

    /// Initial list of `objects`, then an idle watch
    pub fn listed(objects: Vec<K>) -> Self {
        let mut events = vec![watcher::Event::Init];
        events.extend(objects.into_iter().map(watcher::Event::InitApply));
        events.push(watcher::Event::InitDone);
        Self::new(events)
    }

    /// Starts listing but never completes the initial list
    pub fn never_synced() -> Self {
        Self::new(vec![watcher::Event::Init])
    }

    /// Counter of `list_watch` calls
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl<K> ListWatch<K> for ScriptedListWatch<K>
where
    K: Clone + Send + Sync + 'static,
{
    fn list_watch(&self) -> BoxStream<'static, watcher::Result<watcher::Event<K>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let events = stream::iter(
            self.events
                .clone()
                .into_iter()
                .map(Ok::<_, watcher::Error>),
        );
        if self.ends {
            events.boxed()
        } else {
            events.chain(stream::pending()).boxed()
        }
    }
}

/// Fake list/watch source fed by the test through a channel
pub struct ChannelListWatch<K> {
    rx: Mutex<Option<mpsc::UnboundedReceiver<watcher::Event<K>>>>,
}

/// Creates a channel-fed source and the sender driving it
pub fn channel_list_watch<K>() -> (mpsc::UnboundedSender<watcher::Event<K>>, ChannelListWatch<K>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        tx,
        ChannelListWatch {
            rx: Mutex::new(Some(rx)),
        },
    )
}

impl<K> ListWatch<K> for ChannelListWatch<K>
where
    K: Send + 'static,
{
    fn list_watch(&self) -> BoxStream<'static, watcher::Result<watcher::Event<K>>> {
        match self.rx.lock().unwrap().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                let event = rx.recv().await?;
                Some((Ok::<_, watcher::Error>(event), rx))
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}

/// Discovery information for core/v1 pods
pub fn pod_resource() -> ApiResource {
    ApiResource::erase::<Pod>(&())
}

/// Helper to create a Pod as a generic object
pub fn pod(namespace: &str, name: &str, resource_version: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &pod_resource())
        .within(namespace)
        .data(json!({
            "spec": {"containers": [{"name": "app", "image": "nginx:1.27"}]},
            "status": {"phase": "Running"}
        }));
    obj.metadata.resource_version = Some(resource_version.to_string());
    obj
}

/// Helper to create a Pod subscribed to `trigger` on `service`
pub fn subscribed_pod(
    namespace: &str,
    name: &str,
    resource_version: &str,
    trigger: &str,
    service: &str,
    recipients: &str,
) -> DynamicObject {
    let mut obj = pod(namespace, name, resource_version);
    obj.metadata.annotations = Some(BTreeMap::from([(
        format!("{SUBSCRIBE_ANNOTATION_PREFIX}{trigger}.{service}"),
        recipients.to_string(),
    )]));
    obj
}

/// Helper to create the notification ConfigMap
pub fn notifications_config_map(namespace: &str, name: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (
                "service.slack".to_string(),
                "token: $slack-token".to_string(),
            ),
            (
                "service.email".to_string(),
                "host: smtp.example.com".to_string(),
            ),
            (
                "trigger.on-running".to_string(),
                "- when: pod.status.phase == 'Running'\n  send: [pod-running]".to_string(),
            ),
            (
                "template.pod-running".to_string(),
                "message: Pod {{.pod.metadata.name}} is running".to_string(),
            ),
        ])),
        ..Default::default()
    }
}

/// Helper to create the notification Secret
pub fn notifications_secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            "slack-token".to_string(),
            "xoxb-test".to_string(),
        )])),
        ..Default::default()
    }
}

/// Waits up to five seconds for `source` to report synced
pub async fn wait_synced(source: &dyn SyncStatus) {
    let mut state = source.state_receiver();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == SourceState::Synced))
        .await
        .expect("source did not sync in time")
        .expect("source driver stopped");
}

/// Waits up to five seconds for `notifier` to have recorded `count` notifications
pub async fn wait_for_sent(notifier: &RecordingNotifier, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while notifier.sent().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("notifications were not delivered in time");
}
