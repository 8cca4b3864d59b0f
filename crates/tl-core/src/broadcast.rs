use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tl_types::{NewMessageNotification, Result};
use tracing::{debug, warn};
use uuid::Uuid;

/// Event name carried on the transport.
pub const NEW_MESSAGE_EVENT: &str = "new_message";

pub type Listener = Arc<dyn Fn(&NewMessageNotification) + Send + Sync>;

/// Callback a transport invokes with `(event, payload)` for its topic.
pub type TransportSink = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Open topic subscription on a transport.
pub trait TransportSubscription: Send {
    fn close(self: Box<Self>);
}

/// Topic-based publish/subscribe backend behind the hub.
#[async_trait]
pub trait Transport: Send + Sync {
    fn subscribe(&self, topic: &str, sink: TransportSink) -> Result<Box<dyn TransportSubscription>>;

    async fn publish(&self, topic: &str, event: &str, payload: &Value) -> Result<()>;
}

type TopicMap = HashMap<String, HashMap<u64, TransportSink>>;

/// In-process transport.
#[derive(Default)]
pub struct LocalTransport {
    topics: Arc<Mutex<TopicMap>>,
    next_id: AtomicU64,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open topic subscriptions across all topics.
    pub fn open_subscriptions(&self) -> usize {
        lock(&self.topics).values().map(HashMap::len).sum()
    }
}

struct LocalSubscription {
    topics: Weak<Mutex<TopicMap>>,
    topic: String,
    id: u64,
}

impl TransportSubscription for LocalSubscription {
    fn close(self: Box<Self>) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let mut topics = lock(&topics);
        if let Some(sinks) = topics.get_mut(&self.topic) {
            sinks.remove(&self.id);
            if sinks.is_empty() {
                topics.remove(&self.topic);
            }
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn subscribe(&self, topic: &str, sink: TransportSink) -> Result<Box<dyn TransportSubscription>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.topics)
            .entry(topic.to_string())
            .or_default()
            .insert(id, sink);
        Ok(Box::new(LocalSubscription {
            topics: Arc::downgrade(&self.topics),
            topic: topic.to_string(),
            id,
        }))
    }

    async fn publish(&self, topic: &str, event: &str, payload: &Value) -> Result<()> {
        let sinks: Vec<TransportSink> = lock(&self.topics)
            .get(topic)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        for sink in sinks {
            sink(event, payload);
        }
        Ok(())
    }
}

struct GroupChannel {
    listeners: HashMap<Uuid, Listener>,
    subscription: Option<Box<dyn TransportSubscription>>,
}

struct HubInner {
    transport: Arc<dyn Transport>,
    groups: Mutex<HashMap<String, GroupChannel>>,
}

impl HubInner {
    fn dispatch(&self, group_id: &str, notification: &NewMessageNotification) {
        let listeners: Vec<Listener> = lock(&self.groups)
            .get(group_id)
            .map(|g| g.listeners.values().cloned().collect())
            .unwrap_or_default();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
                warn!(group = %group_id, "Listener panicked while handling notification");
            }
        }
    }

    fn remove(&self, group_id: &str, id: Uuid) {
        let closed = {
            let mut groups = lock(&self.groups);
            let Some(group) = groups.get_mut(group_id) else {
                return;
            };
            group.listeners.remove(&id);
            if group.listeners.is_empty() {
                groups.remove(group_id).and_then(|g| g.subscription)
            } else {
                None
            }
        };

        if let Some(subscription) = closed {
            subscription.close();
            debug!(group = %group_id, "Closed group transport subscription");
        }
    }
}

/// Registry of group listeners. Holds one transport subscription per group
/// while it has listeners. Delivery is at most once with no replay.
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                transport,
                groups: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register `listener` for `group_id`.
    ///
    /// The listener stays registered until the returned handle is dropped
    /// or [`Subscription::unsubscribe`] is called.
    pub fn subscribe(&self, group_id: &str, listener: Listener) -> Result<Subscription> {
        let id = Uuid::new_v4();
        let mut groups = lock(&self.inner.groups);

        if !groups.contains_key(group_id) {
            let weak = Arc::downgrade(&self.inner);
            let topic = group_id.to_string();
            let sink: TransportSink = Arc::new(move |event: &str, payload: &Value| {
                if event != NEW_MESSAGE_EVENT {
                    return;
                }
                let Some(hub) = weak.upgrade() else {
                    return;
                };
                match serde_json::from_value::<NewMessageNotification>(payload.clone()) {
                    Ok(notification) => hub.dispatch(&topic, &notification),
                    Err(e) => warn!(group = %topic, error = %e, "Dropping malformed notification"),
                }
            });
            let subscription = self.inner.transport.subscribe(group_id, sink)?;
            groups.insert(
                group_id.to_string(),
                GroupChannel {
                    listeners: HashMap::new(),
                    subscription: Some(subscription),
                },
            );
            debug!(group = %group_id, "Opened group transport subscription");
        }

        if let Some(group) = groups.get_mut(group_id) {
            group.listeners.insert(id, listener);
        }

        Ok(Subscription {
            hub: Arc::downgrade(&self.inner),
            group_id: group_id.to_string(),
            id,
            active: true,
        })
    }

    /// Publish `notification` on the group's transport topic, reaching every
    /// hub subscribed to it, this one included. Transport errors are logged.
    pub async fn publish(&self, group_id: &str, notification: &NewMessageNotification) {
        let payload = match serde_json::to_value(notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(group = %group_id, error = %e, "Failed to encode notification");
                return;
            }
        };
        if let Err(e) = self
            .inner
            .transport
            .publish(group_id, NEW_MESSAGE_EVENT, &payload)
            .await
        {
            warn!(group = %group_id, error = %e, "Failed to publish notification");
        }
    }

    pub fn listener_count(&self, group_id: &str) -> usize {
        lock(&self.inner.groups)
            .get(group_id)
            .map_or(0, |g| g.listeners.len())
    }

    /// Groups with at least one listener.
    pub fn active_groups(&self) -> usize {
        lock(&self.inner.groups).len()
    }
}

/// Handle for one registered listener.
pub struct Subscription {
    hub: Weak<HubInner>,
    group_id: String,
    id: Uuid,
    active: bool,
}

impl Subscription {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.group_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
