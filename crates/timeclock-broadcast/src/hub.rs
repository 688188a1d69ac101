//! Subscriber registry and non-blocking publish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use timeclock_core::constants::{
    DEFAULT_HUB_HEARTBEAT_INTERVAL_MS, DEFAULT_SUBSCRIBER_QUEUE_DEPTH,
};

use crate::message::{BroadcastMessage, MessageKind};

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bounded queue depth per subscriber.
    pub queue_depth: usize,

    /// Interval of the liveness heartbeat publish.
    pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_SUBSCRIBER_QUEUE_DEPTH,
            heartbeat_interval: Duration::from_millis(DEFAULT_HUB_HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// A live dashboard connection's receiving end
///
/// Created by [`BroadcastHub::subscribe`]; dropped subscribers are
/// removed from the hub on the next publish that finds their queue
/// closed.
pub struct Subscriber {
    id: Uuid,
    rx: mpsc::Receiver<BroadcastMessage>,
}

impl Subscriber {
    /// Receive the next broadcast message.
    ///
    /// Returns `None` once the hub has dropped this subscriber (queue
    /// overflow) or shut down.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        self.rx.recv().await
    }

    /// Identity of this subscription, for [`BroadcastHub::unsubscribe`].
    pub fn id(&self) -> Uuid {
        self.id
    }
}

struct HubInner {
    subscribers: HashMap<Uuid, mpsc::Sender<BroadcastMessage>>,
    published: u64,
    dropped_subscribers: u64,
}

/// Fan-out hub for dashboard messages
///
/// Cheap to clone; all clones publish into the same subscriber set.
/// `publish` is synchronous and never blocks on a consumer.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<Mutex<HubInner>>,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new(config: HubConfig) -> Self {
        BroadcastHub {
            inner: Arc::new(Mutex::new(HubInner {
                subscribers: HashMap::new(),
                published: 0,
                dropped_subscribers: 0,
            })),
            config,
        }
    }

    /// Register a new output channel.
    pub fn subscribe(&self) -> Subscriber {
        let (tx, rx) = mpsc::channel(self.config.queue_depth);
        let id = Uuid::new_v4();

        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.insert(id, tx);
            debug!(subscriber = %id, total = inner.subscribers.len(), "Subscriber added");
        }

        Subscriber { id, rx }
    }

    /// Remove a subscriber. Idempotent.
    pub fn unsubscribe(&self, id: Uuid) {
        if let Ok(mut inner) = self.inner.lock()
            && inner.subscribers.remove(&id).is_some()
        {
            debug!(subscriber = %id, total = inner.subscribers.len(), "Subscriber removed");
        }
    }

    /// Deliver a message to every current subscriber.
    ///
    /// Best-effort: a subscriber whose queue is full or closed is
    /// dropped silently and never blocks the publisher or its peers.
    pub fn publish(&self, message: BroadcastMessage) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.published += 1;

        let mut dead: Vec<Uuid> = Vec::new();
        for (id, tx) in &inner.subscribers {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_))
                | Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            inner.subscribers.remove(&id);
            inner.dropped_subscribers += 1;
            debug!(subscriber = %id, "Slow or closed subscriber dropped");
        }

        trace!(kind = %message.kind, recipients = inner.subscribers.len(), "Published");
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.subscribers.len())
            .unwrap_or(0)
    }

    /// Total subscribers dropped for falling behind.
    pub fn dropped_subscribers(&self) -> u64 {
        self.inner
            .lock()
            .map(|inner| inner.dropped_subscribers)
            .unwrap_or(0)
    }

    /// Spawn the periodic liveness heartbeat.
    ///
    /// Publishes subscriber count and total message throughput on the
    /// configured interval, independent of event traffic. Abort the
    /// returned handle to stop.
    pub fn start_heartbeat(&self) -> JoinHandle<()> {
        let hub = self.clone();
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so heartbeats
            // start one full interval after startup.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let (subscribers, published) = {
                    let Ok(inner) = hub.inner.lock() else { break };
                    (inner.subscribers.len(), inner.published)
                };
                hub.publish(BroadcastMessage::new(
                    MessageKind::Heartbeat,
                    serde_json::json!({
                        "subscribers": subscribers,
                        "published": published,
                    }),
                ));
            }
        })
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
