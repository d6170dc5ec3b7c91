//! Fan-out change hub: publishes `FlagStreamEvent`s to a dynamic set of
//! per-scope subscribers without ever blocking on a slow one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, instrument};

use flagforge_core::FlagStreamEvent;

/// Bounded per-subscriber delivery buffer size.
pub const SUBSCRIBER_BUFFER: usize = 32;

type Scope = (String, String);

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<FlagStreamEvent>,
}

#[derive(Default)]
struct Subscribers {
    by_scope: HashMap<Scope, Vec<Subscriber>>,
}

pub struct ChangeHub {
    subscribers: RwLock<Subscribers>,
    next_id: AtomicU64,
}

/// Handle returned from `subscribe`; dropping or calling `unsubscribe`
/// removes the subscriber from the hub. Unsubscribing is idempotent:
/// calling `unsubscribe` twice, or after the hub itself is gone, is a no-op.
pub struct SubscriptionHandle {
    hub: Arc<ChangeHub>,
    scope: Scope,
    id: u64,
}

impl SubscriptionHandle {
    pub async fn unsubscribe(self) {
        self.hub.remove_subscriber(&self.scope, self.id).await;
    }
}

impl ChangeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { subscribers: RwLock::new(Subscribers::default()), next_id: AtomicU64::new(1) })
    }

    #[instrument(skip(self_arc))]
    pub async fn subscribe(
        self_arc: &Arc<Self>,
        project_key: &str,
        environment_key: &str,
    ) -> (mpsc::Receiver<FlagStreamEvent>, SubscriptionHandle) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self_arc.next_id.fetch_add(1, Ordering::Relaxed);
        let scope = (project_key.to_string(), environment_key.to_string());

        let mut guard = self_arc.subscribers.write().await;
        guard.by_scope.entry(scope.clone()).or_default().push(Subscriber { id, sender: tx });
        drop(guard);

        debug!(project = project_key, environment = environment_key, subscriber_id = id, "subscribed to change hub");
        (rx, SubscriptionHandle { hub: self_arc.clone(), scope, id })
    }

    async fn remove_subscriber(&self, scope: &Scope, id: u64) {
        let mut guard = self.subscribers.write().await;
        if let Some(list) = guard.by_scope.get_mut(scope) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                guard.by_scope.remove(scope);
            }
        }
    }

    /// Fan out an event to every subscriber of a scope. Never awaits a
    /// subscriber's consumption: a full buffer means the event is dropped
    /// for that subscriber only (`try_send`), never blocks the publisher.
    #[instrument(skip(self, event))]
    pub async fn publish(&self, project_key: &str, environment_key: &str, event: FlagStreamEvent) {
        let scope = (project_key.to_string(), environment_key.to_string());
        let guard = self.subscribers.read().await;
        let Some(list) = guard.by_scope.get(&scope) else {
            return;
        };

        let mut dropped = 0u32;
        for subscriber in list {
            if subscriber.sender.try_send(event.clone()).is_err() {
                dropped += 1;
            }
        }
        drop(guard);

        if dropped > 0 {
            debug!(project = project_key, environment = environment_key, dropped, "hub publish dropped for slow subscribers");
        }
    }

    pub async fn subscriber_count(&self, project_key: &str, environment_key: &str) -> usize {
        let scope = (project_key.to_string(), environment_key.to_string());
        self.subscribers.read().await.by_scope.get(&scope).map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_all_subscribers_in_a_scope() {
        let hub = ChangeHub::new();
        let (mut rx1, _h1) = ChangeHub::subscribe(&hub, "acme", "prod").await;
        let (mut rx2, _h2) = ChangeHub::subscribe(&hub, "acme", "prod").await;

        hub.publish("acme", "prod", FlagStreamEvent::flag_update("f1", json!(true), "on")).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_does_not_cross_scopes() {
        let hub = ChangeHub::new();
        let (mut rx, _h) = ChangeHub::subscribe(&hub, "acme", "staging").await;

        hub.publish("acme", "prod", FlagStreamEvent::flag_update("f1", json!(true), "on")).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let hub = ChangeHub::new();
        let (_rx, handle) = ChangeHub::subscribe(&hub, "acme", "prod").await;
        assert_eq!(hub.subscriber_count("acme", "prod").await, 1);

        handle.unsubscribe().await;
        assert_eq!(hub.subscriber_count("acme", "prod").await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_fast_subscriber() {
        let hub = ChangeHub::new();
        let (slow_rx, _slow_handle) = ChangeHub::subscribe(&hub, "acme", "prod").await;
        let (mut fast_rx, _fast_handle) = ChangeHub::subscribe(&hub, "acme", "prod").await;

        // Fill the slow subscriber's buffer without ever draining it.
        for i in 0..(SUBSCRIBER_BUFFER + 5) {
            hub.publish("acme", "prod", FlagStreamEvent::flag_update(format!("f{i}"), json!(true), "on")).await;
        }

        // The fast subscriber still received at least the buffer's worth of events.
        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received > 0);
        drop(slow_rx);
    }
}
