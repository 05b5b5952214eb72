//! Event broadcast gateway.
//!
//! Fans lifecycle events out to two kinds of consumers: named internal
//! handlers registered at startup (e.g. the notifier bridge) and streaming
//! subscribers fed through a broadcast channel. Delivery is best-effort on
//! both paths: a slow or dropped subscriber never affects the others or
//! the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

/// Broadcast channel buffer size for event fan-out.
const BROADCAST_CAPACITY: usize = 256;

/// A published lifecycle event.
#[derive(Debug, Clone)]
pub struct SubbotEvent {
    pub code: String,
    pub event: String,
    pub payload: Value,
    pub at: i64,
}

/// Internal subscriber callback, keyed by event name at registration.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &SubbotEvent);
}

/// Gateway owning the broadcast channel and the handler registry.
pub struct EventGateway {
    tx: broadcast::Sender<SubbotEvent>,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl EventGateway {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register an internal handler for one event name.
    pub async fn register(&self, event_name: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .await
            .entry(event_name.to_string())
            .or_default()
            .push(handler);
    }

    /// Open a streaming subscription over all published events.
    pub fn subscribe(&self) -> broadcast::Receiver<SubbotEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to matching handlers and all stream subscribers.
    pub async fn publish(&self, event: SubbotEvent) {
        {
            let handlers = self.handlers.read().await;
            if let Some(list) = handlers.get(&event.event) {
                for handler in list {
                    handler.handle(&event);
                }
            }
        }

        // Err means no live stream subscriber, which is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(code: &str, name: &str) -> SubbotEvent {
        SubbotEvent {
            code: code.to_string(),
            event: name.to_string(),
            payload: serde_json::json!({}),
            at: 0,
        }
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler for Recorder {
        fn handle(&self, event: &SubbotEvent) {
            self.seen.lock().unwrap().push(event.code.clone());
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_stream_subscribers() {
        let gateway = EventGateway::new();
        let mut rx1 = gateway.subscribe();
        let mut rx2 = gateway.subscribe();

        gateway.publish(event("SB-1", "connected")).await;

        assert_eq!(rx1.recv().await.unwrap().code, "SB-1");
        assert_eq!(rx2.recv().await.unwrap().code, "SB-1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_fail() {
        let gateway = EventGateway::new();
        gateway.publish(event("SB-1", "connected")).await;
    }

    #[tokio::test]
    async fn handlers_only_see_their_event_name() {
        let gateway = EventGateway::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        gateway
            .register("qr_ready", Arc::clone(&recorder) as Arc<dyn EventHandler>)
            .await;

        gateway.publish(event("SB-1", "qr_ready")).await;
        gateway.publish(event("SB-2", "connected")).await;
        gateway.publish(event("SB-3", "qr_ready")).await;

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(*seen, vec!["SB-1".to_string(), "SB-3".to_string()]);
    }

    #[tokio::test]
    async fn multiple_handlers_for_one_event() {
        let gateway = EventGateway::new();
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let second = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        gateway
            .register("stopped", Arc::clone(&first) as Arc<dyn EventHandler>)
            .await;
        gateway
            .register("stopped", Arc::clone(&second) as Arc<dyn EventHandler>)
            .await;

        gateway.publish(event("SB-1", "stopped")).await;

        assert_eq!(first.seen.lock().unwrap().len(), 1);
        assert_eq!(second.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let gateway = EventGateway::new();
        let rx1 = gateway.subscribe();
        let mut rx2 = gateway.subscribe();
        drop(rx1);

        gateway.publish(event("SB-1", "connected")).await;
        assert_eq!(rx2.recv().await.unwrap().code, "SB-1");
    }
}
