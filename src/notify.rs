//! Event Notifier and Attack Hook
//!
//! Publish/subscribe topics the engine emits on, and the call boundary for
//! acting on a discovered (client, BSSID) pair. Neither blocks the loop.
//!
//! [`StoreNotifier`] appends to the registry's message log so that other
//! processes sharing the store can follow the events.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::registry::Store;
use crate::wireless::MacAddr;

/// Topic names
pub mod topic {
    /// Frame seen for an access point flagged as a target
    pub const TARGET: &str = "target";
    /// A (client, BSSID) pair was handed to the attack hook
    pub const CLIENT_FOUND: &str = "client_found";
    /// Open network advertised
    pub const SCAN_OPEN: &str = "scan_open";
    /// Protected traffic on a WEP network
    pub const WEP_FOUND: &str = "wep_found";
}

/// A message published on a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub payload: String,
}

/// Fire-and-forget publisher
pub trait Notifier: Send + Sync {
    fn publish(&self, topic: &str, payload: &str);
}

/// In-process notifier fanning out to bounded channel subscribers.
///
/// A full subscriber queue drops the message rather than stalling the loop.
#[derive(Debug)]
pub struct ChannelNotifier {
    subscribers: Mutex<HashMap<String, Vec<Sender<Notification>>>>,
    capacity: usize,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Receiver<Notification> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, topic: &str, payload: &str) {
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(topic) else {
            return;
        };

        let message = Notification {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };

        senders.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber queue full on {}, dropping message", topic);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn publish(&self, topic: &str, payload: &str) {
        info!("[{}] {}", topic, payload);
    }
}

/// Notifier backed by the shared store's message log.
///
/// A failed append is logged and dropped.
#[derive(Clone)]
pub struct StoreNotifier {
    store: Arc<dyn Store>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl Notifier for StoreNotifier {
    fn publish(&self, topic: &str, payload: &str) {
        match self.store.publish(topic, payload) {
            Ok(id) => debug!("[{}] #{} {}", topic, id, payload),
            Err(e) => warn!("Failed to publish on {}: {}", topic, e),
        }
    }
}

/// Boundary for acting on a discovered client; the action itself lives elsewhere
pub trait AttackHook: Send {
    fn deauth_candidate(&mut self, client: MacAddr, bssid: MacAddr, channel: Option<u8>);
}

#[derive(Debug, Serialize)]
struct ClientFound {
    client_addr: MacAddr,
    bssid: MacAddr,
    channel: Option<u8>,
}

/// Default hook: announces each candidate on `client_found`
pub struct PublishHook<N: Notifier> {
    notifier: N,
}

impl<N: Notifier> PublishHook<N> {
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }
}

impl<N: Notifier> AttackHook for PublishHook<N> {
    fn deauth_candidate(&mut self, client: MacAddr, bssid: MacAddr, channel: Option<u8>) {
        let message = ClientFound {
            client_addr: client,
            bssid,
            channel,
        };
        match serde_json::to_string(&message) {
            Ok(payload) => self.notifier.publish(topic::CLIENT_FOUND, &payload),
            Err(e) => debug!("Failed to encode client_found: {}", e),
        }
    }
}

/// Hook that ignores every candidate
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl AttackHook for NoopHook {
    fn deauth_candidate(&mut self, _client: MacAddr, _bssid: MacAddr, _channel: Option<u8>) {}
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn publish(&self, topic: &str, payload: &str) {
        (**self).publish(topic, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryStore, SqliteStore};

    #[test]
    fn test_publish_reaches_topic_subscribers_only() {
        let notifier = ChannelNotifier::default();
        let targets = notifier.subscribe(topic::TARGET);
        let open = notifier.subscribe(topic::SCAN_OPEN);

        notifier.publish(topic::TARGET, "02:00:00:00:00:01");

        let msg = targets.try_recv().unwrap();
        assert_eq!(msg.topic, "target");
        assert_eq!(msg.payload, "02:00:00:00:00:01");
        assert!(open.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let notifier = ChannelNotifier::new(1);
        let rx = notifier.subscribe(topic::TARGET);
        notifier.publish(topic::TARGET, "a");
        notifier.publish(topic::TARGET, "b");
        assert_eq!(rx.try_recv().unwrap().payload, "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnected_subscribers_are_pruned() {
        let notifier = ChannelNotifier::default();
        drop(notifier.subscribe(topic::TARGET));
        notifier.publish(topic::TARGET, "a");
        assert!(notifier.subscribers.lock()[topic::TARGET].is_empty());
    }

    #[test]
    fn test_publish_hook_payload() {
        let notifier = Arc::new(ChannelNotifier::default());
        let rx = notifier.subscribe(topic::CLIENT_FOUND);
        let mut hook = PublishHook::new(notifier.clone());

        hook.deauth_candidate(
            "aa:aa:aa:bb:bb:bb".parse().unwrap(),
            "bb:bb:bb:aa:aa:aa".parse().unwrap(),
            Some(6),
        );

        let value: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap().payload).unwrap();
        assert_eq!(value["client_addr"], "aa:aa:aa:bb:bb:bb");
        assert_eq!(value["bssid"], "bb:bb:bb:aa:aa:aa");
        assert_eq!(value["channel"], 6);
    }

    #[test]
    fn test_store_notifier_appends_to_message_log() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let notifier = StoreNotifier::new(store.clone());

        notifier.publish(topic::SCAN_OPEN, "02:00:00:00:00:01");
        notifier.publish(topic::TARGET, "02:00:00:00:00:02");

        let messages = store.messages_after(0, 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "scan_open");
        assert_eq!(messages[1].payload, "02:00:00:00:00:02");
    }

    #[test]
    fn test_store_notifier_reaches_other_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let timeout = std::time::Duration::from_secs(1);
        let publisher: Arc<dyn Store> = Arc::new(SqliteStore::open(&path, timeout).unwrap());
        let watcher = SqliteStore::open(&path, timeout).unwrap();

        let mut hook = PublishHook::new(StoreNotifier::new(publisher));
        hook.deauth_candidate(
            "aa:aa:aa:bb:bb:bb".parse().unwrap(),
            "bb:bb:bb:aa:aa:aa".parse().unwrap(),
            None,
        );

        let messages = watcher.messages_after(0, 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, topic::CLIENT_FOUND);
        let value: serde_json::Value = serde_json::from_str(&messages[0].payload).unwrap();
        assert_eq!(value["client_addr"], "aa:aa:aa:bb:bb:bb");
        assert!(value["channel"].is_null());
    }
}
