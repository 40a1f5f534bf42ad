//! Per-lobby fan-out of typed events to subscribed sockets.
//!
//! Each live lobby code owns a topic. Subscribers hand over the sender half
//! of an unbounded channel; the receiver half lives inside the WebSocket
//! actor, so a dead socket fails the send and is pruned on the next publish
//! without affecting any other delivery. Per-subscriber ordering is the
//! channel order, which matches publish order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use faceoff_protocol::{LobbyEvent, LobbyMessage};

/// Identifies one subscription on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Sender half registered with the broadcaster. Frames are pre-serialized
/// JSON, one string per event.
pub type EventSender = mpsc::UnboundedSender<String>;

/// Counter for generating unique subscriber IDs.
static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
pub struct Broadcaster {
    topics: DashMap<String, HashMap<SubscriberId, EventSender>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber to a lobby's topic, creating the topic if needed.
    pub fn subscribe(&self, code: &str, sender: EventSender) -> SubscriberId {
        let id = SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed));
        self.topics
            .entry(code.to_string())
            .or_default()
            .insert(id, sender);
        id
    }

    /// Removes a single subscription; empty topics are dropped.
    pub fn unsubscribe(&self, code: &str, id: SubscriberId) {
        let emptied = match self.topics.get_mut(code) {
            Some(mut subscribers) => {
                subscribers.remove(&id);
                subscribers.is_empty()
            }
            None => return,
        };
        if emptied {
            self.topics.remove_if(code, |_, subscribers| subscribers.is_empty());
        }
    }

    /// Serializes the event once and delivers it to every current
    /// subscriber. A subscriber whose channel is gone is dropped; the
    /// remaining deliveries are unaffected.
    pub fn publish(&self, code: &str, event: LobbyEvent) {
        let kind = event.kind();
        let frame = match serde_json::to_string(&LobbyMessage::new(event)) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, code, kind, "failed to serialize broadcast frame");
                return;
            }
        };
        if let Some(mut subscribers) = self.topics.get_mut(code) {
            subscribers.retain(|_, sender| sender.send(frame.clone()).is_ok());
            tracing::trace!(code, kind, subscribers = subscribers.len(), "event published");
        }
    }

    /// Delivers an event to a single subscriber (initial snapshots, error
    /// frames). A failed send drops that subscription.
    pub fn send_to(&self, code: &str, id: SubscriberId, event: LobbyEvent) {
        let frame = match serde_json::to_string(&LobbyMessage::new(event)) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, code, "failed to serialize personal frame");
                return;
            }
        };
        let mut emptied = false;
        if let Some(mut subscribers) = self.topics.get_mut(code) {
            if let Some(sender) = subscribers.get(&id) {
                if sender.send(frame).is_err() {
                    subscribers.remove(&id);
                    emptied = subscribers.is_empty();
                }
            }
        }
        if emptied {
            self.topics.remove_if(code, |_, subscribers| subscribers.is_empty());
        }
    }

    /// Drops a whole topic. Called when the lobby behind it is torn down.
    pub fn release(&self, code: &str) {
        self.topics.remove(code);
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, code: &str) -> usize {
        self.topics.get(code).map(|subs| subs.len()).unwrap_or(0)
    }
}
