use std::fmt;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Publish/subscribe channel address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Everyone following a game.
    Game(Uuid),
    /// A single player's private channel.
    User(String),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Game(id) => write!(f, "game:{id}"),
            ChannelId::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Best-effort fan-out of server events to per-game and per-user subscribers.
///
/// Channels are created on first subscription and dropped once their last
/// receiver goes away. Publishing never blocks and never fails the caller.
pub struct NotificationBus {
    channels: DashMap<String, broadcast::Sender<ServerEvent>>,
    capacity: usize,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber that will receive subsequent events on `channel`.
    pub fn subscribe(&self, channel: &ChannelId) -> broadcast::Receiver<ServerEvent> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Hand back `receiver` and drop `channel` if it was the last subscriber.
    pub fn unsubscribe(&self, channel: &ChannelId, receiver: broadcast::Receiver<ServerEvent>) {
        drop(receiver);
        let key = channel.to_string();
        if self
            .channels
            .remove_if(&key, |_, sender| sender.receiver_count() == 0)
            .is_some()
        {
            debug!(channel = %key, "channel released");
        }
    }

    /// Deliver `event` to current subscribers of `channel`; returns how many received it.
    pub fn publish(&self, channel: &ChannelId, event: ServerEvent) -> usize {
        let key = channel.to_string();
        let delivered = match self.channels.get(&key) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        };

        if delivered == 0 {
            self.channels
                .remove_if(&key, |_, sender| sender.receiver_count() == 0);
            debug!(channel = %key, "no subscriber for event");
        }
        delivered
    }

    /// Serialise `payload` and publish it under the event name `event`.
    pub fn publish_json<T: Serialize>(&self, channel: &ChannelId, event: &str, payload: &T) {
        match ServerEvent::json(event.to_owned(), payload) {
            Ok(message) => {
                self.publish(channel, message);
            }
            Err(err) => warn!(
                channel = %channel,
                event,
                error = %err,
                "failed to serialise event payload"
            ),
        }
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
