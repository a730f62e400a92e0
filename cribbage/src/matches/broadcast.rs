//! Fan-out of match events to connected clients.
//!
//! Publishing never blocks: each subscriber has a bounded queue, and one
//! that falls behind (or has gone away) is dropped rather than slowing the
//! match down.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::MatchId;
use crate::game::PlayerId;

/// Channel carrying the public view of a match.
#[must_use]
pub fn match_channel(match_id: MatchId) -> String {
    format!("match:{match_id}")
}

/// Channel carrying one player's private view of a match.
#[must_use]
pub fn player_channel(match_id: MatchId, player_id: PlayerId) -> String {
    format!("match:{match_id}:player:{player_id}")
}

/// Something that can deliver named events to subscribers of a channel.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, channel: &str, event: &str, payload: Value);
}

/// What subscribers receive.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    /// RFC 3339 with nanoseconds, UTC.
    pub timestamp: String,
}

impl Envelope {
    #[must_use]
    pub fn new(event_type: &str, payload: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

/// A live subscription. Dropping the receiver is enough to leave; the hub
/// notices on the next send.
pub struct Subscription {
    pub id: Uuid,
    pub channel: String,
    pub receiver: mpsc::Receiver<Envelope>,
}

type Subscribers = HashMap<String, HashMap<Uuid, mpsc::Sender<Envelope>>>;

/// In-process channel hub.
pub struct Hub {
    channels: Mutex<Subscribers>,
    buffer: usize,
}

impl Hub {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, Subscribers> {
        // Nothing panics while the lock is held, so a poisoned map is intact.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, channel: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.channels()
            .entry(channel.to_string())
            .or_default()
            .insert(id, sender);
        log::debug!("Subscriber {id} joined {channel}");
        Subscription {
            id,
            channel: channel.to_string(),
            receiver,
        }
    }

    pub fn unsubscribe(&self, channel: &str, id: Uuid) {
        let mut channels = self.channels();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels().get(channel).map_or(0, HashMap::len)
    }
}

impl Broadcaster for Hub {
    fn broadcast(&self, channel: &str, event: &str, payload: Value) {
        let mut channels = self.channels();
        let Some(subscribers) = channels.get_mut(channel) else {
            return;
        };

        let envelope = Envelope::new(event, payload);
        subscribers.retain(|id, sender| match sender.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Subscriber {id} on {channel} is too slow, dropping it");
                metrics::counter!("broadcast_dropped_subscribers_total", "reason" => "full")
                    .increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Subscriber {id} on {channel} disconnected, removing");
                false
            }
        });
        if subscribers.is_empty() {
            channels.remove(channel);
        }
    }
}

/// Discards everything. For callers that don't need real-time delivery.
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast(&self, _channel: &str, _event: &str, _payload: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_envelopes() {
        let hub = Hub::new(8);
        let mut a = hub.subscribe("match:1");
        let mut b = hub.subscribe("match:1");
        let mut other = hub.subscribe("match:2");

        hub.broadcast("match:1", "match_updated", json!({"version": 3}));

        for sub in [&mut a, &mut b] {
            let envelope = sub.receiver.recv().await.unwrap();
            assert_eq!(envelope.event_type, "match_updated");
            assert_eq!(envelope.payload, json!({"version": 3}));
        }
        assert!(other.receiver.try_recv().is_err());
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = Envelope::new("count_recorded", json!({}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "count_recorded");
        // e.g. 2026-01-01T12:00:00.123456789Z
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(timestamp.ends_with('Z'));
        assert_eq!(timestamp.split('.').nth(1).map(str::len), Some(10));
    }

    #[test]
    fn test_slow_subscriber_is_dropped() {
        let hub = Hub::new(1);
        let _slow = hub.subscribe("match:1");
        hub.broadcast("match:1", "e", json!(1));
        assert_eq!(hub.subscriber_count("match:1"), 1);

        // Queue is full now: the next broadcast drops the subscriber.
        hub.broadcast("match:1", "e", json!(2));
        assert_eq!(hub.subscriber_count("match:1"), 0);
    }

    #[test]
    fn test_closed_subscriber_is_removed() {
        let hub = Hub::new(4);
        let sub = hub.subscribe("match:1");
        drop(sub);
        hub.broadcast("match:1", "e", json!(null));
        assert_eq!(hub.subscriber_count("match:1"), 0);
    }

    #[test]
    fn test_unsubscribe_removes_empty_channel() {
        let hub = Hub::new(4);
        let sub = hub.subscribe("match:1");
        hub.unsubscribe(&sub.channel, sub.id);
        assert_eq!(hub.subscriber_count("match:1"), 0);
        assert!(hub.channels().is_empty());
    }

    #[test]
    fn test_channel_names() {
        let id = Uuid::nil();
        assert_eq!(
            match_channel(id),
            "match:00000000-0000-0000-0000-000000000000"
        );
        assert!(player_channel(id, 7).ends_with(":player:7"));
    }
}
