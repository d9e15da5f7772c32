//! # Pub/Sub Channel Registry
//!
//! Interface-level channel fan-out: a channel name maps to the set of
//! subscriber senders, and a pattern maps to the set of pattern-subscriber
//! senders. `PUBLISH` walks both maps and pushes a RESP message to every
//! matching sender; delivery itself is a bounded `tokio::sync::mpsc`
//! channel per connection, the same "one task per connection" model the
//! rest of the server uses.

use std::collections::HashMap;

use bytes::Bytes;
use kv_common::glob::glob_match;
use kv_common::RespValue;
use parking_lot::RwLock;
use tokio::sync::mpsc;

pub type PushSender = mpsc::Sender<RespValue>;

#[derive(Default)]
struct PubSubState {
    channels: HashMap<Bytes, Vec<(u64, PushSender)>>,
    patterns: HashMap<Bytes, Vec<(u64, PushSender)>>,
}

/// Channel and pattern subscriber registry, independent of the keyspace
/// lock per the concurrency model's "unrelated to the keyspace lock".
pub struct PubSub {
    state: RwLock<PubSubState>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        PubSub { state: RwLock::new(PubSubState::default()), next_id: std::sync::atomic::AtomicU64::new(1) }
    }

    /// Registers `sender` (the connection's single push channel) against
    /// `channel` and returns a subscription handle used to unsubscribe later.
    /// One connection may hold many subscriptions over the same sender.
    pub fn subscribe_channel(&self, channel: Bytes, sender: PushSender) -> u64 {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.state.write().channels.entry(channel).or_default().push((id, sender));
        id
    }

    pub fn subscribe_pattern(&self, pattern: Bytes, sender: PushSender) -> u64 {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.state.write().patterns.entry(pattern).or_default().push((id, sender));
        id
    }

    pub fn unsubscribe_channel(&self, channel: &[u8], id: u64) {
        let mut state = self.state.write();
        if let Some(subs) = state.channels.get_mut(channel) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                state.channels.remove(channel);
            }
        }
    }

    pub fn unsubscribe_pattern(&self, pattern: &[u8], id: u64) {
        let mut state = self.state.write();
        if let Some(subs) = state.patterns.get_mut(pattern) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                state.patterns.remove(pattern);
            }
        }
    }

    /// Publishes `payload` to every direct subscriber of `channel` and
    /// every pattern subscriber whose pattern matches it. Returns the
    /// number of subscribers the message was handed to (a dropped
    /// receiver, e.g. a closed connection, just doesn't count).
    pub fn publish(&self, channel: &[u8], payload: &Bytes) -> usize {
        let state = self.state.read();
        let mut delivered = 0;

        if let Some(subs) = state.channels.get(channel) {
            for (_, tx) in subs {
                let message = RespValue::array(vec![
                    RespValue::bulk("message"),
                    RespValue::bulk(Bytes::copy_from_slice(channel)),
                    RespValue::bulk(payload.clone()),
                ]);
                if tx.try_send(message).is_ok() {
                    delivered += 1;
                }
            }
        }

        for (pattern, subs) in state.patterns.iter() {
            if !glob_match(pattern, channel) {
                continue;
            }
            for (_, tx) in subs {
                let message = RespValue::array(vec![
                    RespValue::bulk("pmessage"),
                    RespValue::bulk(pattern.clone()),
                    RespValue::bulk(Bytes::copy_from_slice(channel)),
                    RespValue::bulk(payload.clone()),
                ]);
                if tx.try_send(message).is_ok() {
                    delivered += 1;
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_subscriber_receives_published_message() {
        let pubsub = PubSub::new();
        let (tx, mut rx) = mpsc::channel(8);
        pubsub.subscribe_channel(Bytes::from("news"), tx);
        let delivered = pubsub.publish(b"news", &Bytes::from("hello"));
        assert_eq!(delivered, 1);
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, RespValue::Array(Some(_))));
    }

    #[tokio::test]
    async fn pattern_subscriber_matches_glob() {
        let pubsub = PubSub::new();
        let (tx, mut rx) = mpsc::channel(8);
        pubsub.subscribe_pattern(Bytes::from("news.*"), tx);
        let delivered = pubsub.publish(b"news.sports", &Bytes::from("goal"));
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let pubsub = PubSub::new();
        let (tx, _rx) = mpsc::channel(8);
        let id = pubsub.subscribe_channel(Bytes::from("news"), tx);
        pubsub.unsubscribe_channel(b"news", id);
        let delivered = pubsub.publish(b"news", &Bytes::from("hello"));
        assert_eq!(delivered, 0);
    }
}
