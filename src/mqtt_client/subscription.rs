// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Client-side subscription set and inbound message dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::mqtt_client::packet::{QoS, SubscribeFilter};
use crate::mqtt_client::topic::topic_matches;

/// Message delivered to subscription listeners.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// Packet id of the inbound PUBLISH; 0 for QoS 0.
    pub pkid: u16,
}

/// Callback invoked for every message matching a subscription.
///
/// Listeners run on the client's event-loop task in wire arrival order,
/// so they must return promptly and never block.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &InboundMessage);
}

impl<F> MessageListener for F
where
    F: Fn(&InboundMessage) + Send + Sync,
{
    fn on_message(&self, message: &InboundMessage) {
        self(message)
    }
}

struct SubscriptionEntry {
    qos: QoS,
    listener: Arc<dyn MessageListener>,
}

/// The set of active subscriptions, keyed by topic filter.
///
/// Subscribing to an existing filter updates QoS and listener in place,
/// so the set reflects the net effect of all subscribe/unsubscribe calls.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: HashMap<String, SubscriptionEntry>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the subscription for `filter`.
    pub fn insert(&mut self, filter: String, qos: QoS, listener: Arc<dyn MessageListener>) {
        self.entries
            .insert(filter, SubscriptionEntry { qos, listener });
    }

    /// Record the granted QoS for an existing entry (SUBACK during replay).
    pub fn update_qos(&mut self, filter: &str, qos: QoS) {
        if let Some(entry) = self.entries.get_mut(filter) {
            entry.qos = qos;
        }
    }

    /// Remove the subscription for `filter`. Returns whether it existed.
    pub fn remove(&mut self, filter: &str) -> bool {
        self.entries.remove(filter).is_some()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entries.contains_key(filter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke the listener of every subscription matching the message's
    /// topic. Returns the number of listeners invoked.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let mut delivered = 0;
        for (filter, entry) in &self.entries {
            if topic_matches(filter, &message.topic) {
                entry.listener.on_message(message);
                delivered += 1;
            }
        }
        delivered
    }

    /// Filters and QoS levels to re-request after a reconnect.
    pub fn replay_filters(&self) -> Vec<SubscribeFilter> {
        self.entries
            .iter()
            .map(|(filter, entry)| SubscribeFilter {
                path: filter.clone(),
                qos: entry.qos,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(topic: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(b"x"),
            qos: QoS::AtMostOnce,
            pkid: 0,
        }
    }

    fn counting_listener(counter: Arc<AtomicUsize>) -> Arc<dyn MessageListener> {
        Arc::new(move |_: &InboundMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn resubscribe_updates_in_place() {
        let mut table = SubscriptionTable::new();
        let counter = Arc::new(AtomicUsize::new(0));

        table.insert(
            "a/b".to_string(),
            QoS::AtMostOnce,
            counting_listener(counter.clone()),
        );
        table.insert(
            "a/b".to_string(),
            QoS::AtLeastOnce,
            counting_listener(counter.clone()),
        );

        assert_eq!(table.len(), 1);
        let replay = table.replay_filters();
        assert_eq!(replay[0].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn dispatch_reaches_all_matching_listeners() {
        let mut table = SubscriptionTable::new();
        let exact = Arc::new(AtomicUsize::new(0));
        let wildcard = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));

        table.insert(
            "a/b/c".to_string(),
            QoS::AtMostOnce,
            counting_listener(exact.clone()),
        );
        table.insert(
            "a/+/c".to_string(),
            QoS::AtMostOnce,
            counting_listener(wildcard.clone()),
        );
        table.insert(
            "x/y".to_string(),
            QoS::AtMostOnce,
            counting_listener(other.clone()),
        );

        let delivered = table.dispatch(&message("a/b/c"));

        assert_eq!(delivered, 2);
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn net_effect_of_subscribe_unsubscribe() {
        let mut table = SubscriptionTable::new();
        let counter = Arc::new(AtomicUsize::new(0));

        table.insert(
            "a".to_string(),
            QoS::AtMostOnce,
            counting_listener(counter.clone()),
        );
        table.insert(
            "b".to_string(),
            QoS::AtMostOnce,
            counting_listener(counter.clone()),
        );
        assert!(table.remove("a"));
        assert!(!table.remove("a"));

        assert_eq!(table.len(), 1);
        assert!(table.contains("b"));
        assert_eq!(table.dispatch(&message("a")), 0);
        assert_eq!(table.dispatch(&message("b")), 1);
    }
}
