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

//! Session bookkeeping for the event loop.
//!
//! Holds the connection state, the packet-id space, the subscription set,
//! and the tables of operations awaiting broker acknowledgement. All
//! mutation happens on the event-loop task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use tracing::{trace, warn};

use crate::mqtt_client::backoff::Backoff;
use crate::mqtt_client::client_error::ClientError;
use crate::mqtt_client::packet::{Publish, QoS};
use crate::mqtt_client::subscription::{MessageListener, SubscriptionTable};

/// Connection lifecycle state.
///
/// `Connecting -> Connected` on a successful handshake; `Connected ->
/// Reconnecting` on connection loss (retryable); `Closing -> Disconnected`
/// on an explicit close. Fatal rejections land in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Closing => "Closing",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocator for the 16-bit packet-id space.
///
/// Ids are non-zero and unique among in-flight operations; they are
/// released when the operation resolves.
#[derive(Debug)]
pub struct PacketIdAllocator {
    next: u16,
    used: HashSet<u16>,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self {
            next: 1,
            used: HashSet::new(),
        }
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next free id, or `None` when all 65535 are in flight.
    pub fn allocate(&mut self) -> Option<u16> {
        for _ in 0..=u16::MAX {
            let candidate = self.next;
            self.next = if self.next == u16::MAX { 1 } else { self.next + 1 };
            if candidate != 0 && self.used.insert(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn release(&mut self, pkid: u16) {
        self.used.remove(&pkid);
    }

    pub fn in_flight(&self) -> usize {
        self.used.len()
    }
}

/// How a publish resolution is delivered to the caller.
///
/// Resolving consumes the value, so a completion cannot fire twice.
pub enum Completion {
    /// A blocking `publish()` awaiting a oneshot response.
    Respond(oneshot::Sender<Result<(), ClientError>>),
    /// A non-blocking `publish_with_callback()` callback.
    Callback(Box<dyn FnOnce(Result<(), ClientError>) + Send>),
}

impl Completion {
    pub fn resolve(self, result: Result<(), ClientError>) {
        match self {
            Completion::Respond(tx) => {
                let _ = tx.send(result);
            }
            Completion::Callback(callback) => callback(result),
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Respond(_) => f.write_str("Completion::Respond"),
            Completion::Callback(_) => f.write_str("Completion::Callback"),
        }
    }
}

/// A QoS 1 publish awaiting PUBACK.
#[derive(Debug)]
pub struct PendingPublish {
    pub packet: Publish,
    pub retries_left: u32,
    pub deadline: Instant,
    pub completion: Completion,
}

/// A SUBSCRIBE awaiting SUBACK.
///
/// `listener` is present for caller-initiated subscribes; replayed
/// subscribes keep their listener in the table and carry neither listener
/// nor responder.
pub struct PendingSubscribe {
    pub filter: String,
    pub qos: QoS,
    pub listener: Option<Arc<dyn MessageListener>>,
    pub responder: Option<oneshot::Sender<Result<QoS, ClientError>>>,
    pub deadline: Instant,
}

/// An UNSUBSCRIBE awaiting UNSUBACK.
pub struct PendingUnsubscribe {
    pub filter: String,
    pub responder: oneshot::Sender<Result<(), ClientError>>,
    pub deadline: Instant,
}

/// All per-connection mutable state owned by the event loop.
pub struct SessionState {
    pub state: ConnectionState,
    pub subscriptions: SubscriptionTable,
    pub packet_ids: PacketIdAllocator,
    pub pending_publishes: HashMap<u16, PendingPublish>,
    pub pending_subscribes: HashMap<u16, PendingSubscribe>,
    pub pending_unsubscribes: HashMap<u16, PendingUnsubscribe>,
    pub backoff: Backoff,
    pub awaiting_pingresp: bool,
}

impl SessionState {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            subscriptions: SubscriptionTable::new(),
            packet_ids: PacketIdAllocator::new(),
            pending_publishes: HashMap::new(),
            pending_subscribes: HashMap::new(),
            pending_unsubscribes: HashMap::new(),
            backoff,
            awaiting_pingresp: false,
        }
    }

    /// Resolve the pending publish acknowledged by `pkid`, if any.
    pub fn take_puback(&mut self, pkid: u16) -> Option<Completion> {
        match self.pending_publishes.remove(&pkid) {
            Some(pending) => {
                self.packet_ids.release(pkid);
                Some(pending.completion)
            }
            None => {
                trace!(pkid, "PUBACK for unknown packet id, ignoring");
                None
            }
        }
    }

    pub fn take_suback(&mut self, pkid: u16) -> Option<PendingSubscribe> {
        let pending = self.pending_subscribes.remove(&pkid)?;
        self.packet_ids.release(pkid);
        Some(pending)
    }

    pub fn take_unsuback(&mut self, pkid: u16) -> Option<PendingUnsubscribe> {
        let pending = self.pending_unsubscribes.remove(&pkid)?;
        self.packet_ids.release(pkid);
        Some(pending)
    }

    /// Advance QoS 1 retransmission deadlines.
    ///
    /// Expired publishes with retries left get a new deadline and, when
    /// connected, are returned for retransmission with DUP set. A retry
    /// slot is burned even while disconnected so the total wait stays
    /// bounded. Publishes out of retries resolve with `PublishTimeout`.
    pub fn sweep_publishes(
        &mut self,
        now: Instant,
        retry_interval: Duration,
        connected: bool,
    ) -> Vec<Publish> {
        let mut retransmit = Vec::new();
        let mut expired = Vec::new();

        for (&pkid, pending) in self.pending_publishes.iter_mut() {
            if pending.deadline > now {
                continue;
            }
            if pending.retries_left == 0 {
                expired.push(pkid);
                continue;
            }
            pending.retries_left -= 1;
            pending.deadline = now + retry_interval;
            if connected {
                let mut packet = pending.packet.clone();
                packet.dup = true;
                retransmit.push(packet);
            }
        }

        for pkid in expired {
            if let Some(pending) = self.pending_publishes.remove(&pkid) {
                self.packet_ids.release(pkid);
                warn!(pkid, topic = %pending.packet.topic, "publish exhausted retries");
                pending.completion.resolve(Err(ClientError::PublishTimeout));
            }
        }

        retransmit
    }

    /// Fail subscribe/unsubscribe operations whose deadline has passed.
    pub fn sweep_subscribes(&mut self, now: Instant) {
        let expired: Vec<u16> = self
            .pending_subscribes
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&pkid, _)| pkid)
            .collect();
        for pkid in expired {
            if let Some(pending) = self.take_suback(pkid) {
                warn!(filter = %pending.filter, "subscribe timed out waiting for SUBACK");
                if let Some(responder) = pending.responder {
                    let _ = responder.send(Err(ClientError::SubscribeTimeout));
                }
            }
        }

        let expired: Vec<u16> = self
            .pending_unsubscribes
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&pkid, _)| pkid)
            .collect();
        for pkid in expired {
            if let Some(pending) = self.take_unsuback(pkid) {
                warn!(filter = %pending.filter, "unsubscribe timed out waiting for UNSUBACK");
                let _ = pending.responder.send(Err(ClientError::SubscribeTimeout));
            }
        }
    }

    /// Fail pending subscribe/unsubscribe operations; used on connection
    /// loss, where callers can retry once reconnected.
    pub fn fail_pending_requests(&mut self, make_error: impl Fn() -> ClientError) {
        for (pkid, pending) in self.pending_subscribes.drain() {
            self.packet_ids.release(pkid);
            if let Some(responder) = pending.responder {
                let _ = responder.send(Err(make_error()));
            }
        }
        for (pkid, pending) in self.pending_unsubscribes.drain() {
            self.packet_ids.release(pkid);
            let _ = pending.responder.send(Err(make_error()));
        }
    }

    /// Fail every pending operation, publishes included; used on close.
    pub fn fail_all_pending(&mut self, make_error: impl Fn() -> ClientError) {
        self.fail_pending_requests(&make_error);
        for (pkid, pending) in self.pending_publishes.drain() {
            self.packet_ids.release(pkid);
            pending.completion.resolve(Err(make_error()));
        }
    }

    /// In-flight QoS 1 publishes to retransmit after a reconnect, DUP set,
    /// deadlines refreshed.
    pub fn retransmission_set(&mut self, now: Instant, retry_interval: Duration) -> Vec<Publish> {
        let mut packets: Vec<Publish> = Vec::with_capacity(self.pending_publishes.len());
        for pending in self.pending_publishes.values_mut() {
            pending.deadline = now + retry_interval;
            let mut packet = pending.packet.clone();
            packet.dup = true;
            packets.push(packet);
        }
        // Stable order for logging and tests
        packets.sort_by_key(|p| p.pkid);
        packets
    }
}
