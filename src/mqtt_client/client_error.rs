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

//! Error taxonomy for client operations.

use crate::mqtt_client::packet::{CodecError, ConnectReturnCode};
use crate::mqtt_client::transport::TransportError;

/// Error returned by [`MqttClient`](crate::mqtt_client::MqttClient)
/// operations and publish completions.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (I/O, TLS, dial).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer sent bytes that do not decode as a valid packet. The
    /// connection is torn down when this occurs.
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),

    /// CONNACK was not received within the configured connect timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The broker rejected the CONNECT. Fatal codes suppress
    /// auto-reconnect.
    #[error("connection rejected by broker: {0}")]
    ConnectRejected(ConnectReturnCode),

    /// No PINGRESP arrived within the grace period after a PINGREQ.
    #[error("keep-alive timed out waiting for PINGRESP")]
    KeepAliveTimeout,

    /// SUBACK/UNSUBACK was not received within the subscribe timeout.
    #[error("subscribe timed out")]
    SubscribeTimeout,

    /// The broker answered a subscription with the failure return code.
    #[error("subscription rejected by broker")]
    SubscriptionRejected,

    /// A QoS 1 publish exhausted its retransmissions without a PUBACK.
    #[error("publish timed out")]
    PublishTimeout,

    /// The connection was closed while the operation was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// `connect()` was called while already connected or connecting.
    #[error("already connected")]
    AlreadyConnected,

    /// The event loop has terminated and can no longer serve requests.
    #[error("client event loop has shut down")]
    ChannelClosed,

    /// All 65535 packet identifiers are in flight.
    #[error("no free packet id")]
    PacketIdExhausted,

    /// The topic filter or topic name failed validation.
    #[error("invalid topic or filter: {0}")]
    InvalidTopic(String),

    /// QoS 2 is outside the supported protocol subset.
    #[error("QoS 2 is not supported")]
    UnsupportedQos,
}

impl ClientError {
    /// True when losing the connection for this reason should not trigger
    /// an automatic reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::ConnectRejected(code) if code.is_fatal())
    }
}
