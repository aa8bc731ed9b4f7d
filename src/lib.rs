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

//! # MQTT Client Tokio
//!
//! A minimal async MQTT v3.1.1 publish/subscribe client for Rust with tokio,
//! supporting TCP and TLS transports with client-certificate authentication.
//!
//! The client is a cloneable handle backed by a single event-loop task that
//! owns the connection, the codec, and all protocol timers.
//!
//! ## Features
//!
//! - **QoS 0 and QoS 1**: fire-and-forget and acknowledged publishes with
//!   bounded retransmission and exactly-once completion notification
//! - **Wildcard Subscriptions**: `+` and `#` filters with per-subscription
//!   listeners dispatched locally
//! - **Keep-Alive**: automatic PINGREQ with a PINGRESP grace timeout
//! - **Auto-Reconnect**: capped exponential backoff, subscription replay,
//!   and in-flight QoS 1 retransmission with DUP
//! - **TLS**: server verification against a custom CA or the system roots,
//!   optional mutual TLS with a client certificate
//!
//! ## Quick Start
//!
//! ```ignore
//! use mqtt_client_tokio::mqtt_client::{ConnectOption, MqttClient, QoS};
//!
//! let options = ConnectOption::builder()
//!     .host("localhost")
//!     .client_id("my-client")
//!     .build()?;
//! let client = MqttClient::new(options);
//!
//! client.connect().await?;
//! client
//!     .subscribe("sensors/+/temperature", QoS::AtLeastOnce, |message| {
//!         println!("{}: {} bytes", message.topic, message.payload.len());
//!     })
//!     .await?;
//! client.publish("sensors/a/temperature", "21.5", QoS::AtLeastOnce).await?;
//! ```

pub mod mqtt_client;
