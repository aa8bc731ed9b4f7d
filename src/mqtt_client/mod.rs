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

pub mod backoff;
pub mod client;
pub mod client_error;
pub mod connect_option;
pub mod packet;
pub mod session;
pub mod subscription;
pub mod topic;
pub mod transport;

mod request;

pub use backoff::Backoff;
pub use client::MqttClient;
pub use client_error::ClientError;
pub use connect_option::{ConnectOption, TlsOption};
pub use packet::{ConnectReturnCode, Packet, QoS, SubscribeReturnCode};
pub use session::ConnectionState;
pub use subscription::{InboundMessage, MessageListener};
pub use topic::{topic_matches, validate_filter, validate_topic};
pub use transport::{Connector, TransportError, TransportOps};
