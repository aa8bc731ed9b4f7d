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

//! Transport layer abstractions for MQTT connections.
//!
//! Built-in transports cover plain TCP and TLS (with optional mutual TLS).
//! Custom transports plug in by implementing [`TransportOps`]; custom
//! connection establishment plugs in by implementing [`Connector`], which
//! the event loop calls for every connect and reconnect attempt.

pub mod connect_helper;
mod tcp;
mod tls;

pub use tcp::{TcpConnector, TcpTransport};
pub use tls::{TlsConnector, TlsTransport};

use std::future::Future;
use std::pin::Pin;
use tokio::time::Duration;

/// Error produced by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying socket I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(Box<dyn std::error::Error + Send + Sync>),

    /// The operation did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Connection establishment failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,
}

/// Async byte-stream operations required of every transport.
///
/// Implementations must be cancel-safe in `recv`: the event loop polls it
/// inside `tokio::select!` and may drop the future between reads.
pub trait TransportOps {
    /// Send the whole frame, handling partial writes internally.
    fn send<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    /// Read available bytes into `buffer`. Returns the number of bytes
    /// read; 0 signals an orderly close by the peer.
    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>>;

    /// Gracefully shut the connection down, bounded by `timeout`. After
    /// the timeout the connection is dropped hard.
    fn shutdown<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

impl TransportOps for Box<dyn TransportOps + Send> {
    fn send<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        (**self).send(frame)
    }

    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>> {
        (**self).recv(buffer)
    }

    fn shutdown<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        (**self).shutdown(timeout)
    }
}

/// Factory producing a fresh transport for each connection attempt.
///
/// The event loop owns one connector for the lifetime of the client and
/// invokes it on `connect()` and on every reconnect attempt.
pub trait Connector: Send {
    fn connect(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TransportOps + Send>, TransportError>> + Send + '_>>;
}
