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

use super::{connect_helper, Connector, TransportError, TransportOps};
use crate::mqtt_client::connect_option::TlsOption;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use tokio_rustls::rustls::ClientConfig;

/// Trait alias for streams usable inside [`TlsTransport`].
pub trait TlsStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}

impl<T> TlsStream for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}

/// TLS transport over TCP.
///
/// Wraps an already established TLS stream; connection establishment and
/// certificate handling live in [`TlsConnector`] and [`connect_helper`].
pub struct TlsTransport {
    stream: Box<dyn TlsStream>,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("stream", &"<tls stream>")
            .finish()
    }
}

impl TlsTransport {
    /// Create a transport from an established TLS stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: TlsStream + 'static,
    {
        Self {
            stream: Box::new(stream),
        }
    }
}

impl TransportOps for TlsTransport {
    fn send<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.stream.write_all(frame).await?;
            self.stream.flush().await?;
            Ok(())
        })
    }

    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>> {
        Box::pin(async move { self.stream.read(buffer).await.map_err(TransportError::Io) })
    }

    fn shutdown<'a>(
        &'a mut self,
        timeout_duration: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            // close_notify then socket shutdown, bounded by the timeout
            let _ = timeout(timeout_duration, self.stream.shutdown()).await;
        })
    }
}

/// Connector dialing a TLS endpoint, optionally with client-certificate
/// authentication.
pub struct TlsConnector {
    host: String,
    port: u16,
    server_name: String,
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
}

impl TlsConnector {
    /// Build a connector from the TLS options. Reads the configured CA and
    /// client certificate files once, up front.
    pub fn from_options(
        host: impl Into<String>,
        port: u16,
        tls: &TlsOption,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let host = host.into();
        let server_name = tls
            .server_name()
            .clone()
            .unwrap_or_else(|| host.clone());
        let config = connect_helper::build_client_tls_config(tls)?;

        Ok(Self {
            host,
            port,
            server_name,
            config,
            connect_timeout,
        })
    }
}

impl Connector for TlsConnector {
    fn connect(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TransportOps + Send>, TransportError>> + Send + '_>>
    {
        Box::pin(async move {
            let stream = connect_helper::connect_tcp_tls(
                &self.host,
                self.port,
                &self.server_name,
                self.config.clone(),
                self.connect_timeout,
            )
            .await?;
            Ok(Box::new(TlsTransport::from_stream(stream)) as Box<dyn TransportOps + Send>)
        })
    }
}
