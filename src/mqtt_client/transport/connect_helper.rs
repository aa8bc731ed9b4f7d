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

//! Connection establishment helpers for TCP and TLS.
//!
//! TLS configuration uses rustls with pki-types: roots come from a PEM CA
//! file when configured, otherwise from `webpki-roots`; a client
//! certificate/key pair enables mutual TLS.

use super::TransportError;
use crate::mqtt_client::connect_option::TlsOption;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// Dial a TCP endpoint within `connect_timeout`.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let addr = format!("{host}:{port}");
    let stream = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Connect(format!("TCP connect to {addr} failed: {e}")))?;

    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Dial a TCP endpoint and complete a TLS handshake, all within
/// `connect_timeout`.
pub async fn connect_tcp_tls(
    host: &str,
    port: u16,
    server_name: &str,
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let tcp_stream = connect_tcp(host, port, connect_timeout).await?;

    let domain = ServerName::try_from(server_name.to_string())
        .map_err(|e| TransportError::Connect(format!("invalid server name {server_name}: {e}")))?;

    let connector = tokio_rustls::TlsConnector::from(config);
    let tls_stream = timeout(connect_timeout, connector.connect(domain, tcp_stream))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Tls(Box::new(e)))?;

    Ok(tls_stream)
}

/// Build a rustls client config from the TLS options.
pub fn build_client_tls_config(tls: &TlsOption) -> Result<Arc<ClientConfig>, TransportError> {
    let roots = match tls.ca_file() {
        Some(path) => load_ca_roots(path)?,
        None => RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
    };

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let config = match (tls.cert_file(), tls.key_file()) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| TransportError::Tls(Box::new(e)))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(TransportError::Connect(
                "client certificate and key must be configured together".to_string(),
            ))
        }
    };

    Ok(Arc::new(config))
}

fn load_ca_roots(path: &Path) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(Box::new(e)))?;
    }

    if roots.is_empty() {
        return Err(TransportError::Connect(format!(
            "no CA certificates found in {}",
            path.display()
        )));
    }

    Ok(roots)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path).map_err(|e| {
        TransportError::Connect(format!("cannot open certificate {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TransportError::Connect(format!("cannot parse certificate {}: {e}", path.display()))
        })?;

    if certs.is_empty() {
        return Err(TransportError::Connect(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path).map_err(|e| {
        TransportError::Connect(format!("cannot open private key {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            TransportError::Connect(format!("cannot parse private key {}: {e}", path.display()))
        })?
        .ok_or_else(|| {
            TransportError::Connect(format!("no private key found in {}", path.display()))
        })
}
