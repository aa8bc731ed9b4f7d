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

//! Connection configuration.

use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use std::path::PathBuf;

/// TLS settings for a broker connection.
///
/// # Examples
///
/// ```ignore
/// let tls = TlsOption::builder()
///     .ca_file("AmazonRootCA1.pem")
///     .cert_file("device.pem.crt")
///     .key_file("device.private.key")
///     .build()?;
/// ```
#[derive(Debug, Clone, Builder, Getters)]
#[builder(derive(Debug), pattern = "owned", setter(into))]
pub struct TlsOption {
    /// PEM file with the CA certificate(s) used to verify the broker.
    ///
    /// # Default
    /// None (the `webpki-roots` bundle is used)
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    ca_file: Option<PathBuf>,

    /// PEM file with the client certificate chain for mutual TLS.
    /// Must be configured together with `key_file`.
    ///
    /// # Default
    /// None (no client authentication)
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    cert_file: Option<PathBuf>,

    /// PEM file with the client private key for mutual TLS.
    ///
    /// # Default
    /// None (no client authentication)
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    key_file: Option<PathBuf>,

    /// Server name used for SNI and certificate verification.
    ///
    /// # Default
    /// None (the broker host name is used)
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    server_name: Option<String>,
}

impl TlsOption {
    pub fn builder() -> TlsOptionBuilder {
        TlsOptionBuilder::default()
    }
}

/// Options controlling connection establishment, keep-alive, publish
/// retransmission, and reconnect backoff.
///
/// # Examples
///
/// ```ignore
/// let options = ConnectOption::builder()
///     .host("broker.example.com")
///     .port(8883u16)
///     .client_id("sdk-java")
///     .keep_alive_secs(30u16)
///     .tls(tls_option)
///     .build()?;
/// ```
#[derive(Debug, Clone, Builder, Getters, CopyGetters)]
#[builder(derive(Debug), pattern = "owned", setter(into))]
pub struct ConnectOption {
    /// Broker host name or IP address.
    #[getset(get = "pub")]
    host: String,

    /// Broker port.
    ///
    /// # Default
    /// 1883
    #[builder(default = "1883")]
    #[getset(get_copy = "pub")]
    port: u16,

    /// Client identifier sent in CONNECT.
    #[getset(get = "pub")]
    client_id: String,

    /// Clean session flag sent in CONNECT.
    ///
    /// # Default
    /// true
    #[builder(default = "true")]
    #[getset(get_copy = "pub")]
    clean_session: bool,

    /// Optional user name sent in CONNECT.
    ///
    /// # Default
    /// None
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    username: Option<String>,

    /// Optional password sent in CONNECT.
    ///
    /// # Default
    /// None
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    password: Option<Vec<u8>>,

    /// Keep-alive interval in seconds. When this much time passes with no
    /// outbound activity a PINGREQ is sent. A value of 0 disables
    /// keep-alive.
    ///
    /// # Default
    /// 60
    #[builder(default = "60")]
    #[getset(get_copy = "pub")]
    keep_alive_secs: u16,

    /// Maximum time to wait for PINGRESP after a PINGREQ, in
    /// milliseconds. Expiry tears the connection down.
    ///
    /// # Default
    /// 10000 (10 seconds)
    #[builder(default = "10_000")]
    #[getset(get_copy = "pub")]
    pingresp_timeout_ms: u64,

    /// Maximum time for connection establishment, covering the dial, the
    /// TLS handshake, and CONNACK reception, in milliseconds.
    ///
    /// # Default
    /// 10000 (10 seconds)
    #[builder(default = "10_000")]
    #[getset(get_copy = "pub")]
    connect_timeout_ms: u64,

    /// Maximum time to wait for SUBACK/UNSUBACK, in milliseconds.
    ///
    /// # Default
    /// 10000 (10 seconds)
    #[builder(default = "10_000")]
    #[getset(get_copy = "pub")]
    subscribe_timeout_ms: u64,

    /// Time a QoS 1 publish waits for PUBACK before a retransmission, in
    /// milliseconds.
    ///
    /// # Default
    /// 5000 (5 seconds)
    #[builder(default = "5_000")]
    #[getset(get_copy = "pub")]
    publish_retry_interval_ms: u64,

    /// Number of retransmissions a QoS 1 publish is allowed before it
    /// fails with a publish timeout.
    ///
    /// # Default
    /// 3
    #[builder(default = "3")]
    #[getset(get_copy = "pub")]
    publish_max_retries: u32,

    /// Initial reconnect backoff delay in milliseconds.
    ///
    /// # Default
    /// 1000 (1 second)
    #[builder(default = "1_000")]
    #[getset(get_copy = "pub")]
    reconnect_initial_delay_ms: u64,

    /// Maximum reconnect backoff delay in milliseconds.
    ///
    /// # Default
    /// 60000 (60 seconds)
    #[builder(default = "60_000")]
    #[getset(get_copy = "pub")]
    reconnect_max_delay_ms: u64,

    /// Multiplier applied to the reconnect delay after each failed
    /// attempt.
    ///
    /// # Default
    /// 2.0
    #[builder(default = "2.0")]
    #[getset(get_copy = "pub")]
    reconnect_multiplier: f64,

    /// Maximum time for the graceful shutdown of the transport, in
    /// milliseconds.
    ///
    /// # Default
    /// 5000 (5 seconds)
    #[builder(default = "5_000")]
    #[getset(get_copy = "pub")]
    shutdown_timeout_ms: u64,

    /// Size of the transport read buffer in bytes.
    ///
    /// # Default
    /// 4096
    #[builder(default = "4096")]
    #[getset(get_copy = "pub")]
    recv_buffer_size: usize,

    /// Upper bound on a single inbound packet's total size in bytes.
    ///
    /// # Default
    /// 1 MiB
    #[builder(default = "crate::mqtt_client::packet::DEFAULT_MAX_PACKET_SIZE")]
    #[getset(get_copy = "pub")]
    max_packet_size: usize,

    /// TLS settings. When present the connection uses TLS.
    ///
    /// # Default
    /// None (plain TCP)
    #[builder(default, setter(into, strip_option))]
    #[getset(get = "pub")]
    tls: Option<TlsOption>,
}

impl ConnectOption {
    pub fn builder() -> ConnectOptionBuilder {
        ConnectOptionBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let options = ConnectOption::builder()
            .host("localhost")
            .client_id("c1")
            .build()
            .unwrap();

        assert_eq!(options.port(), 1883);
        assert_eq!(options.keep_alive_secs(), 60);
        assert!(options.clean_session());
        assert_eq!(options.publish_max_retries(), 3);
        assert!(options.tls().is_none());
    }

    #[test]
    fn missing_host_fails_build() {
        assert!(ConnectOption::builder().client_id("c1").build().is_err());
    }

    #[test]
    fn tls_option_builder() {
        let tls = TlsOption::builder()
            .ca_file("ca.pem")
            .cert_file("client.crt")
            .key_file("client.key")
            .server_name("broker.example.com")
            .build()
            .unwrap();

        assert!(tls.ca_file().is_some());
        assert_eq!(tls.server_name().as_deref(), Some("broker.example.com"));
    }
}
