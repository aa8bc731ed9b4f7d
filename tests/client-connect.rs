/*
 * MIT License
 *
 * Copyright (c) 2025 Takatoshi Kondo
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */
//! Connection establishment tests: CONNECT/CONNACK handshake, rejection
//! handling, and state transitions.

use bytes::Bytes;

use mqtt_client_tokio::mqtt_client::packet::{
    Connack, ConnectReturnCode, Packet, Puback, Publish,
};
use mqtt_client_tokio::mqtt_client::{
    ClientError, ConnectOption, ConnectionState, InboundMessage, MqttClient, QoS,
};

mod common;

use stub_transport::{StubConnector, StubTransport};

fn options() -> ConnectOption {
    ConnectOption::builder()
        .host("stub")
        .client_id("test-client")
        .build()
        .unwrap()
}

fn connack_accepted() -> Packet {
    Packet::Connack(Connack {
        session_present: false,
        code: ConnectReturnCode::Accepted,
    })
}

#[tokio::test]
async fn connect_completes_on_connack() {
    common::init_tracing();

    let stub = StubTransport::new();
    stub.push_recv_packet(&connack_accepted());

    let client = MqttClient::with_connector(options(), StubConnector::new(vec![stub.clone()]));
    client.connect().await.unwrap();
    assert_eq!(client.state().await.unwrap(), ConnectionState::Connected);

    let sent = stub.sent_packets();
    match &sent[0] {
        Packet::Connect(connect) => {
            assert_eq!(connect.client_id, "test-client");
            assert!(connect.clean_session);
            assert_eq!(connect.keep_alive, 60);
            assert!(connect.username.is_none());
        }
        other => panic!("expected CONNECT first, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_sends_credentials_when_configured() {
    common::init_tracing();

    let stub = StubTransport::new();
    stub.push_recv_packet(&connack_accepted());

    let options = ConnectOption::builder()
        .host("stub")
        .client_id("test-client")
        .username("device-7")
        .password(b"hunter2".to_vec())
        .build()
        .unwrap();
    let client = MqttClient::with_connector(options, StubConnector::new(vec![stub.clone()]));
    client.connect().await.unwrap();

    match &stub.sent_packets()[0] {
        Packet::Connect(connect) => {
            assert_eq!(connect.username.as_deref(), Some("device-7"));
            assert_eq!(connect.password.as_deref(), Some(&b"hunter2"[..]));
        }
        other => panic!("expected CONNECT first, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_rejected_is_returned_to_caller() {
    common::init_tracing();

    let stub = StubTransport::new();
    stub.push_recv_packet(&Packet::Connack(Connack {
        session_present: false,
        code: ConnectReturnCode::NotAuthorized,
    }));

    let client = MqttClient::with_connector(options(), StubConnector::new(vec![stub]));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectRejected(ConnectReturnCode::NotAuthorized)
    ));
    assert_eq!(client.state().await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_while_connected_is_rejected() {
    common::init_tracing();

    let stub = StubTransport::new();
    stub.push_recv_packet(&connack_accepted());

    let client = MqttClient::with_connector(options(), StubConnector::new(vec![stub]));
    client.connect().await.unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::AlreadyConnected));
    assert_eq!(client.state().await.unwrap(), ConnectionState::Connected);
}

#[tokio::test]
async fn operations_require_a_connection() {
    common::init_tracing();

    let client = MqttClient::with_connector(options(), StubConnector::new(vec![]));
    assert_eq!(client.state().await.unwrap(), ConnectionState::Disconnected);

    let err = client
        .publish("some/topic", "payload", QoS::AtMostOnce)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));

    let err = client
        .subscribe("some/topic", QoS::AtMostOnce, |_: &InboundMessage| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn connect_times_out_without_connack() {
    common::init_tracing();

    // Transport connects but the broker never answers the CONNECT.
    let stub = StubTransport::new();
    let options = ConnectOption::builder()
        .host("stub")
        .client_id("test-client")
        .connect_timeout_ms(100u64)
        .build()
        .unwrap();
    let client = MqttClient::with_connector(options, StubConnector::new(vec![stub]));

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectTimeout));
    assert_eq!(client.state().await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn packets_coalesced_with_connack_are_handled_immediately() {
    common::init_tracing();

    // The broker's first flush carries the CONNACK and a QoS 1 PUBLISH in a
    // single read. The trailing packet must be handled right after the
    // handshake, not parked until the next read delivers more bytes.
    let stub = StubTransport::new();
    let mut frame = connack_accepted().to_bytes().unwrap();
    frame.extend(
        Packet::Publish(Publish {
            topic: "alerts/boot".to_string(),
            payload: Bytes::from_static(b"up"),
            qos: QoS::AtLeastOnce,
            retain: false,
            dup: false,
            pkid: 7,
        })
        .to_bytes()
        .unwrap(),
    );
    stub.push_recv(frame);

    let client = MqttClient::with_connector(options(), StubConnector::new(vec![stub.clone()]));
    client.connect().await.unwrap();

    // No further inbound data: the auto-PUBACK proves the buffered PUBLISH
    // was drained as part of connecting.
    let puback =
        stub_transport::wait_for_sent(&stub, |p| matches!(p, Packet::Puback(_))).await;
    assert_eq!(puback, Packet::Puback(Puback { pkid: 7 }));
}

#[tokio::test]
async fn connack_split_across_reads_is_reassembled() {
    common::init_tracing();

    let stub = StubTransport::new();
    let frame = connack_accepted().to_bytes().unwrap();
    let (head, tail) = frame.split_at(2);
    stub.push_recv(head.to_vec());
    stub.push_recv(tail.to_vec());

    let client = MqttClient::with_connector(options(), StubConnector::new(vec![stub]));
    client.connect().await.unwrap();
    assert_eq!(client.state().await.unwrap(), ConnectionState::Connected);
}
