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
//! Publish and subscribe round trips against a stub broker: SUBACK
//! grants, listener dispatch, auto-PUBACK, and unsubscribe.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Duration;

use mqtt_client_tokio::mqtt_client::packet::{
    Connack, ConnectReturnCode, Packet, Puback, Publish, Suback, SubscribeReturnCode, Unsuback,
};
use mqtt_client_tokio::mqtt_client::{
    ClientError, ConnectOption, InboundMessage, MqttClient, QoS,
};

mod common;

use stub_transport::{wait_for_sent, StubConnector, StubTransport};

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

async fn connected_client(stub: &StubTransport) -> MqttClient {
    stub.push_recv_packet(&connack_accepted());
    let client = MqttClient::with_connector(options(), StubConnector::new(vec![stub.clone()]));
    client.connect().await.unwrap();
    client
}

/// Drive a subscribe to completion: answer the SUBSCRIBE on the wire with
/// a SUBACK granting `granted` and return the result.
async fn subscribe_granted(
    client: &MqttClient,
    stub: &StubTransport,
    filter: &str,
    qos: QoS,
    tx: mpsc::UnboundedSender<InboundMessage>,
) -> Result<QoS, ClientError> {
    let handle = tokio::spawn({
        let client = client.clone();
        let filter = filter.to_string();
        async move {
            client
                .subscribe(filter, qos, move |message: &InboundMessage| {
                    let _ = tx.send(message.clone());
                })
                .await
        }
    });

    let sent = wait_for_sent(stub, |p| matches!(p, Packet::Subscribe(_))).await;
    let Packet::Subscribe(subscribe) = sent else {
        unreachable!()
    };
    assert_eq!(subscribe.filters.len(), 1);
    assert_eq!(subscribe.filters[0].path, filter);
    stub.push_recv_packet(&Packet::Suback(Suback {
        pkid: subscribe.pkid,
        return_codes: vec![SubscribeReturnCode::Success(qos)],
    }));

    handle.await.unwrap()
}

#[tokio::test]
async fn subscribe_delivers_matching_messages_and_pubacks() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let granted = subscribe_granted(&client, &stub, "sensors/+/temp", QoS::AtLeastOnce, tx)
        .await
        .unwrap();
    assert_eq!(granted, QoS::AtLeastOnce);

    stub.push_recv_packet(&Packet::Publish(Publish {
        topic: "sensors/a/temp".to_string(),
        payload: Bytes::from_static(b"21.5"),
        qos: QoS::AtLeastOnce,
        retain: false,
        dup: false,
        pkid: 9,
    }));

    let message = rx.recv().await.unwrap();
    assert_eq!(message.topic, "sensors/a/temp");
    assert_eq!(&message.payload[..], b"21.5");
    assert_eq!(message.qos, QoS::AtLeastOnce);

    // QoS 1 inbound publishes are acknowledged automatically
    let puback = wait_for_sent(&stub, |p| matches!(p, Packet::Puback(_))).await;
    assert_eq!(puback, Packet::Puback(Puback { pkid: 9 }));
}

#[tokio::test]
async fn qos0_publish_resolves_on_send() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    client
        .publish("status/online", "1", QoS::AtMostOnce)
        .await
        .unwrap();

    let sent = wait_for_sent(&stub, |p| matches!(p, Packet::Publish(_))).await;
    let Packet::Publish(publish) = sent else {
        unreachable!()
    };
    assert_eq!(publish.topic, "status/online");
    assert_eq!(publish.qos, QoS::AtMostOnce);
    assert_eq!(publish.pkid, 0);
    assert!(!publish.dup);
}

#[tokio::test]
async fn qos1_publish_resolves_on_puback() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    let handle = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .publish("alerts/high", "overheating", QoS::AtLeastOnce)
                .await
        }
    });

    let sent = wait_for_sent(&stub, |p| matches!(p, Packet::Publish(_))).await;
    let Packet::Publish(publish) = sent else {
        unreachable!()
    };
    assert_eq!(publish.qos, QoS::AtLeastOnce);
    assert_ne!(publish.pkid, 0);

    stub.push_recv_packet(&Packet::Puback(Puback { pkid: publish.pkid }));
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    subscribe_granted(&client, &stub, "news/#", QoS::AtMostOnce, tx)
        .await
        .unwrap();

    let handle = tokio::spawn({
        let client = client.clone();
        async move { client.unsubscribe("news/#").await }
    });
    let sent = wait_for_sent(&stub, |p| matches!(p, Packet::Unsubscribe(_))).await;
    let Packet::Unsubscribe(unsubscribe) = sent else {
        unreachable!()
    };
    assert_eq!(unsubscribe.topics, vec!["news/#".to_string()]);
    stub.push_recv_packet(&Packet::Unsuback(Unsuback {
        pkid: unsubscribe.pkid,
    }));
    handle.await.unwrap().unwrap();

    // Messages on the removed filter no longer reach the listener
    stub.push_recv_packet(&Packet::Publish(Publish {
        topic: "news/today".to_string(),
        payload: Bytes::from_static(b"x"),
        qos: QoS::AtMostOnce,
        retain: false,
        dup: false,
        pkid: 0,
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribe_unknown_filter_is_a_no_op() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    client.unsubscribe("never/subscribed").await.unwrap();
    assert!(!stub
        .sent_packets()
        .iter()
        .any(|p| matches!(p, Packet::Unsubscribe(_))));
}

#[tokio::test]
async fn subscribe_invalid_filter_is_rejected_locally() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    let err = client
        .subscribe("a/#/b", QoS::AtMostOnce, |_: &InboundMessage| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidTopic(_)));
    assert!(!stub
        .sent_packets()
        .iter()
        .any(|p| matches!(p, Packet::Subscribe(_))));
}

#[tokio::test]
async fn subscription_rejected_by_broker() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    let handle = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .subscribe("forbidden/topic", QoS::AtMostOnce, |_: &InboundMessage| {})
                .await
        }
    });

    let sent = wait_for_sent(&stub, |p| matches!(p, Packet::Subscribe(_))).await;
    let Packet::Subscribe(subscribe) = sent else {
        unreachable!()
    };
    stub.push_recv_packet(&Packet::Suback(Suback {
        pkid: subscribe.pkid,
        return_codes: vec![SubscribeReturnCode::Failure],
    }));

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::SubscriptionRejected));
}

#[tokio::test]
async fn qos2_publish_is_unsupported() {
    common::init_tracing();

    let stub = StubTransport::new();
    let client = connected_client(&stub).await;

    let err = client
        .publish("some/topic", "x", QoS::ExactlyOnce)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedQos));
}
