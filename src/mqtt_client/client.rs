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

//! Client facade and event loop.
//!
//! [`MqttClient`] is a cheap-to-clone handle: every method turns into a
//! request on an unbounded channel serviced by a single spawned event-loop
//! task. The loop owns the transport, the session state, and all timers,
//! so no locking is needed anywhere in the protocol path.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::mqtt_client::backoff::Backoff;
use crate::mqtt_client::client_error::ClientError;
use crate::mqtt_client::connect_option::ConnectOption;
use crate::mqtt_client::packet::{
    CodecError, Connect, ConnectReturnCode, Packet, Puback, Publish, QoS, Subscribe,
    SubscribeFilter, SubscribeReturnCode, Unsubscribe,
};
use crate::mqtt_client::request::Request;
use crate::mqtt_client::session::{
    Completion, ConnectionState, PendingPublish, PendingSubscribe, PendingUnsubscribe,
    SessionState,
};
use crate::mqtt_client::subscription::{InboundMessage, MessageListener};
use crate::mqtt_client::topic::{validate_filter, validate_topic};
use crate::mqtt_client::transport::{Connector, TcpConnector, TlsConnector, TransportOps};

/// Granularity of the deadline sweep driving QoS 1 retransmission and
/// subscribe timeouts.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

type BoxTransport = Box<dyn TransportOps + Send>;

/// Handle to an MQTT client.
///
/// Created with [`MqttClient::new`]; no network activity happens until
/// [`connect`](MqttClient::connect). Dropping the last handle shuts the
/// event loop down cleanly.
#[derive(Clone)]
pub struct MqttClient {
    tx_send: mpsc::UnboundedSender<Request>,
}

impl MqttClient {
    /// Create a client and spawn its event loop.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(options: ConnectOption) -> Self {
        Self::spawn(options, None)
    }

    /// Create a client with a custom [`Connector`], bypassing the built-in
    /// TCP/TLS dialing. The connector is invoked for the initial connect
    /// and for every reconnect attempt.
    pub fn with_connector<C>(options: ConnectOption, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        Self::spawn(options, Some(Box::new(connector)))
    }

    fn spawn(options: ConnectOption, connector: Option<Box<dyn Connector + Send>>) -> Self {
        let (tx_send, rx_send) = mpsc::unbounded_channel();
        let event_loop = EventLoop::new(Arc::new(options), connector);
        tokio::spawn(event_loop.run(rx_send));
        Self { tx_send }
    }

    /// Establish the connection: dial, complete the TLS handshake when
    /// configured, send CONNECT, and await CONNACK.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Connect { response_tx })
            .map_err(|_| ClientError::ChannelClosed)?;
        response_rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Close the connection, failing every pending operation with
    /// [`ClientError::ConnectionClosed`]. Idempotent.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Disconnect { response_tx })
            .map_err(|_| ClientError::ChannelClosed)?;
        response_rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Subscribe to a topic filter and register a listener for matching
    /// messages. Resolves with the broker-granted QoS. Subscribing to an
    /// already-subscribed filter updates QoS and listener in place.
    pub async fn subscribe<L>(
        &self,
        filter: impl Into<String>,
        qos: QoS,
        listener: L,
    ) -> Result<QoS, ClientError>
    where
        L: MessageListener + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Subscribe {
                filter: filter.into(),
                qos,
                listener: Arc::new(listener),
                response_tx,
            })
            .map_err(|_| ClientError::ChannelClosed)?;
        response_rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Remove the subscription for `filter`. Resolves on UNSUBACK; a
    /// filter that was never subscribed resolves immediately.
    pub async fn unsubscribe(&self, filter: impl Into<String>) -> Result<(), ClientError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Unsubscribe {
                filter: filter.into(),
                response_tx,
            })
            .map_err(|_| ClientError::ChannelClosed)?;
        response_rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Publish and await the outcome: for QoS 0 the hand-off to the
    /// transport, for QoS 1 the PUBACK (or a terminal error).
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> Result<(), ClientError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::Publish {
                topic: topic.into(),
                payload: payload.into(),
                qos,
                completion: Completion::Respond(response_tx),
            })
            .map_err(|_| ClientError::ChannelClosed)?;
        response_rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Publish without blocking. The callback runs on the event-loop task
    /// once the publish resolves; it is invoked exactly once and never
    /// before this method returns.
    pub fn publish_with_callback<F>(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        callback: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce(Result<(), ClientError>) + Send + 'static,
    {
        self.tx_send
            .send(Request::Publish {
                topic: topic.into(),
                payload: payload.into(),
                qos,
                completion: Completion::Callback(Box::new(callback)),
            })
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Current connection state.
    pub async fn state(&self) -> Result<ConnectionState, ClientError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx_send
            .send(Request::State { response_tx })
            .map_err(|_| ClientError::ChannelClosed)?;
        response_rx.await.map_err(|_| ClientError::ChannelClosed)
    }
}

/// Timer events fed back into the event loop by spawned sleep tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    PingreqSend,
    PingrespRecv,
    Reconnect,
}

/// One aborting handle per timer kind.
#[derive(Default)]
struct Timers {
    pingreq_send: Option<tokio::task::JoinHandle<()>>,
    pingresp_recv: Option<tokio::task::JoinHandle<()>>,
    reconnect: Option<tokio::task::JoinHandle<()>>,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<tokio::task::JoinHandle<()>> {
        match kind {
            TimerKind::PingreqSend => &mut self.pingreq_send,
            TimerKind::PingrespRecv => &mut self.pingresp_recv,
            TimerKind::Reconnect => &mut self.reconnect,
        }
    }

    fn reset(&mut self, kind: TimerKind, delay: Duration, timer_tx: &mpsc::UnboundedSender<TimerKind>) {
        let slot = self.slot(kind);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let timer_tx = timer_tx.clone();
        *slot = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = timer_tx.send(kind);
        }));
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.slot(kind).take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel(TimerKind::PingreqSend);
        self.cancel(TimerKind::PingrespRecv);
        self.cancel(TimerKind::Reconnect);
    }
}

/// The event loop: single owner of transport, session, and timers.
struct EventLoop {
    options: Arc<ConnectOption>,
    connector: Option<Box<dyn Connector + Send>>,
    session: SessionState,
    timers: Timers,
    /// When the connection last carried a packet in either direction.
    /// PINGREQ is only due after a full keep-alive interval of silence.
    last_activity: Instant,
}

impl EventLoop {
    fn new(options: Arc<ConnectOption>, connector: Option<Box<dyn Connector + Send>>) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(options.reconnect_initial_delay_ms()),
            Duration::from_millis(options.reconnect_max_delay_ms()),
            options.reconnect_multiplier(),
        );
        Self {
            options,
            connector,
            session: SessionState::new(backoff),
            timers: Timers::default(),
            last_activity: Instant::now(),
        }
    }

    async fn run(mut self, mut rx_send: mpsc::UnboundedReceiver<Request>) {
        let mut transport: Option<BoxTransport> = None;
        let mut read_buf = BytesMut::new();
        let mut read_chunk = vec![0u8; self.options.recv_buffer_size()];
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<TimerKind>();

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                request = rx_send.recv() => {
                    match request {
                        Some(request) => {
                            self.handle_request(request, &mut transport, &mut read_buf, &timer_tx)
                                .await;
                        }
                        None => break,
                    }
                }
                Some(kind) = timer_rx.recv() => {
                    self.handle_timer(kind, &mut transport, &mut read_buf, &timer_tx).await;
                }
                _ = sweep.tick() => {
                    self.handle_sweep(&mut transport, &mut read_buf, &timer_tx).await;
                }
                recv_result = async {
                    match transport.as_mut() {
                        Some(t) => t.recv(&mut read_chunk).await,
                        None => std::future::pending().await,
                    }
                } => {
                    let outcome = match recv_result {
                        Ok(0) => Err(ClientError::ConnectionClosed),
                        Ok(n) => {
                            read_buf.extend_from_slice(&read_chunk[..n]);
                            self.last_activity = Instant::now();
                            self.process_read_buffer(&mut transport, &mut read_buf).await
                        }
                        Err(e) => Err(ClientError::Transport(e)),
                    };
                    if let Err(reason) = outcome {
                        self.connection_lost(reason, &mut transport, &mut read_buf, &timer_tx)
                            .await;
                    }
                }
            }
        }

        // Last facade handle dropped: run the close sequence and exit.
        debug!("all client handles dropped, shutting down event loop");
        self.close(&mut transport, &mut read_buf, None).await;
    }

    async fn handle_request(
        &mut self,
        request: Request,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) {
        match request {
            Request::Connect { response_tx } => {
                if self.session.state != ConnectionState::Disconnected {
                    let _ = response_tx.send(Err(ClientError::AlreadyConnected));
                    return;
                }
                if self.connector.is_none() {
                    match build_connector(&self.options) {
                        Ok(connector) => self.connector = Some(connector),
                        Err(e) => {
                            let _ = response_tx.send(Err(e));
                            return;
                        }
                    }
                }
                self.session.state = ConnectionState::Connecting;
                match self.establish().await {
                    Ok((new_transport, leftover)) => {
                        *transport = Some(new_transport);
                        *read_buf = leftover;
                        if let Err(e) = self.finish_connect(transport, timer_tx).await {
                            let _ = response_tx.send(Err(ClientError::ConnectionClosed));
                            self.connection_lost(e, transport, read_buf, timer_tx).await;
                        } else {
                            info!(
                                host = %self.options.host(),
                                port = self.options.port(),
                                client_id = %self.options.client_id(),
                                "connected"
                            );
                            let _ = response_tx.send(Ok(()));
                            // Packets that arrived in the same read as the
                            // CONNACK must be handled now, not once the next
                            // read happens to complete.
                            if let Err(e) = self.process_read_buffer(transport, read_buf).await {
                                self.connection_lost(e, transport, read_buf, timer_tx).await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "connect failed");
                        self.session.state = ConnectionState::Disconnected;
                        let _ = response_tx.send(Err(e));
                    }
                }
            }
            Request::Disconnect { response_tx } => {
                self.close(transport, read_buf, Some(response_tx)).await;
            }
            Request::Subscribe {
                filter,
                qos,
                listener,
                response_tx,
            } => {
                self.handle_subscribe(filter, qos, listener, response_tx, transport, read_buf, timer_tx)
                    .await;
            }
            Request::Unsubscribe {
                filter,
                response_tx,
            } => {
                self.handle_unsubscribe(filter, response_tx, transport, read_buf, timer_tx)
                    .await;
            }
            Request::Publish {
                topic,
                payload,
                qos,
                completion,
            } => {
                self.handle_publish(topic, payload, qos, completion, transport, read_buf, timer_tx)
                    .await;
            }
            Request::State { response_tx } => {
                let _ = response_tx.send(self.session.state);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_subscribe(
        &mut self,
        filter: String,
        qos: QoS,
        listener: Arc<dyn MessageListener>,
        response_tx: oneshot::Sender<Result<QoS, ClientError>>,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) {
        if !validate_filter(&filter) {
            let _ = response_tx.send(Err(ClientError::InvalidTopic(filter)));
            return;
        }
        if qos == QoS::ExactlyOnce {
            let _ = response_tx.send(Err(ClientError::UnsupportedQos));
            return;
        }
        if !self.session.state.is_connected() {
            let _ = response_tx.send(Err(ClientError::NotConnected));
            return;
        }
        let pkid = match self.session.packet_ids.allocate() {
            Some(pkid) => pkid,
            None => {
                let _ = response_tx.send(Err(ClientError::PacketIdExhausted));
                return;
            }
        };

        let packet = Packet::Subscribe(Subscribe {
            pkid,
            filters: vec![SubscribeFilter {
                path: filter.clone(),
                qos,
            }],
        });
        debug!(%filter, ?qos, pkid, "subscribing");
        self.session.pending_subscribes.insert(
            pkid,
            PendingSubscribe {
                filter,
                qos,
                listener: Some(listener),
                responder: Some(response_tx),
                deadline: Instant::now() + Duration::from_millis(self.options.subscribe_timeout_ms()),
            },
        );

        if let Err(e) = self.send_packet(transport, &packet).await {
            self.connection_lost(e, transport, read_buf, timer_tx).await;
        }
    }

    async fn handle_unsubscribe(
        &mut self,
        filter: String,
        response_tx: oneshot::Sender<Result<(), ClientError>>,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) {
        if !self.session.subscriptions.contains(&filter) {
            let _ = response_tx.send(Ok(()));
            return;
        }
        if !self.session.state.is_connected() {
            let _ = response_tx.send(Err(ClientError::NotConnected));
            return;
        }
        let pkid = match self.session.packet_ids.allocate() {
            Some(pkid) => pkid,
            None => {
                let _ = response_tx.send(Err(ClientError::PacketIdExhausted));
                return;
            }
        };

        let packet = Packet::Unsubscribe(Unsubscribe {
            pkid,
            topics: vec![filter.clone()],
        });
        debug!(%filter, pkid, "unsubscribing");
        self.session.pending_unsubscribes.insert(
            pkid,
            PendingUnsubscribe {
                filter,
                responder: response_tx,
                deadline: Instant::now() + Duration::from_millis(self.options.subscribe_timeout_ms()),
            },
        );

        if let Err(e) = self.send_packet(transport, &packet).await {
            self.connection_lost(e, transport, read_buf, timer_tx).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_publish(
        &mut self,
        topic: String,
        payload: Bytes,
        qos: QoS,
        completion: Completion,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) {
        if !validate_topic(&topic) {
            completion.resolve(Err(ClientError::InvalidTopic(topic)));
            return;
        }
        if qos == QoS::ExactlyOnce {
            completion.resolve(Err(ClientError::UnsupportedQos));
            return;
        }
        if !self.session.state.is_connected() {
            completion.resolve(Err(ClientError::NotConnected));
            return;
        }

        match qos {
            QoS::AtMostOnce => {
                let packet = Packet::Publish(Publish {
                    topic,
                    payload,
                    qos,
                    retain: false,
                    dup: false,
                    pkid: 0,
                });
                match self.send_packet(transport, &packet).await {
                    Ok(()) => completion.resolve(Ok(())),
                    Err(e) => {
                        completion.resolve(Err(ClientError::ConnectionClosed));
                        self.connection_lost(e, transport, read_buf, timer_tx).await;
                    }
                }
            }
            QoS::AtLeastOnce => {
                let pkid = match self.session.packet_ids.allocate() {
                    Some(pkid) => pkid,
                    None => {
                        completion.resolve(Err(ClientError::PacketIdExhausted));
                        return;
                    }
                };
                let publish = Publish {
                    topic,
                    payload,
                    qos,
                    retain: false,
                    dup: false,
                    pkid,
                };
                let packet = Packet::Publish(publish.clone());
                trace!(topic = %publish.topic, pkid, "publishing QoS 1");
                // Tracked before the send so a failed send leaves the
                // publish in flight for retransmission after reconnect.
                self.session.pending_publishes.insert(
                    pkid,
                    PendingPublish {
                        packet: publish,
                        retries_left: self.options.publish_max_retries(),
                        deadline: Instant::now()
                            + Duration::from_millis(self.options.publish_retry_interval_ms()),
                        completion,
                    },
                );
                if let Err(e) = self.send_packet(transport, &packet).await {
                    self.connection_lost(e, transport, read_buf, timer_tx).await;
                }
            }
            QoS::ExactlyOnce => unreachable!("rejected above"),
        }
    }

    async fn handle_timer(
        &mut self,
        kind: TimerKind,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) {
        match kind {
            TimerKind::PingreqSend => {
                if !self.session.state.is_connected() {
                    return;
                }
                let keep_alive = Duration::from_secs(u64::from(self.options.keep_alive_secs()));
                let idle = self.last_activity.elapsed();
                if idle < keep_alive {
                    // Traffic flowed since the timer was armed. Check again
                    // once the remainder of the quiet interval has passed.
                    self.timers
                        .reset(TimerKind::PingreqSend, keep_alive - idle, timer_tx);
                    return;
                }
                trace!("connection idle for a full keep-alive interval, sending PINGREQ");
                if let Err(e) = self.send_packet(transport, &Packet::Pingreq).await {
                    self.connection_lost(e, transport, read_buf, timer_tx).await;
                    return;
                }
                if !self.session.awaiting_pingresp {
                    self.session.awaiting_pingresp = true;
                    self.timers.reset(
                        TimerKind::PingrespRecv,
                        Duration::from_millis(self.options.pingresp_timeout_ms()),
                        timer_tx,
                    );
                }
                self.timers
                    .reset(TimerKind::PingreqSend, keep_alive, timer_tx);
            }
            TimerKind::PingrespRecv => {
                if self.session.state.is_connected() && self.session.awaiting_pingresp {
                    warn!("PINGRESP not received within grace period");
                    self.connection_lost(
                        ClientError::KeepAliveTimeout,
                        transport,
                        read_buf,
                        timer_tx,
                    )
                    .await;
                }
            }
            TimerKind::Reconnect => {
                if self.session.state != ConnectionState::Reconnecting {
                    return;
                }
                self.session.state = ConnectionState::Connecting;
                info!(attempt = self.session.backoff.attempt(), "attempting reconnect");
                match self.establish().await {
                    Ok((new_transport, leftover)) => {
                        *transport = Some(new_transport);
                        *read_buf = leftover;
                        match self.finish_connect(transport, timer_tx).await {
                            Ok(()) => {
                                info!("reconnected");
                                if let Err(e) =
                                    self.process_read_buffer(transport, read_buf).await
                                {
                                    self.connection_lost(e, transport, read_buf, timer_tx).await;
                                }
                            }
                            Err(e) => {
                                self.connection_lost(e, transport, read_buf, timer_tx).await;
                            }
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "reconnect rejected, giving up");
                        self.session.state = ConnectionState::Disconnected;
                        self.session
                            .fail_all_pending(|| ClientError::ConnectionClosed);
                    }
                    Err(e) => {
                        let delay = self.session.backoff.next_delay();
                        warn!(
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "reconnect failed, backing off"
                        );
                        self.session.state = ConnectionState::Reconnecting;
                        self.timers.reset(TimerKind::Reconnect, delay, timer_tx);
                    }
                }
            }
        }
    }

    async fn handle_sweep(
        &mut self,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) {
        let now = Instant::now();
        let retry_interval = Duration::from_millis(self.options.publish_retry_interval_ms());
        let connected = self.session.state.is_connected();

        let retransmit = self.session.sweep_publishes(now, retry_interval, connected);
        for packet in retransmit {
            debug!(pkid = packet.pkid, topic = %packet.topic, "retransmitting publish");
            if let Err(e) = self.send_packet(transport, &Packet::Publish(packet)).await {
                self.connection_lost(e, transport, read_buf, timer_tx).await;
                return;
            }
        }

        self.session.sweep_subscribes(now);
    }

    /// Dial and perform the CONNECT/CONNACK handshake, bounded by the
    /// connect timeout. Returns the transport and any bytes that arrived
    /// after the CONNACK.
    async fn establish(&mut self) -> Result<(BoxTransport, BytesMut), ClientError> {
        let connector = match self.connector.as_mut() {
            Some(connector) => connector,
            None => return Err(ClientError::NotConnected),
        };
        let connect_timeout = Duration::from_millis(self.options.connect_timeout_ms());
        let shutdown_timeout = Duration::from_millis(self.options.shutdown_timeout_ms());
        let max_packet_size = self.options.max_packet_size();

        let mut transport = timeout(connect_timeout, connector.connect())
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
            .map_err(ClientError::Transport)?;

        let connect = Packet::Connect(Connect {
            client_id: self.options.client_id().clone(),
            keep_alive: self.options.keep_alive_secs(),
            clean_session: self.options.clean_session(),
            username: self.options.username().clone(),
            password: self.options.password().clone(),
        });
        let frame = connect.to_bytes()?;
        let recv_buffer_size = self.options.recv_buffer_size();

        let handshake = timeout(connect_timeout, async {
            transport.send(&frame).await.map_err(ClientError::Transport)?;

            let mut read_buf = BytesMut::with_capacity(recv_buffer_size);
            let mut chunk = vec![0u8; recv_buffer_size];
            loop {
                let n = transport
                    .recv(&mut chunk)
                    .await
                    .map_err(ClientError::Transport)?;
                if n == 0 {
                    return Err(ClientError::ConnectionClosed);
                }
                read_buf.extend_from_slice(&chunk[..n]);

                match Packet::read(&read_buf, max_packet_size) {
                    Ok((Packet::Connack(connack), consumed)) => {
                        let _ = read_buf.split_to(consumed);
                        if connack.code == ConnectReturnCode::Accepted {
                            return Ok(read_buf);
                        }
                        return Err(ClientError::ConnectRejected(connack.code));
                    }
                    Ok((other, _)) => {
                        warn!(packet = other.type_name(), "expected CONNACK");
                        return Err(ClientError::Codec(CodecError::Malformed(
                            "expected CONNACK as first packet",
                        )));
                    }
                    Err(e) if e.is_incomplete() => continue,
                    Err(e) => return Err(ClientError::Codec(e)),
                }
            }
        })
        .await;

        match handshake {
            Ok(Ok(leftover)) => Ok((transport, leftover)),
            Ok(Err(e)) => {
                transport.shutdown(shutdown_timeout).await;
                Err(e)
            }
            Err(_) => {
                transport.shutdown(shutdown_timeout).await;
                Err(ClientError::ConnectTimeout)
            }
        }
    }

    /// Post-CONNACK setup: keep-alive timer, subscription replay, and
    /// retransmission of in-flight QoS 1 publishes.
    async fn finish_connect(
        &mut self,
        transport: &mut Option<BoxTransport>,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) -> Result<(), ClientError> {
        self.session.state = ConnectionState::Connected;
        self.session.backoff.reset();
        self.session.awaiting_pingresp = false;
        self.last_activity = Instant::now();
        self.timers.cancel(TimerKind::Reconnect);

        if self.options.keep_alive_secs() > 0 {
            self.timers.reset(
                TimerKind::PingreqSend,
                Duration::from_secs(u64::from(self.options.keep_alive_secs())),
                timer_tx,
            );
        }

        let subscribe_deadline =
            Instant::now() + Duration::from_millis(self.options.subscribe_timeout_ms());
        for filter in self.session.subscriptions.replay_filters() {
            let pkid = match self.session.packet_ids.allocate() {
                Some(pkid) => pkid,
                None => return Err(ClientError::PacketIdExhausted),
            };
            debug!(filter = %filter.path, pkid, "replaying subscription");
            let packet = Packet::Subscribe(Subscribe {
                pkid,
                filters: vec![filter.clone()],
            });
            self.session.pending_subscribes.insert(
                pkid,
                PendingSubscribe {
                    filter: filter.path,
                    qos: filter.qos,
                    listener: None,
                    responder: None,
                    deadline: subscribe_deadline,
                },
            );
            self.send_packet(transport, &packet).await?;
        }

        let retry_interval = Duration::from_millis(self.options.publish_retry_interval_ms());
        for publish in self.session.retransmission_set(Instant::now(), retry_interval) {
            debug!(pkid = publish.pkid, "retransmitting in-flight publish");
            self.send_packet(transport, &Packet::Publish(publish)).await?;
        }

        Ok(())
    }

    async fn send_packet(
        &mut self,
        transport: &mut Option<BoxTransport>,
        packet: &Packet,
    ) -> Result<(), ClientError> {
        let t = transport.as_mut().ok_or(ClientError::NotConnected)?;
        let frame = packet.to_bytes()?;
        trace!(packet = packet.type_name(), len = frame.len(), "sending");
        t.send(&frame).await.map_err(ClientError::Transport)?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Drain complete packets out of the read buffer and handle them.
    async fn process_read_buffer(
        &mut self,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
    ) -> Result<(), ClientError> {
        loop {
            if read_buf.is_empty() {
                return Ok(());
            }
            match Packet::read(read_buf, self.options.max_packet_size()) {
                Ok((packet, consumed)) => {
                    let _ = read_buf.split_to(consumed);
                    trace!(packet = packet.type_name(), consumed, "received");
                    self.handle_packet(packet, transport).await?;
                }
                Err(e) if e.is_incomplete() => return Ok(()),
                Err(e) => {
                    error!(error = %e, "malformed inbound packet");
                    return Err(ClientError::Codec(e));
                }
            }
        }
    }

    async fn handle_packet(
        &mut self,
        packet: Packet,
        transport: &mut Option<BoxTransport>,
    ) -> Result<(), ClientError> {
        match packet {
            Packet::Publish(publish) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos: publish.qos,
                    pkid: publish.pkid,
                };
                let delivered = self.session.subscriptions.dispatch(&message);
                trace!(topic = %message.topic, delivered, "dispatched inbound publish");
                if message.qos == QoS::AtLeastOnce {
                    self.send_packet(transport, &Packet::Puback(Puback { pkid: message.pkid })).await?;
                }
                Ok(())
            }
            Packet::Puback(puback) => {
                if let Some(completion) = self.session.take_puback(puback.pkid) {
                    debug!(pkid = puback.pkid, "publish acknowledged");
                    completion.resolve(Ok(()));
                }
                Ok(())
            }
            Packet::Suback(suback) => {
                let Some(pending) = self.session.take_suback(suback.pkid) else {
                    trace!(pkid = suback.pkid, "SUBACK for unknown packet id, ignoring");
                    return Ok(());
                };
                match suback.return_codes.first() {
                    Some(SubscribeReturnCode::Success(granted)) => {
                        let granted = *granted;
                        match pending.listener {
                            Some(listener) => {
                                self.session
                                    .subscriptions
                                    .insert(pending.filter, granted, listener);
                            }
                            None => {
                                self.session.subscriptions.update_qos(&pending.filter, granted);
                            }
                        }
                        if let Some(responder) = pending.responder {
                            let _ = responder.send(Ok(granted));
                        }
                    }
                    Some(SubscribeReturnCode::Failure) | None => {
                        warn!(filter = %pending.filter, "subscription rejected by broker");
                        if pending.listener.is_none() {
                            // Replay rejection: the entry no longer holds.
                            self.session.subscriptions.remove(&pending.filter);
                        }
                        if let Some(responder) = pending.responder {
                            let _ = responder.send(Err(ClientError::SubscriptionRejected));
                        }
                    }
                }
                Ok(())
            }
            Packet::Unsuback(unsuback) => {
                if let Some(pending) = self.session.take_unsuback(unsuback.pkid) {
                    self.session.subscriptions.remove(&pending.filter);
                    debug!(filter = %pending.filter, "unsubscribed");
                    let _ = pending.responder.send(Ok(()));
                }
                Ok(())
            }
            Packet::Pingresp => {
                trace!("PINGRESP received");
                self.session.awaiting_pingresp = false;
                self.timers.cancel(TimerKind::PingrespRecv);
                Ok(())
            }
            Packet::Disconnect => {
                info!("broker sent DISCONNECT");
                Err(ClientError::ConnectionClosed)
            }
            other => {
                warn!(packet = other.type_name(), "unexpected packet from broker");
                Err(ClientError::Codec(CodecError::Malformed(
                    "server-bound packet received from broker",
                )))
            }
        }
    }

    /// Tear the connection down after a failure. Retryable losses move to
    /// `Reconnecting` with backoff; fatal rejections stay down.
    async fn connection_lost(
        &mut self,
        reason: ClientError,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        timer_tx: &mpsc::UnboundedSender<TimerKind>,
    ) {
        if matches!(
            self.session.state,
            ConnectionState::Disconnected | ConnectionState::Closing
        ) {
            return;
        }
        warn!(error = %reason, state = %self.session.state, "connection lost");

        if let Some(mut t) = transport.take() {
            t.shutdown(Duration::from_millis(self.options.shutdown_timeout_ms()))
                .await;
        }
        read_buf.clear();
        self.timers.cancel(TimerKind::PingreqSend);
        self.timers.cancel(TimerKind::PingrespRecv);
        self.session.awaiting_pingresp = false;
        self.session
            .fail_pending_requests(|| ClientError::NotConnected);

        if reason.is_fatal() {
            self.session.state = ConnectionState::Disconnected;
            self.session
                .fail_all_pending(|| ClientError::ConnectionClosed);
        } else {
            self.session.state = ConnectionState::Reconnecting;
            let delay = self.session.backoff.next_delay();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.session.backoff.attempt(),
                "scheduling reconnect"
            );
            self.timers.reset(TimerKind::Reconnect, delay, timer_tx);
        }
    }

    /// Clean shutdown: best-effort DISCONNECT, graceful transport close,
    /// and failure of everything pending with `ConnectionClosed`.
    async fn close(
        &mut self,
        transport: &mut Option<BoxTransport>,
        read_buf: &mut BytesMut,
        response_tx: Option<oneshot::Sender<Result<(), ClientError>>>,
    ) {
        if self.session.state == ConnectionState::Disconnected && transport.is_none() {
            if let Some(response_tx) = response_tx {
                let _ = response_tx.send(Ok(()));
            }
            return;
        }

        self.session.state = ConnectionState::Closing;
        self.timers.cancel_all();

        if let Some(mut t) = transport.take() {
            match Packet::Disconnect.to_bytes() {
                Ok(frame) => {
                    if let Err(e) = t.send(&frame).await {
                        trace!(error = %e, "DISCONNECT send failed during close");
                    }
                }
                Err(e) => trace!(error = %e, "DISCONNECT encode failed"),
            }
            t.shutdown(Duration::from_millis(self.options.shutdown_timeout_ms()))
                .await;
        }
        read_buf.clear();
        self.session.awaiting_pingresp = false;
        self.session
            .fail_all_pending(|| ClientError::ConnectionClosed);
        self.session.state = ConnectionState::Disconnected;
        info!("disconnected");

        if let Some(response_tx) = response_tx {
            let _ = response_tx.send(Ok(()));
        }
    }
}

fn build_connector(options: &ConnectOption) -> Result<Box<dyn Connector + Send>, ClientError> {
    let connect_timeout = Duration::from_millis(options.connect_timeout_ms());
    match options.tls() {
        Some(tls) => {
            let connector = TlsConnector::from_options(
                options.host().clone(),
                options.port(),
                tls,
                connect_timeout,
            )
            .map_err(ClientError::Transport)?;
            Ok(Box::new(connector))
        }
        None => Ok(Box::new(TcpConnector::new(
            options.host().clone(),
            options.port(),
            connect_timeout,
        ))),
    }
}

