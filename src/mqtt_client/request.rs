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

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::mqtt_client::client_error::ClientError;
use crate::mqtt_client::packet::QoS;
use crate::mqtt_client::session::{Completion, ConnectionState};
use crate::mqtt_client::subscription::MessageListener;

/// Requests sent from the facade to the event loop. Responses travel back
/// on the embedded oneshot channels; publish completions use
/// [`Completion`] so callbacks and responders share one path.
pub(crate) enum Request {
    Connect {
        response_tx: oneshot::Sender<Result<(), ClientError>>,
    },
    Disconnect {
        response_tx: oneshot::Sender<Result<(), ClientError>>,
    },
    Subscribe {
        filter: String,
        qos: QoS,
        listener: Arc<dyn MessageListener>,
        response_tx: oneshot::Sender<Result<QoS, ClientError>>,
    },
    Unsubscribe {
        filter: String,
        response_tx: oneshot::Sender<Result<(), ClientError>>,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        completion: Completion,
    },
    State {
        response_tx: oneshot::Sender<ConnectionState>,
    },
}
