/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! WebSocket connection to the pub/sub broker.

use super::PubSubCommand;
use super::PubSubDelivery;
use crate::ConnectorError;
use crate::ConnectorErrorKind;
use crate::authentication::ApiTokenCache;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Duration;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tyst::Tyst;
use tyst::encdec::hex::ToHex;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketConnection {
    ws_write_stream: Mutex<SplitSink<WsStream, Message>>,
    termination_semaphore: Semaphore,
}

impl WebSocketConnection {
    /// Interval between keep-alive pings.
    const PING_INTERVAL: Duration = Duration::from_secs(5);

    /// Connect and start forwarding deliveries to `tx`.
    ///
    /// `tx` is dropped when the connection terminates.
    pub async fn connect(
        url: &str,
        api_token: Option<Arc<String>>,
        tx: UnboundedSender<PubSubDelivery>,
    ) -> Result<Arc<Self>, ConnectorError> {
        let url = if url.starts_with("http") {
            url.replacen("http", "ws", 1)
        } else {
            url.to_owned()
        };
        let uri: Uri = url.parse().map_err(|e| {
            ConnectorErrorKind::NotConnected
                .error_with_source(format!("Invalid pub/sub URL '{url}'."), e)
        })?;
        let builder = ClientRequestBuilder::new(uri);
        let builder = if let Some(api_token) = api_token {
            builder.with_header(ApiTokenCache::HEADER_NAME, api_token.as_str())
        } else {
            builder
        };
        let (ws_stream, _res) = tokio_tungstenite::connect_async_with_config(
            builder,
            Some(WebSocketConfig::default()),
            true,
        )
        .await
        .map_err(|e| {
            log::debug!("Failed to connect to '{url}': {e:?}");
            ConnectorErrorKind::NotConnected
                .error_with_source(format!("Could not connect to '{url}'."), e)
        })?;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Opened websocket to '{url}'");
        }
        let (write, read) = ws_stream.split();
        Ok(Arc::new(Self {
            ws_write_stream: Mutex::new(write),
            termination_semaphore: Semaphore::new(0),
        })
        .initialize(read, tx))
    }

    /// Start background tasks.
    fn initialize(
        self: Arc<Self>,
        read: SplitStream<WsStream>,
        tx: UnboundedSender<PubSubDelivery>,
    ) -> Arc<Self> {
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.send_pings().await });
        let self_clone = Arc::clone(&self);
        tokio::spawn(async move { self_clone.handle_messages(read, tx).await });
        self
    }

    /// Wait for this instance to terminate.
    pub async fn await_termination(&self) {
        let _ = self.termination_semaphore.acquire().await;
    }

    /// Return `true` if this instance is signaled to terminate.
    pub fn is_signaled_to_terminate(&self) -> bool {
        self.termination_semaphore.available_permits() > 0
    }

    /// Signal this instance to terminate.
    pub fn signal_termination(&self) {
        if !self.is_signaled_to_terminate() {
            self.termination_semaphore.add_permits(1);
        }
    }

    /// Send ping messages at regular intervals.
    async fn send_pings(&self) {
        // Use an unique ping identifier for each connection.
        let mut ping_id = [0u8; 16];
        Tyst::instance().prng_fill_with_random(None, &mut ping_id);
        loop {
            tokio::select! {
                _ = self.await_termination() => break,
                _ = tokio::time::sleep(Self::PING_INTERVAL) => {}
            }
            let res = self
                .ws_write_stream
                .lock()
                .await
                .send(Message::Ping(ping_id.to_vec().into()))
                .await;
            if let Err(e) = res {
                log::debug!("Sending ping failed: {e:?}");
                self.signal_termination();
                break;
            } else if log::log_enabled!(log::Level::Trace) {
                log::trace!("Sent ping with ping_id '{}'", ping_id.as_slice().to_hex());
            }
        }
    }

    /// Receive messages from the web socket and forward deliveries.
    async fn handle_messages(
        &self,
        mut read: SplitStream<WsStream>,
        tx: UnboundedSender<PubSubDelivery>,
    ) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Starting worker to handle incoming messages.");
        }
        loop {
            let res = tokio::select! {
                _ = self.await_termination() => break,
                res = read.next() => res,
            };
            match res {
                Some(Ok(Message::Text(text))) => {
                    if log::log_enabled!(log::Level::Trace) {
                        log::trace!("Got text: {}", text.as_str());
                    }
                    match serde_json::from_str::<PubSubDelivery>(text.as_str()) {
                        Ok(delivery) => {
                            if tx.send(delivery).is_err() {
                                log::debug!("Delivery queue is closed.");
                                break;
                            }
                        }
                        Err(e) => log::info!("Ignoring unparsable frame: {e}"),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self
                        .ws_write_stream
                        .lock()
                        .await
                        .send(Message::Pong(payload))
                        .await
                    {
                        log::debug!("Pong send failed: {e:?}");
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    if log::log_enabled!(log::Level::Trace) {
                        log::trace!("Got pong.");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::debug!("Connection closed by broker: {frame:?}");
                    break;
                }
                Some(Ok(other)) => {
                    log::debug!("Unhandled message: {other:?}");
                }
                Some(Err(e)) => {
                    log::info!("Receive failed: {e:?}");
                    break;
                }
                None => {
                    log::debug!("Web socket stream ended.");
                    break;
                }
            }
        }
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Stopping worker to handle incoming messages.");
        }
        self.signal_termination();
    }

    /// Send a command and flush.
    pub async fn send(&self, command: &PubSubCommand) -> Result<(), ConnectorError> {
        if self.is_signaled_to_terminate() {
            return Err(ConnectorErrorKind::NotConnected.error_with_msg("Connection is closed."));
        }
        let text = serde_json::to_string(command).map_err(|e| {
            ConnectorErrorKind::Serialization.error_with_source("Unable to encode command.", e)
        })?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Sending: {text}");
        }
        let res = self
            .ws_write_stream
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await;
        res.map_err(|e| {
            log::debug!("Send failed: {e:?}");
            self.signal_termination();
            ConnectorErrorKind::Transport.error_with_source("Unable to send command.", e)
        })
    }

    /// Close the connection.
    pub async fn close(&self) {
        if let Err(e) = self.ws_write_stream.lock().await.close().await {
            log::debug!("Close failed: {e:?}");
        }
        self.signal_termination();
    }
}
