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

//! [PubSubConnector] over a single WebSocket connection.

use super::PubSubCommand;
use super::PubSubConnector;
use super::PubSubDelivery;
use super::PubSubMessage;
use super::web_socket_connection::WebSocketConnection;
use crate::ConnectorError;
use crate::ConnectorErrorKind;
use crate::authentication::ApiTokenCache;
use crate::model::KeptnEvent;
use async_trait::async_trait;
use crossbeam_skiplist::SkipMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

/// [PubSubConnector] using a lazily established WebSocket connection to a
/// broker.
///
/// The connection is (re-)established on first use after construction, after
/// a failure or after [PubSubConnector::disconnect].
pub struct WebSocketPubSub {
    url: String,
    api_token_cache: Option<Arc<ApiTokenCache>>,
    connection: Mutex<Option<Arc<WebSocketConnection>>>,
    subscriptions: Arc<SkipMap<String, UnboundedSender<PubSubMessage>>>,
}

impl WebSocketPubSub {
    /// Return a new instance. No connection is made until first use.
    pub fn new(url: &str, api_token_cache: Option<Arc<ApiTokenCache>>) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_owned(),
            api_token_cache,
            connection: Mutex::new(None),
            subscriptions: Arc::new(SkipMap::new()),
        })
    }

    /// Return the open connection or connect.
    async fn connection(&self) -> Result<Arc<WebSocketConnection>, ConnectorError> {
        let mut connection = self.connection.lock().await;
        if let Some(existing) = connection.as_ref()
            && !existing.is_signaled_to_terminate()
        {
            return Ok(Arc::clone(existing));
        }
        if connection.take().is_some() {
            log::info!("Connection to '{}' was lost. Reconnecting.", self.url);
            // Subscriptions don't survive the broker connection.
            self.subscriptions.clear();
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<PubSubDelivery>();
        let api_token = self
            .api_token_cache
            .as_ref()
            .and_then(|api_token_cache| api_token_cache.current());
        let new_connection = WebSocketConnection::connect(&self.url, api_token, tx).await?;
        let subscriptions = Arc::clone(&self.subscriptions);
        tokio::spawn(async move {
            while let Some(PubSubDelivery::Message { subject, payload }) = rx.recv().await {
                let Some(entry) = subscriptions.get(&subject) else {
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!("Dropping message on unsubscribed subject '{subject}'.");
                    }
                    continue;
                };
                if entry
                    .value()
                    .send(PubSubMessage { subject, payload })
                    .is_err()
                {
                    log::debug!("Receiver of subject '{}' is gone.", entry.key());
                }
            }
        });
        *connection = Some(Arc::clone(&new_connection));
        Ok(new_connection)
    }
}

#[async_trait]
impl PubSubConnector for WebSocketPubSub {
    async fn subscribe(
        &self,
        subject: &str,
        tx: UnboundedSender<PubSubMessage>,
    ) -> Result<(), ConnectorError> {
        self.queue_subscribe(subject, "", tx).await
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        tx: UnboundedSender<PubSubMessage>,
    ) -> Result<(), ConnectorError> {
        if subject.is_empty() {
            return Err(ConnectorErrorKind::EmptySubject.error());
        }
        let connection = self.connection().await?;
        if self.subscriptions.contains_key(subject) {
            return Err(ConnectorErrorKind::AlreadySubscribed
                .error_with_msg(format!("Subject '{subject}' is already subscribed.")));
        }
        self.subscriptions.insert(subject.to_owned(), tx);
        let command = PubSubCommand::Subscribe {
            subject: subject.to_owned(),
            queue_group: Some(queue_group)
                .filter(|queue_group| !queue_group.is_empty())
                .map(str::to_owned),
        };
        if let Err(e) = connection.send(&command).await {
            self.subscriptions.remove(subject);
            return Err(e);
        }
        log::debug!("Subscribed to '{subject}'.");
        Ok(())
    }

    async fn queue_subscribe_multiple(
        &self,
        subjects: &[String],
        queue_group: &str,
        tx: UnboundedSender<PubSubMessage>,
    ) -> Result<(), ConnectorError> {
        // Connect even without subjects so connection problems surface early.
        self.connection().await?;
        for subject in subjects {
            self.queue_subscribe(subject, queue_group, tx.clone())
                .await?;
        }
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<(), ConnectorError> {
        let connection = self.connection.lock().await.as_ref().map(Arc::clone);
        let mut first_error = None;
        while let Some(entry) = self.subscriptions.pop_front() {
            let Some(connection) = connection.as_ref() else {
                continue;
            };
            let command = PubSubCommand::Unsubscribe {
                subject: entry.key().to_owned(),
            };
            if let Err(e) = connection.send(&command).await {
                log::debug!("Unable to unsubscribe from '{}': {e}", entry.key());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn publish(&self, event: &KeptnEvent) -> Result<(), ConnectorError> {
        let mut event = event.clone();
        event.prepare_for_publish()?;
        let payload = serde_json::to_string(&event).map_err(|e| {
            ConnectorErrorKind::Serialization.error_with_source("Unable to encode event.", e)
        })?;
        let command = PubSubCommand::Publish {
            subject: event.event_type().to_owned(),
            payload,
        };
        self.connection().await?.send(&command).await
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let connection = self.connection.lock().await.take();
        self.subscriptions.clear();
        if let Some(connection) = connection {
            connection.close().await;
            connection.await_termination().await;
            log::debug!("Disconnected from '{}'.", self.url);
        }
        Ok(())
    }

    async fn await_connection_loss(&self) {
        let connection = self.connection.lock().await.as_ref().map(Arc::clone);
        if let Some(connection) = connection {
            connection.await_termination().await;
        }
    }
}
