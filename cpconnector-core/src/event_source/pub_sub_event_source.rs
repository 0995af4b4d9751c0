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

//! [EventSource] receiving events from a publish/subscribe broker.

use super::EventSender;
use super::EventSource;
use super::EventUpdate;
use super::subscribed_event_types;
use crate::util::CompletionGuard;
use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::ConnectorErrorKind;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::KeptnEvent;
use cpconnector_client::model::RegistrationData;
use cpconnector_client::pubsub::PubSubConnector;
use cpconnector_client::pubsub::PubSubMessage;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::PoisonError;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Subscription state shared between updates and the delivery task.
#[derive(Default)]
struct SubscribedSubjects {
    subjects: BTreeSet<String>,
    queue_group: String,
    messages_tx: Option<UnboundedSender<PubSubMessage>>,
}

/// [EventSource] subscribing to one subject per subscribed event type.
///
/// All replicas of an integration subscribe in the same queue group (the
/// integration name) so each event is delivered to only one of them.
pub struct PubSubEventSource {
    connector: Arc<dyn PubSubConnector>,
    state: Arc<Mutex<SubscribedSubjects>>,
    stop_token: std::sync::Mutex<Option<CancellationToken>>,
}

impl PubSubEventSource {
    /// Return a new instance.
    pub fn new(connector: Arc<dyn PubSubConnector>) -> Arc<Self> {
        Arc::new(Self {
            connector,
            state: Arc::new(Mutex::new(SubscribedSubjects::default())),
            stop_token: std::sync::Mutex::new(None),
        })
    }

    /// Subjects currently subscribed to.
    pub async fn subscribed_subjects(&self) -> Vec<String> {
        self.state.lock().await.subjects.iter().cloned().collect()
    }

    /// Forward messages as events until cancelled or the connection is lost,
    /// then unsubscribe.
    ///
    /// A lost connection is reported on `error_tx`.
    async fn deliver(
        connector: Arc<dyn PubSubConnector>,
        state: Arc<Mutex<SubscribedSubjects>>,
        cancellation_token: CancellationToken,
        mut messages_rx: UnboundedReceiver<PubSubMessage>,
        updates_tx: UnboundedSender<EventUpdate>,
        error_tx: UnboundedSender<ConnectorError>,
    ) {
        let mut connection_loss = connector.await_connection_loss();
        let mut connection_lost = false;
        loop {
            let message = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                _ = &mut connection_loss => {
                    connection_lost = true;
                    let error = ConnectorErrorKind::NotConnected
                        .error_with_msg("Lost connection to the pub/sub broker.");
                    if error_tx.send(error).is_err() {
                        log::debug!("Error channel is closed.");
                    }
                    break;
                }
                message = messages_rx.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            let event = match serde_json::from_str::<KeptnEvent>(&message.payload) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!(
                        "Ignoring message on '{}' that is not an event: {e}",
                        message.subject
                    );
                    continue;
                }
            };
            let update = EventUpdate {
                event,
                subject: message.subject,
                subscription_id: None,
            };
            if updates_tx.send(update).is_err() {
                log::debug!("Event update channel is closed.");
                break;
            }
        }
        drop(connection_loss);
        let mut state = state.lock().await;
        state.messages_tx = None;
        state.subjects.clear();
        if connection_lost {
            log::debug!("Subscriptions ended with the lost connection.");
        } else if let Err(e) = connector.unsubscribe_all().await {
            log::error!("Unable to unsubscribe: {e}");
        } else {
            log::debug!("Unsubscribed from all subjects.");
        }
    }
}

#[async_trait]
impl EventSource for PubSubEventSource {
    async fn start(
        &self,
        cancellation_token: CancellationToken,
        registration_data: RegistrationData,
        updates_tx: UnboundedSender<EventUpdate>,
        error_tx: UnboundedSender<ConnectorError>,
        completion_guard: CompletionGuard,
    ) -> Result<(), ConnectorError> {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().await;
            state.queue_group = registration_data.name.to_owned();
            let subjects = state.subjects.iter().cloned().collect::<Vec<_>>();
            self.connector
                .queue_subscribe_multiple(&subjects, &state.queue_group, messages_tx.clone())
                .await
                .map_err(|e| {
                    ConnectorErrorKind::Transport
                        .error_with_source("Could not start pub/sub event source.", e)
                })?;
            state.messages_tx = Some(messages_tx);
        }
        let cancellation_token = cancellation_token.child_token();
        *self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancellation_token.clone());
        let connector = Arc::clone(&self.connector);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            Self::deliver(
                connector,
                state,
                cancellation_token,
                messages_rx,
                updates_tx,
                error_tx,
            )
            .await;
            drop(completion_guard);
        });
        Ok(())
    }

    async fn on_subscription_update(&self, subscriptions: &[EventSubscription]) {
        let subjects = subscribed_event_types(subscriptions);
        let mut state = self.state.lock().await;
        if state.subjects == subjects {
            return;
        }
        let Some(messages_tx) = state.messages_tx.clone() else {
            // Not started (or already stopped). Subscribe on start.
            state.subjects = subjects;
            return;
        };
        log::debug!(
            "Cleaning up {} old subscriptions.",
            state.subjects.len()
        );
        if let Err(e) = self.connector.unsubscribe_all().await {
            log::error!("Could not handle subscription update: {e}");
            return;
        }
        state.subjects.clear();
        let new_subjects = subjects.iter().cloned().collect::<Vec<_>>();
        if let Err(e) = self
            .connector
            .queue_subscribe_multiple(&new_subjects, &state.queue_group, messages_tx)
            .await
        {
            log::error!("Could not handle subscription update: {e}");
            return;
        }
        log::debug!("Subscribed to {} subjects.", subjects.len());
        state.subjects = subjects;
    }

    fn sender(&self) -> Arc<dyn EventSender> {
        Arc::new(PubSubEventSender {
            connector: Arc::clone(&self.connector),
        })
    }

    fn stop(&self) -> Result<(), ConnectorError> {
        if let Some(stop_token) = self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            stop_token.cancel();
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), ConnectorError> {
        self.connector.disconnect().await
    }
}

/// Publishes events on the subject named by their type.
struct PubSubEventSender {
    connector: Arc<dyn PubSubConnector>,
}

#[async_trait]
impl EventSender for PubSubEventSender {
    async fn send_event(&self, event: KeptnEvent) -> Result<(), ConnectorError> {
        self.connector.publish(&event).await
    }
}
