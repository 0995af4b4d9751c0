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

//! [EventSource] polling the control plane REST API.

use super::EventApi;
use super::EventIdCache;
use super::EventSender;
use super::EventSource;
use super::EventUpdate;
use super::subscribed_event_types;
use super::subscription_differ;
use crate::util::CompletionGuard;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use cpconnector_client::ConnectorError;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::KeptnEvent;
use cpconnector_client::model::RegistrationData;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// [EventSource] that polls for new events of each subscribed event type.
///
/// Every poll reaches back [Self::DEFAULT_OVERLAP] before the previous poll
/// to tolerate clock skew and eventual consistency of the control plane.
/// Events seen by the previous poll are not delivered again.
pub struct HttpEventSource {
    event_api: Arc<dyn EventApi>,
    poll_interval: Duration,
    overlap: Duration,
    subscriptions_tx: watch::Sender<Vec<EventSubscription>>,
    stop_token: Mutex<Option<CancellationToken>>,
}

impl HttpEventSource {
    /// Default time between polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Default time each poll reaches back before the previous one.
    pub const DEFAULT_OVERLAP: Duration = Duration::from_secs(5);

    /// Return a new instance.
    pub fn new(
        event_api: Arc<dyn EventApi>,
        poll_interval: Duration,
        overlap: Duration,
    ) -> Arc<Self> {
        let (subscriptions_tx, _rx) = watch::channel(Vec::new());
        Arc::new(Self {
            event_api,
            poll_interval,
            overlap,
            subscriptions_tx,
            stop_token: Mutex::new(None),
        })
    }

    /// Poll until cancelled or a query fails.
    async fn poll(
        event_api: Arc<dyn EventApi>,
        poll_interval: Duration,
        overlap: Duration,
        cancellation_token: CancellationToken,
        subscriptions_rx: watch::Receiver<Vec<EventSubscription>>,
        updates_tx: UnboundedSender<EventUpdate>,
        error_tx: UnboundedSender<ConnectorError>,
    ) {
        let start_time = Utc::now();
        let overlap = chrono::Duration::from_std(overlap).unwrap_or(chrono::Duration::zero());
        let mut cursors = HashMap::<String, DateTime<Utc>>::new();
        let mut initial_types_polled = false;
        let cache = EventIdCache::new();
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let event_types = subscribed_event_types(&subscriptions_rx.borrow());
            cursors.retain(|event_type, _| event_types.contains(event_type));
            cache.retain_topics(|event_type| event_types.contains(event_type));
            // Types subscribed later than the first poll only see new events.
            let new_type_cursor = if initial_types_polled {
                Utc::now()
            } else {
                start_time
            };
            initial_types_polled |= !event_types.is_empty();
            for event_type in event_types {
                let cursor = *cursors
                    .entry(event_type.to_owned())
                    .or_insert(new_type_cursor);
                let query_time = Utc::now();
                let from_time = cursor - overlap;
                let res = tokio::select! {
                    _ = cancellation_token.cancelled() => return,
                    res = event_api.events_since(&event_type, &from_time) => res,
                };
                let events = match res {
                    Ok(events) => events,
                    Err(e) => {
                        log::warn!("Unable to poll events of type '{event_type}': {e}");
                        if error_tx.send(e).is_err() {
                            log::debug!("Error channel is closed.");
                        }
                        return;
                    }
                };
                let event_ids = events
                    .iter()
                    .map(|event| event.id().to_owned())
                    .collect::<Vec<_>>();
                cache.keep(&event_type, &event_ids);
                for event in events {
                    if cache.contains(&event_type, event.id()) {
                        continue;
                    }
                    cache.add(&event_type, event.id());
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!("Delivering event '{}' of type '{event_type}'.", event.id());
                    }
                    let update = EventUpdate {
                        event,
                        subject: event_type.to_owned(),
                        subscription_id: None,
                    };
                    if updates_tx.send(update).is_err() {
                        log::debug!("Event update channel is closed.");
                        return;
                    }
                }
                cursors.insert(event_type, query_time);
            }
        }
        log::debug!("HTTP event source stopped.");
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn start(
        &self,
        cancellation_token: CancellationToken,
        registration_data: RegistrationData,
        updates_tx: UnboundedSender<EventUpdate>,
        error_tx: UnboundedSender<ConnectorError>,
        completion_guard: CompletionGuard,
    ) -> Result<(), ConnectorError> {
        log::debug!(
            "Starting to poll events for integration '{}'.",
            registration_data.id()
        );
        let cancellation_token = cancellation_token.child_token();
        *self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancellation_token.clone());
        let event_api = Arc::clone(&self.event_api);
        let poll_interval = self.poll_interval;
        let overlap = self.overlap;
        let subscriptions_rx = self.subscriptions_tx.subscribe();
        tokio::spawn(async move {
            Self::poll(
                event_api,
                poll_interval,
                overlap,
                cancellation_token,
                subscriptions_rx,
                updates_tx,
                error_tx,
            )
            .await;
            drop(completion_guard);
        });
        Ok(())
    }

    async fn on_subscription_update(&self, subscriptions: &[EventSubscription]) {
        self.subscriptions_tx.send_if_modified(|current| {
            if subscription_differ(subscriptions, current) {
                log::debug!(
                    "Polling for event types {:?}.",
                    subscribed_event_types(subscriptions)
                );
            }
            // Filters may have changed even if event types did not.
            *current = subscriptions.to_vec();
            true
        });
    }

    fn sender(&self) -> Arc<dyn EventSender> {
        Arc::new(HttpEventSender {
            event_api: Arc::clone(&self.event_api),
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
        Ok(())
    }
}

/// Sends events using the REST API.
struct HttpEventSender {
    event_api: Arc<dyn EventApi>,
}

#[async_trait]
impl EventSender for HttpEventSender {
    async fn send_event(&self, mut event: KeptnEvent) -> Result<(), ConnectorError> {
        event.prepare_for_publish()?;
        self.event_api.send_event(&event).await
    }
}
