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

//! Sources of inbound events.

mod event_api;
mod event_id_cache;
mod http_event_source;
mod pub_sub_event_source;

pub use self::event_api::EventApi;
pub use self::event_id_cache::EventIdCache;
pub use self::http_event_source::HttpEventSource;
pub use self::pub_sub_event_source::PubSubEventSource;

use crate::util::CompletionGuard;
use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::KeptnEvent;
use cpconnector_client::model::RegistrationData;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// An inbound event with delivery metadata.
#[derive(Clone, Debug)]
pub struct EventUpdate {
    /// The event.
    pub event: KeptnEvent,
    /// Topic or subject the event arrived on.
    pub subject: String,
    /// Subscription resolved by the transport, if any.
    pub subscription_id: Option<String>,
}

/// Sends events back to the control plane.
#[async_trait]
pub trait EventSender: Send + Sync {
    /// Send `event`.
    async fn send_event(&self, event: KeptnEvent) -> Result<(), ConnectorError>;
}

/// Delivers inbound events for the current subscriptions.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start delivering events on `updates_tx` until cancelled or stopped.
    ///
    /// Terminal failures are reported on `error_tx`. `completion_guard` is
    /// dropped when the source has shut down.
    async fn start(
        &self,
        cancellation_token: CancellationToken,
        registration_data: RegistrationData,
        updates_tx: UnboundedSender<EventUpdate>,
        error_tx: UnboundedSender<ConnectorError>,
        completion_guard: CompletionGuard,
    ) -> Result<(), ConnectorError>;

    /// Replace the subscriptions events are delivered for.
    async fn on_subscription_update(&self, subscriptions: &[EventSubscription]);

    /// Return a sender that uses this source's transport.
    fn sender(&self) -> Arc<dyn EventSender>;

    /// Request the source to stop. Safe to call more than once.
    fn stop(&self) -> Result<(), ConnectorError>;

    /// Release transport resources after the source has stopped.
    async fn cleanup(&self) -> Result<(), ConnectorError>;
}

/// Distinct event types of `subscriptions`.
pub fn subscribed_event_types(subscriptions: &[EventSubscription]) -> BTreeSet<String> {
    subscriptions
        .iter()
        .map(|subscription| subscription.event.to_owned())
        .collect()
}

/// Return `true` if the event types of `new` and `old` differ.
///
/// Order and duplicates are ignored.
pub fn subscription_differ(new: &[EventSubscription], old: &[EventSubscription]) -> bool {
    subscribed_event_types(new) != subscribed_event_types(old)
}
