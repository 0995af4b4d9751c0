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

//! Sources of the event subscriptions of an integration.

mod fixed_subscription_source;
mod uniform_api;
mod uniform_subscription_source;

pub use self::fixed_subscription_source::FixedSubscriptionSource;
pub use self::uniform_api::UniformApi;
pub use self::uniform_subscription_source::UniformSubscriptionSource;

use crate::util::CompletionGuard;
use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::RegistrationData;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Provides the current subscriptions of an integration.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Register the integration and return the assigned identifier.
    async fn register(
        &self,
        registration_data: &RegistrationData,
    ) -> Result<String, ConnectorError>;

    /// Start emitting subscription lists on `updates_tx` until cancelled or
    /// stopped.
    ///
    /// Terminal failures are reported on `error_tx`. `completion_guard` is
    /// dropped when the source has shut down.
    async fn start(
        &self,
        cancellation_token: CancellationToken,
        registration_data: RegistrationData,
        updates_tx: UnboundedSender<Vec<EventSubscription>>,
        error_tx: UnboundedSender<ConnectorError>,
        completion_guard: CompletionGuard,
    ) -> Result<(), ConnectorError>;

    /// Request the source to stop. Safe to call more than once.
    fn stop(&self) -> Result<(), ConnectorError>;
}
