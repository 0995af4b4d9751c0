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

//! [SubscriptionSource] with a static list of subscriptions.

use super::SubscriptionSource;
use crate::util::CompletionGuard;
use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::RegistrationData;
use std::sync::Mutex;
use std::sync::PoisonError;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// [SubscriptionSource] that never contacts the control plane.
///
/// Useful for consuming events without registering as an integration.
pub struct FixedSubscriptionSource {
    subscriptions: Vec<EventSubscription>,
    stop_token: Mutex<Option<CancellationToken>>,
}

impl FixedSubscriptionSource {
    /// Return a new instance emitting `subscriptions`.
    pub fn new(subscriptions: Vec<EventSubscription>) -> Self {
        Self {
            subscriptions,
            stop_token: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SubscriptionSource for FixedSubscriptionSource {
    async fn register(
        &self,
        _registration_data: &RegistrationData,
    ) -> Result<String, ConnectorError> {
        Ok(String::new())
    }

    async fn start(
        &self,
        cancellation_token: CancellationToken,
        _registration_data: RegistrationData,
        updates_tx: UnboundedSender<Vec<EventSubscription>>,
        _error_tx: UnboundedSender<ConnectorError>,
        completion_guard: CompletionGuard,
    ) -> Result<(), ConnectorError> {
        let cancellation_token = cancellation_token.child_token();
        *self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancellation_token.clone());
        let subscriptions = self.subscriptions.clone();
        tokio::spawn(async move {
            if updates_tx.send(subscriptions).is_err() {
                log::debug!("Subscription update channel is closed.");
            }
            cancellation_token.cancelled().await;
            drop(completion_guard);
        });
        Ok(())
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
}
