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

//! Control plane event endpoints used by [super::HttpEventSource].

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use cpconnector_client::ConnectorError;
use cpconnector_client::RestApiClient;
use cpconnector_client::model::KeptnEvent;

/// Query and submission of events.
#[async_trait]
pub trait EventApi: Send + Sync {
    /// All events of `event_type` newer than `from_time`.
    async fn events_since(
        &self,
        event_type: &str,
        from_time: &DateTime<Utc>,
    ) -> Result<Vec<KeptnEvent>, ConnectorError>;

    /// Submit an event.
    async fn send_event(&self, event: &KeptnEvent) -> Result<(), ConnectorError>;
}

#[async_trait]
impl EventApi for RestApiClient {
    async fn events_since(
        &self,
        event_type: &str,
        from_time: &DateTime<Utc>,
    ) -> Result<Vec<KeptnEvent>, ConnectorError> {
        RestApiClient::events_since(self, event_type, from_time).await
    }

    async fn send_event(&self, event: &KeptnEvent) -> Result<(), ConnectorError> {
        RestApiClient::send_event(self, event).await
    }
}
