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

//! Control plane registration endpoints used by
//! [super::UniformSubscriptionSource].

use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::RestApiClient;
use cpconnector_client::model::RegistrationData;

/// Registration and renewal of integrations.
#[async_trait]
pub trait UniformApi: Send + Sync {
    /// Register an integration and return the assigned identifier.
    async fn register_integration(
        &self,
        registration_data: &RegistrationData,
    ) -> Result<String, ConnectorError>;

    /// Renew the registration and return the current integration record.
    async fn ping(&self, integration_id: &str) -> Result<RegistrationData, ConnectorError>;
}

#[async_trait]
impl UniformApi for RestApiClient {
    async fn register_integration(
        &self,
        registration_data: &RegistrationData,
    ) -> Result<String, ConnectorError> {
        RestApiClient::register_integration(self, registration_data).await
    }

    async fn ping(&self, integration_id: &str) -> Result<RegistrationData, ConnectorError> {
        RestApiClient::ping(self, integration_id).await
    }
}
