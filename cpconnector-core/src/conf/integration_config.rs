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

//! Parsing of configuration for the integration identity.

use config::ConfigBuilder;
use config::ConfigError;
use config::builder::BuilderState;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::KubernetesMetaData;
use cpconnector_client::model::MetaData;
use cpconnector_client::model::RegistrationData;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

use super::AppConfigDefaults;

/// Configuration of the integration identity and lifecycle.
#[derive(Debug, Deserialize, Serialize)]
pub struct IntegrationConfig {
    /// Integration name.
    name: String,
    /// Integration version.
    version: String,
    /// Where the integration runs.
    location: String,
    /// Host or Kubernetes node name.
    hostname: String,
    /// Kubernetes namespace.
    namespace: String,
    /// Kubernetes pod name.
    podname: String,
    /// Kubernetes deployment name.
    deploymentname: String,
    /// Comma separated event types to subscribe to on registration.
    subscriptions: String,
    /// Milliseconds to wait for graceful shutdown.
    shutdowntimeout: String,
}

impl AppConfigDefaults for IntegrationConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> Result<ConfigBuilder<T>, ConfigError> {
        config_builder
            .set_default(prefix.to_string() + "." + "name", "cpconnector")?
            .set_default(prefix.to_string() + "." + "version", super::CARGO_PKG_VERSION)?
            .set_default(prefix.to_string() + "." + "location", "control-plane")?
            .set_default(prefix.to_string() + "." + "hostname", "")?
            .set_default(prefix.to_string() + "." + "namespace", "")?
            .set_default(prefix.to_string() + "." + "podname", "")?
            .set_default(prefix.to_string() + "." + "deploymentname", "")?
            .set_default(prefix.to_string() + "." + "subscriptions", "")?
            .set_default(prefix.to_string() + "." + "shutdowntimeout", "30000")
    }
}

impl IntegrationConfig {
    /// Integration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event types to subscribe to on registration.
    pub fn subscriptions(&self) -> Vec<String> {
        super::parse_list(&self.subscriptions)
    }

    /// Time allowed for graceful shutdown before the process is terminated.
    /// Defaults to 30 seconds.
    pub fn shutdown_timeout(&self) -> Duration {
        super::parse_millis(&self.shutdowntimeout, 30_000)
    }

    /// Registration record of this integration.
    pub fn registration_data(&self) -> RegistrationData {
        RegistrationData {
            id: None,
            name: self.name.to_owned(),
            metadata: MetaData {
                hostname: self.hostname.to_owned(),
                integrationversion: self.version.to_owned(),
                distributorversion: super::CARGO_PKG_VERSION.to_owned(),
                location: self.location.to_owned(),
                kubernetesmetadata: KubernetesMetaData {
                    namespace: self.namespace.to_owned(),
                    podname: self.podname.to_owned(),
                    deploymentname: self.deploymentname.to_owned(),
                },
                lastseen: None,
            },
            subscriptions: self
                .subscriptions()
                .iter()
                .map(|event_type| EventSubscription::for_event_type("", event_type))
                .collect(),
        }
    }
}
