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

//! Parsing of configuration for control plane API access.

use config::ConfigBuilder;
use config::ConfigError;
use config::builder::BuilderState;
use serde::Deserialize;
use serde::Serialize;

use super::AppConfigDefaults;

/// Configuration for control plane API access.
#[derive(Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base URL of the control plane API.
    endpoint: String,
    /// API token. Empty to read the token from file.
    token: String,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &"*redacted*")
            .finish()
    }
}

impl AppConfigDefaults for ApiConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> Result<ConfigBuilder<T>, ConfigError> {
        config_builder
            .set_default(
                prefix.to_string() + "." + "endpoint",
                "http://localhost:8080/api/controlPlane/v1",
            )?
            .set_default(prefix.to_string() + "." + "token", "")
    }
}

impl ApiConfig {
    /// Base URL of the control plane API.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Explicitly configured API token.
    pub fn token(&self) -> Option<&str> {
        Some(self.token.as_str()).filter(|token| !token.trim().is_empty())
    }
}
