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

//! Parsing of configuration for the subscription source.

use config::ConfigBuilder;
use config::ConfigError;
use config::builder::BuilderState;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

use super::AppConfigDefaults;

/// Configuration for where event subscriptions come from.
#[derive(Debug, Deserialize, Serialize)]
pub struct SubscriptionsConfig {
    /// Milliseconds between subscription fetches.
    fetchinterval: String,
    /// Ping attempts before giving up.
    maxattempts: String,
    /// Milliseconds between ping attempts.
    attemptinterval: String,
    /// Comma separated event types of a fixed subscription list.
    fixed: String,
}

impl AppConfigDefaults for SubscriptionsConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> Result<ConfigBuilder<T>, ConfigError> {
        config_builder
            .set_default(prefix.to_string() + "." + "fetchinterval", "5000")?
            .set_default(prefix.to_string() + "." + "maxattempts", "10")?
            .set_default(prefix.to_string() + "." + "attemptinterval", "3000")?
            .set_default(prefix.to_string() + "." + "fixed", "")
    }
}

impl SubscriptionsConfig {
    /// Interval between subscription fetches. Defaults to 5 seconds.
    pub fn fetch_interval(&self) -> Duration {
        super::parse_millis(&self.fetchinterval, 5_000)
    }

    /// Number of ping attempts before the connector gives up. Defaults to 10.
    pub fn max_attempts(&self) -> u32 {
        self.maxattempts
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|attempts| *attempts > 0)
            .unwrap_or(10)
    }

    /// Delay between ping attempts. Defaults to 3 seconds.
    pub fn attempt_interval(&self) -> Duration {
        super::parse_millis(&self.attemptinterval, 3_000)
    }

    /// Event types of a fixed subscription list.
    ///
    /// When non-empty, subscriptions are not fetched from the control plane.
    pub fn fixed_event_types(&self) -> Vec<String> {
        super::parse_list(&self.fixed)
    }
}
