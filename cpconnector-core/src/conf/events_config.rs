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

//! Parsing of configuration for event transport.

use config::ConfigBuilder;
use config::ConfigError;
use config::builder::BuilderState;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

use super::AppConfigDefaults;

/// Transport used for receiving and sending events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTransport {
    /// Poll the control plane REST API.
    Http,
    /// Subject based publish/subscribe broker.
    PubSub,
}

/// Configuration for event transport.
#[derive(Debug, Deserialize, Serialize)]
pub struct EventsConfig {
    /// `http` or `pubsub`.
    transport: String,
    /// Milliseconds between polls.
    pollinterval: String,
    /// Milliseconds each poll reaches back before the last poll.
    overlap: String,
    /// URL of the pub/sub broker.
    pubsuburl: String,
}

impl AppConfigDefaults for EventsConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> Result<ConfigBuilder<T>, ConfigError> {
        config_builder
            .set_default(prefix.to_string() + "." + "transport", "http")?
            .set_default(prefix.to_string() + "." + "pollinterval", "1000")?
            .set_default(prefix.to_string() + "." + "overlap", "5000")?
            .set_default(
                prefix.to_string() + "." + "pubsuburl",
                "ws://localhost:8081/pubsub",
            )
    }
}

impl EventsConfig {
    /// Event transport. Unknown values fall back to [EventTransport::Http].
    pub fn transport(&self) -> EventTransport {
        match self.transport.trim().to_lowercase().as_str() {
            "pubsub" => EventTransport::PubSub,
            "http" => EventTransport::Http,
            other => {
                log::warn!("Unknown event transport '{other}'. Using 'http'.");
                EventTransport::Http
            }
        }
    }

    /// Interval between polls of the REST API. Defaults to 1 second.
    pub fn poll_interval(&self) -> Duration {
        super::parse_millis(&self.pollinterval, 1_000)
    }

    /// How far each poll reaches back before the previous poll. Defaults to 5
    /// seconds.
    pub fn overlap(&self) -> Duration {
        super::parse_millis(&self.overlap, 5_000)
    }

    /// URL of the pub/sub broker.
    pub fn pub_sub_url(&self) -> &str {
        &self.pubsuburl
    }
}
