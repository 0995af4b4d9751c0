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

//! Parsing of application configuration.

mod api_config;
mod events_config;
mod integration_config;
mod subscriptions_config;

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;
use config::File;
use config::builder::BuilderState;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

pub use self::api_config::ApiConfig;
pub use self::events_config::EventTransport;
pub use self::events_config::EventsConfig;
pub use self::integration_config::IntegrationConfig;
pub use self::subscriptions_config::SubscriptionsConfig;

/// Package version reported by Cargo at build time.
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static trait for tracking implementations.
trait AppConfigDefaults {
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> Result<ConfigBuilder<T>, ConfigError>;
}

/// Parse a duration in milliseconds or fall back to `default_millis`.
fn parse_millis(value: &str, default_millis: u64) -> Duration {
    Duration::from_millis(value.trim().parse::<u64>().unwrap_or_else(|e| {
        log::warn!("Invalid duration '{value}': {e}. Using {default_millis} ms.");
        default_millis
    }))
}

/// Split a comma separated list and skip empty items.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/**
Application configration root.

The application name defaults to the Rust package name, but can be overridden
with the environment variable `APP_NAME`.

Configuration will be loaded from

1. the file `{application name}.json` in the current working directory.
2. environment variable overrides in the form
   `{APPLICATION_NAME}_MODULE_CONFIGKEYWITHOUTSPACES`, e.g.
   `CPCONNECTOR_API_TOKEN`.
 */
#[derive(Debug, Deserialize, Serialize)]
pub struct AppConfig {
    /// Control plane API access.
    pub api: ApiConfig,
    /// Where subscriptions come from.
    pub subscriptions: SubscriptionsConfig,
    /// How events are received and sent.
    pub events: EventsConfig,
    /// Integration identity and lifecycle.
    pub integration: IntegrationConfig,

    /// Lower case application name. Ignored when loading configuration.
    #[serde(skip_deserializing)]
    app_name: String,
}

impl AppConfig {
    /// The application name defaults to the Rust package name, but can be
    /// overridden with the environment variable `APP_NAME`.
    fn read_app_name_lowercase(cargo_pkg_name: &str) -> String {
        std::env::var("APP_NAME")
            .map_err(|e| {
                log::debug!(
                    "Environment variable APP_NAME: {e:?} -> Default app name '{cargo_pkg_name}' will be used."
                );
            })
            .ok()
            .map(|value| value.to_lowercase())
            .unwrap_or(cargo_pkg_name.to_owned())
    }

    /// Lower case application name.
    pub fn app_name_lowercase(&self) -> &str {
        &self.app_name
    }

    /// SemVer version of the connector implementation.
    pub fn app_version(&self) -> &'static str {
        CARGO_PKG_VERSION
    }

    /** Creates a new instance pre-populated with defaults, an optional
    configurations file and environment variable overrides.

    Use `env!("CARGO_PKG_NAME")` as `cargo_pkg_name`.
    */
    pub fn new(cargo_pkg_name: &str) -> Result<Self, ConfigError> {
        let app_name = Self::read_app_name_lowercase(cargo_pkg_name);
        let config_filename = app_name.to_owned() + ".json";
        let config_env_prefix = &app_name.to_uppercase().replace('-', "_");
        let mut config_builder = Config::builder();
        config_builder = ApiConfig::set_defaults(config_builder, "api")?;
        config_builder = SubscriptionsConfig::set_defaults(config_builder, "subscriptions")?;
        config_builder = EventsConfig::set_defaults(config_builder, "events")?;
        config_builder = IntegrationConfig::set_defaults(config_builder, "integration")?;
        let conf_file = std::env::current_dir()
            .map_err(|e| ConfigError::Foreign(Box::new(e)))?
            .join(config_filename);
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Will load '{}' configuration if present.",
                conf_file.display()
            );
        }
        let config = config_builder
            .add_source(File::from(conf_file).required(false))
            .add_source(
                Environment::with_prefix(config_env_prefix)
                    .separator("_")
                    .list_separator(","),
            )
            .build()?;
        let mut app_config: AppConfig = config.try_deserialize()?;
        app_config.app_name = app_name;
        log::info!("Running with configuration: {app_config:?}");
        Ok(app_config)
    }
}
