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

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod echo_integration;

use self::echo_integration::EchoIntegration;
use cpconnector_client::ConnectorError;
use cpconnector_client::RestApiClient;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::pubsub::WebSocketPubSub;
use cpconnector_core::conf::AppConfig;
use cpconnector_core::conf::EventTransport;
use cpconnector_core::control_plane::ControlPlane;
use cpconnector_core::control_plane::run_with_graceful_shutdown;
use cpconnector_core::event_source::EventApi;
use cpconnector_core::event_source::EventSource;
use cpconnector_core::event_source::HttpEventSource;
use cpconnector_core::event_source::PubSubEventSource;
use cpconnector_core::log_forwarder::ControlPlaneLogForwarder;
use cpconnector_core::log_forwarder::LogApi;
use cpconnector_core::log_forwarder::LogForwarder;
use cpconnector_core::subscription_source::FixedSubscriptionSource;
use cpconnector_core::subscription_source::SubscriptionSource;
use cpconnector_core::subscription_source::UniformApi;
use cpconnector_core::subscription_source::UniformSubscriptionSource;
use std::process::ExitCode;
use std::sync::Arc;

/// Application main entrypoint.
fn main() -> ExitCode {
    if let Err(e) = init_logger() {
        println!("Failed to initialize logging: {e:?}");
        return ExitCode::FAILURE;
    }
    let app_config = match AppConfig::new(env!("CARGO_PKG_NAME")) {
        Ok(app_config) => Arc::new(app_config),
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(run_async(app_config)),
        Err(e) => {
            log::error!("Failed to start async runtime: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize the logging system and apply filters.
fn init_logger() -> Result<(), log::SetLoggerError> {
    env_logger::builder()
        // Set default log level
        .filter_level(log::LevelFilter::Info)
        // Customize logging for dependencies
        .filter(Some("hyper_util"), log::LevelFilter::Info)
        .filter(Some("reqwest"), log::LevelFilter::Info)
        .filter(Some("rustls"), log::LevelFilter::Info)
        .filter(Some("tungstenite"), log::LevelFilter::Info)
        .filter(Some("tokio_tungstenite"), log::LevelFilter::Info)
        .filter(
            Some("cpconnector_core::event_source::http_event_source"),
            log::LevelFilter::Info,
        )
        .write_style(env_logger::fmt::WriteStyle::Auto)
        .target(env_logger::fmt::Target::Stdout)
        .is_test(false)
        .parse_env(
            env_logger::Env::new()
                .filter("LOG_LEVEL")
                .write_style("LOG_STYLE"),
        )
        .try_init()
}

/// Async code entry point.
pub async fn run_async(app_config: Arc<AppConfig>) -> ExitCode {
    match connect(&app_config).await {
        Ok(()) => {
            log::info!("Disconnected from control plane.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Wire the components selected by configuration and run until signaled.
async fn connect(app_config: &AppConfig) -> Result<(), ConnectorError> {
    let rest_api_client = Arc::new(
        RestApiClient::new(
            app_config.api.endpoint(),
            app_config.api.token(),
            app_config.app_name_lowercase(),
            app_config.app_version(),
        )
        .await?,
    );
    let subscription_source = subscription_source(app_config, &rest_api_client);
    let event_source = event_source(app_config, &rest_api_client);
    let log_forwarder: Arc<dyn LogForwarder> = Arc::new(ControlPlaneLogForwarder::new(
        Arc::clone(&rest_api_client) as Arc<dyn LogApi>,
    ));
    let control_plane = ControlPlane::new(subscription_source, event_source, Some(log_forwarder));
    let integration = Arc::new(EchoIntegration::new(
        app_config.integration.registration_data(),
    ));
    run_with_graceful_shutdown(
        &control_plane,
        integration,
        app_config.integration.shutdown_timeout(),
    )
    .await
}

/// Use a fixed subscription list when configured and renew the
/// registration at the control plane otherwise.
fn subscription_source(
    app_config: &AppConfig,
    rest_api_client: &Arc<RestApiClient>,
) -> Arc<dyn SubscriptionSource> {
    let fixed_event_types = app_config.subscriptions.fixed_event_types();
    if fixed_event_types.is_empty() {
        log::info!("Fetching subscriptions from '{}'.", rest_api_client.api_base_url());
        Arc::new(
            UniformSubscriptionSource::new(Arc::clone(rest_api_client) as Arc<dyn UniformApi>)
                .with_fetch_interval(app_config.subscriptions.fetch_interval())
                .with_max_ping_attempts(app_config.subscriptions.max_attempts())
                .with_ping_attempts_interval(app_config.subscriptions.attempt_interval()),
        ) as Arc<dyn SubscriptionSource>
    } else {
        log::info!("Using fixed subscriptions to {fixed_event_types:?}.");
        Arc::new(FixedSubscriptionSource::new(
            fixed_event_types
                .iter()
                .map(|event_type| EventSubscription::for_event_type(event_type, event_type))
                .collect(),
        ))
    }
}

fn event_source(
    app_config: &AppConfig,
    rest_api_client: &Arc<RestApiClient>,
) -> Arc<dyn EventSource> {
    match app_config.events.transport() {
        EventTransport::Http => HttpEventSource::new(
            Arc::clone(rest_api_client) as Arc<dyn EventApi>,
            app_config.events.poll_interval(),
            app_config.events.overlap(),
        ) as Arc<dyn EventSource>,
        EventTransport::PubSub => PubSubEventSource::new(WebSocketPubSub::new(
            app_config.events.pub_sub_url(),
            Some(Arc::clone(rest_api_client.api_token_cache())),
        )),
    }
}
