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

//! CLI for the control plane REST API.

use chrono::DateTime;
use chrono::Utc;
use cpconnector_client::RestApiClient;
use cpconnector_client::model::KeptnEvent;
use cpconnector_client::model::RegistrationData;
use std::process::ExitCode;

/// Basic CLI for troubleshooting control plane connectivity.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = init_logger() {
        println!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    let mut args = std::env::args();
    let app_version = env!("CARGO_PKG_VERSION");
    let cli_name = args.next().unwrap_or_default();
    let api_token = std::env::var("API_TOKEN").ok();
    if let Some(api_base_url) = args.next() {
        let client = match RestApiClient::new(
            &api_base_url,
            api_token.as_deref(),
            "cpconnector-cli",
            app_version,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                log::warn!("Unable to create client: {e}");
                return ExitCode::FAILURE;
            }
        };
        match (args.next().as_deref(), args.next(), args.next()) {
            (Some("register"), Some(name), _) => return register(&client, &name).await,
            (Some("ping"), Some(integration_id), _) => {
                return ping(&client, &integration_id).await;
            }
            (Some("events"), Some(event_type), from_time) => {
                return events(&client, &event_type, from_time.as_deref()).await;
            }
            (Some("send"), Some(document), _) => return send(&client, &document).await,
            _ => {}
        }
    }
    println!(
        "{cli_name} - Control plane REST CLI

Usage:
    {cli_name} [base_url] register [integration_name]
    {cli_name} [base_url] ping [integration_id]
    {cli_name} [base_url] events [event_type] <from_time>
    {cli_name} [base_url] send [event_json]

The API token is read from the environment variable API_TOKEN.

Example
    {cli_name} http://localhost:8080/api/controlPlane/v1 events \
        sh.keptn.event.echo.triggered 2022-03-01T10:00:00.000Z
    "
    );
    ExitCode::FAILURE
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    env_logger::builder()
        // Set default log level
        .filter_level(log::LevelFilter::Info)
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

async fn register(client: &RestApiClient, name: &str) -> ExitCode {
    let registration_data = RegistrationData {
        name: name.to_owned(),
        ..RegistrationData::default()
    };
    match client.register_integration(&registration_data).await {
        Ok(integration_id) => {
            log::info!("Registered integration with id '{integration_id}'.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::warn!("Failed to register integration: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn ping(client: &RestApiClient, integration_id: &str) -> ExitCode {
    match client.ping(integration_id).await {
        Ok(integration) => {
            for subscription in &integration.subscriptions {
                log::info!(
                    "Subscription '{}': event '{}' filter {:?}",
                    subscription.id,
                    subscription.event,
                    subscription.filter
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::warn!("Failed to ping integration: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn events(client: &RestApiClient, event_type: &str, from_time: Option<&str>) -> ExitCode {
    let from_time = match from_time.map(DateTime::parse_from_rfc3339) {
        None => Utc::now() - chrono::Duration::hours(1),
        Some(Ok(from_time)) => from_time.with_timezone(&Utc),
        Some(Err(e)) => {
            log::warn!("Invalid time: {e}");
            return ExitCode::FAILURE;
        }
    };
    match client.events_since(event_type, &from_time).await {
        Ok(events) => {
            for event in &events {
                log::info!(
                    "Event '{}' of type '{}' at {:?}",
                    event.id(),
                    event.event_type(),
                    event.time
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::warn!("Failed to retrieve events: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn send(client: &RestApiClient, document: &str) -> ExitCode {
    let mut event = match serde_json::from_str::<KeptnEvent>(document) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("Invalid event document: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = event.prepare_for_publish() {
        log::warn!("Invalid event: {e}");
        return ExitCode::FAILURE;
    }
    match client.send_event(&event).await {
        Ok(()) => {
            log::info!("Sent event '{}'.", event.id());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::warn!("Failed to send event: {e}");
            ExitCode::FAILURE
        }
    }
}
