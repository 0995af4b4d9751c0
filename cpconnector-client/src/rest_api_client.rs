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

//! Interactions with the control plane using the REST API.

use crate::ConnectorError;
use crate::ConnectorErrorKind;
use crate::authentication::ApiTokenCache;
use crate::model::CreateLogsRequest;
use crate::model::EventsPage;
use crate::model::KeptnEvent;
use crate::model::LogEntry;
use crate::model::RegisterIntegrationResponse;
use crate::model::RegistrationData;
use crate::time::format_rfc3339_millis;
use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
use reqwest::ClientBuilder;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;

/// Client for interacting with the control plane using the REST API.
pub struct RestApiClient {
    api_base_url: String,
    // Client uses an Arc internally, so it doesn't need Arc<> wrapping here
    client: Client,
    api_token_cache: Arc<ApiTokenCache>,
}

impl RestApiClient {
    const MIME_APPLICATION_JSON: &'static str = "application/json";
    const UNIFORM_REGISTRATION_PATH: &'static str = "/uniform/registration";
    const EVENT_PATH: &'static str = "/event";
    const LOG_PATH: &'static str = "/log";
    /// Number of events requested per page.
    pub const EVENTS_PAGE_SIZE: u32 = 100;

    /// Return a new instance.
    ///
    /// `api_token` is used when non-empty, otherwise the token is read from
    /// file. See [ApiTokenCache].
    pub async fn new(
        api_base_url: &str,
        api_token: Option<&str>,
        app_name_lowercase: &str,
        app_version: &str,
    ) -> Result<Self, ConnectorError> {
        let api_token_cache = ApiTokenCache::new(api_token).await;
        let user_agent = format!("{app_name_lowercase}/{app_version}");
        log::debug!("user_agent: {user_agent}");
        let client = ClientBuilder::new()
            .user_agent(user_agent)
            .referer(false)
            .brotli(true)
            .timeout(core::time::Duration::from_secs(10))
            .build()
            .map_err(|e| {
                ConnectorErrorKind::Transport.error_with_source("Unable to build HTTP client.", e)
            })?;
        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_owned(),
            client,
            api_token_cache,
        })
    }

    /// Base URL of the control plane API.
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// Token source used for requests. Share it with other transports to the
    /// same control plane.
    pub fn api_token_cache(&self) -> &Arc<ApiTokenCache> {
        &self.api_token_cache
    }

    /// Register an integration and return the identifier assigned by the
    /// control plane.
    pub async fn register_integration(
        &self,
        integration: &RegistrationData,
    ) -> Result<String, ConnectorError> {
        let url = format!("{}{}", self.api_base_url, Self::UNIFORM_REGISTRATION_PATH);
        let body = Self::to_json(integration)?;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Sending body: {body}");
        }
        let request = self
            .client
            .post(&url)
            .body(body)
            .header(&CONTENT_TYPE, Self::MIME_APPLICATION_JSON);
        let document = self.send_expect_20x(request, &url).await?;
        let response: RegisterIntegrationResponse = Self::from_json(&document, &url)?;
        Ok(response.id)
    }

    /// Renew the registration and return the integration record with its
    /// current subscriptions.
    pub async fn ping(&self, integration_id: &str) -> Result<RegistrationData, ConnectorError> {
        let url = format!(
            "{}{}/{integration_id}/ping",
            self.api_base_url,
            Self::UNIFORM_REGISTRATION_PATH
        );
        let request = self.client.put(&url);
        let document = self.send_expect_20x(request, &url).await?;
        Self::from_json(&document, &url)
    }

    /// Get all events of `event_type` newer than `from_time`.
    ///
    /// All pages are fetched.
    pub async fn events_since(
        &self,
        event_type: &str,
        from_time: &DateTime<Utc>,
    ) -> Result<Vec<KeptnEvent>, ConnectorError> {
        let mut events = Vec::new();
        let mut next_page_key: Option<String> = None;
        loop {
            let page = self
                .events_page(event_type, from_time, next_page_key.as_deref())
                .await?;
            next_page_key = page.next_page().map(str::to_owned);
            events.extend(page.events);
            if next_page_key.is_none() {
                break;
            }
        }
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Got {} events of type '{event_type}'.", events.len());
        }
        Ok(events)
    }

    /// Get a single page of events.
    async fn events_page(
        &self,
        event_type: &str,
        from_time: &DateTime<Utc>,
        next_page_key: Option<&str>,
    ) -> Result<EventsPage, ConnectorError> {
        let mut params = vec![
            ("type", event_type.to_owned()),
            ("fromTime", format_rfc3339_millis(from_time)),
            ("pageSize", Self::EVENTS_PAGE_SIZE.to_string()),
        ];
        if let Some(next_page_key) = next_page_key {
            params.push(("nextPageKey", next_page_key.to_owned()));
        }
        let url = Url::parse_with_params(
            &format!("{}{}", self.api_base_url, Self::EVENT_PATH),
            &params,
        )
        .map_err(|e| {
            ConnectorErrorKind::Unspecified.error_with_source("Unable to build event query.", e)
        })?;
        let url_string = url.to_string();
        let request = self.client.get(url);
        let document = self.send_expect_20x(request, &url_string).await?;
        Self::from_json(&document, &url_string)
    }

    /// Send an event to the control plane.
    pub async fn send_event(&self, event: &KeptnEvent) -> Result<(), ConnectorError> {
        let url = format!("{}{}", self.api_base_url, Self::EVENT_PATH);
        let body = Self::to_json(event)?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Sending body: {body}");
        }
        let request = self
            .client
            .post(&url)
            .body(body)
            .header(&CONTENT_TYPE, Self::MIME_APPLICATION_JSON);
        self.send_expect_20x(request, &url).await.map(|_| ())
    }

    /// Ship log entries to the control plane.
    pub async fn send_logs(&self, logs: Vec<LogEntry>) -> Result<(), ConnectorError> {
        if logs.is_empty() {
            return Ok(());
        }
        let url = format!("{}{}", self.api_base_url, Self::LOG_PATH);
        let body = Self::to_json(&CreateLogsRequest { logs })?;
        let request = self
            .client
            .post(&url)
            .body(body)
            .header(&CONTENT_TYPE, Self::MIME_APPLICATION_JSON);
        self.send_expect_20x(request, &url).await.map(|_| ())
    }

    /// Add authentication, send the request and return the response body if
    /// the HTTP status code is 2xx.
    async fn send_expect_20x(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<String, ConnectorError> {
        let request = if let Some(api_token) = self.api_token_cache.current() {
            request.header(ApiTokenCache::HEADER_NAME, api_token.as_str())
        } else {
            request
        };
        let response = request.send().await.map_err(|e| {
            log::info!("Failed request to '{url}': {:?}", e.without_url());
            ConnectorErrorKind::Transport.error_with_msg(format!("Failed request to '{url}'."))
        })?;
        Self::response_body_if_20x(response, url).await
    }

    /// Return response body as text if HTTP status code is 2xx.
    async fn response_body_if_20x(response: Response, url: &str) -> Result<String, ConnectorError> {
        let status_code = response.status();
        let body = response.text().await.map_err(|e| {
            log::info!(
                "Failed request to '{url}': Failed to parse response body as text: {:?}",
                e.without_url()
            );
            ConnectorErrorKind::Transport
                .error_with_msg(format!("Unable to read response body from '{url}'."))
        })?;
        match status_code {
            StatusCode::OK
            | StatusCode::CREATED
            | StatusCode::ACCEPTED
            | StatusCode::NO_CONTENT => Ok(body),
            status_code => {
                log::info!("Failed request to '{url}': status_code {status_code}.");
                Err(ConnectorErrorKind::UnexpectedResponse
                    .error_with_msg(format!("'{url}' responded with {status_code}: {body}")))
            }
        }
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ConnectorError> {
        serde_json::to_string(value).map_err(|e| {
            ConnectorErrorKind::Serialization.error_with_source("Unable to encode request.", e)
        })
    }

    fn from_json<T: serde::de::DeserializeOwned>(
        document: &str,
        url: &str,
    ) -> Result<T, ConnectorError> {
        serde_json::from_str(document).map_err(|e| {
            log::info!("Failed to parse JSON response from '{url}': {e:?}");
            ConnectorErrorKind::Serialization
                .error_with_source(format!("Unable to decode response from '{url}'."), e)
        })
    }
}
