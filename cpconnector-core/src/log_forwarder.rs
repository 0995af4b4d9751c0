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

//! Mirroring of failed task outcomes to the control plane log.

use async_trait::async_trait;
use chrono::Utc;
use cpconnector_client::ConnectorError;
use cpconnector_client::RestApiClient;
use cpconnector_client::model::KeptnEvent;
use cpconnector_client::model::LogEntry;
use std::sync::Arc;

/// Suffix of events closing a task.
const FINISHED_SUFFIX: &str = ".finished";
/// Suffix of events reporting a task error.
const ERROR_LOG_SUFFIX: &str = ".error.log";
/// Task status of failed tasks.
const STATUS_ERRORED: &str = "errored";

/// Offered every outgoing event before it is sent.
#[async_trait]
pub trait LogForwarder: Send + Sync {
    /// Forward `event` to the log if it reports a failure.
    async fn forward(&self, event: &KeptnEvent, integration_id: &str)
    -> Result<(), ConnectorError>;
}

/// Log ingestion endpoint.
#[async_trait]
pub trait LogApi: Send + Sync {
    /// Store `log_entries`.
    async fn send_logs(&self, log_entries: Vec<LogEntry>) -> Result<(), ConnectorError>;
}

#[async_trait]
impl LogApi for RestApiClient {
    async fn send_logs(&self, log_entries: Vec<LogEntry>) -> Result<(), ConnectorError> {
        RestApiClient::send_logs(self, log_entries).await
    }
}

/// [LogForwarder] posting errored `.finished` events and `.error.log` events
/// as log entries.
pub struct ControlPlaneLogForwarder {
    log_api: Arc<dyn LogApi>,
}

impl ControlPlaneLogForwarder {
    /// Return a new instance.
    pub fn new(log_api: Arc<dyn LogApi>) -> Self {
        Self { log_api }
    }

    /// Return the log entry to create for `event` if any.
    fn log_entry(event: &KeptnEvent, integration_id: &str) -> Option<LogEntry> {
        let event_type = event.event_type();
        let task_prefix = if let Some(prefix) = event_type.strip_suffix(ERROR_LOG_SUFFIX) {
            prefix
        } else if let Some(prefix) = event_type.strip_suffix(FINISHED_SUFFIX) {
            if event.event_data().status != STATUS_ERRORED {
                return None;
            }
            prefix
        } else {
            return None;
        };
        let task = task_prefix
            .rsplit('.')
            .next()
            .filter(|task| !task.is_empty())
            .map(str::to_owned);
        Some(LogEntry {
            integrationid: integration_id.to_owned(),
            message: event.event_data().message,
            time: Utc::now(),
            shkeptncontext: event.shkeptncontext.clone(),
            task,
            triggeredid: event.triggeredid.clone(),
        })
    }
}

#[async_trait]
impl LogForwarder for ControlPlaneLogForwarder {
    async fn forward(
        &self,
        event: &KeptnEvent,
        integration_id: &str,
    ) -> Result<(), ConnectorError> {
        let Some(log_entry) = Self::log_entry(event, integration_id) else {
            return Ok(());
        };
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Forwarding log of '{}' for task {:?}.",
                event.event_type(),
                log_entry.task
            );
        }
        self.log_api.send_logs(vec![log_entry]).await
    }
}
