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

//! Log entries shipped to the control plane.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A single log message on behalf of an integration.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LogEntry {
    /// Identifier of the integration the message belongs to.
    pub integrationid: String,
    /// The message.
    pub message: String,
    /// Time of the message.
    pub time: DateTime<Utc>,
    /// Correlation identifier of the event sequence.
    pub shkeptncontext: Option<String>,
    /// Name of the task that failed.
    pub task: Option<String>,
    /// Identifier of the `.triggered` event of the task.
    pub triggeredid: Option<String>,
}

/// Request body for creating log entries.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateLogsRequest {
    /// The entries to create.
    pub logs: Vec<LogEntry>,
}
