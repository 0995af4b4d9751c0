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

//! CloudEvent shaped event exchanged with the control plane.

use crate::ConnectorError;
use crate::ConnectorErrorKind;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use tyst::Tyst;

/// CloudEvents specification version used for published events.
pub const CLOUD_EVENTS_VERSION_V1: &str = "1.0";

/// Key in the data section under which temporary data is kept.
const TEMPORARY_DATA_ROOT_KEY: &str = "temporaryData";

/// CloudEvent extended with the Keptn context attributes.
///
/// Apart from `type`, `id` and `shkeptncontext` the connector treats the
/// event as opaque.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct KeptnEvent {
    /// Content type of `data`.
    pub contenttype: Option<String>,
    /// Free-form event payload.
    #[serde(default)]
    pub data: Value,
    /// CloudEvent extensions.
    pub extensions: Option<Value>,
    /// Unique event identifier.
    pub id: Option<String>,
    /// Correlation identifier that groups events of the same workflow.
    pub shkeptncontext: Option<String>,
    /// Keptn specification version.
    pub shkeptnspecversion: Option<String>,
    /// Producer of the event.
    pub source: Option<String>,
    /// CloudEvents specification version.
    pub specversion: Option<String>,
    /// Creation time.
    pub time: Option<DateTime<Utc>>,
    /// Identifier of the `.triggered` event this event responds to.
    pub triggeredid: Option<String>,
    /// Git commit the event refers to.
    pub gitcommitid: Option<String>,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

/// Common fields found in the data section of most events.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EventData {
    /// Project name.
    #[serde(default)]
    pub project: String,
    /// Stage name.
    #[serde(default)]
    pub stage: String,
    /// Service name.
    #[serde(default)]
    pub service: String,
    /// Task status, e.g. `succeeded` or `errored`.
    #[serde(default)]
    pub status: String,
    /// Task result, e.g. `pass` or `fail`.
    #[serde(default)]
    pub result: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
}

impl KeptnEvent {
    /// Return a new instance with the given type and payload.
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: Some(event_type.to_owned()),
            data,
            ..Self::default()
        }
    }

    /// Event type or an empty string if not set.
    pub fn event_type(&self) -> &str {
        self.event_type.as_deref().unwrap_or_default()
    }

    /// Event identifier or an empty string if not set.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Return the typed common fields of the data section.
    ///
    /// Missing fields are empty and a data section that is not an object
    /// yields the default.
    pub fn event_data(&self) -> EventData {
        serde_json::from_value(self.data.clone()).unwrap_or_default()
    }

    /// Populate `out` with the data section.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ConnectorError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            ConnectorErrorKind::Serialization.error_with_source("Unable to decode event data.", e)
        })
    }

    /// Add temporary data under `data.temporaryData.{key}`.
    ///
    /// Fails if the key already exists and `overwrite_if_existing` is `false`.
    pub fn add_temporary_data<T: Serialize>(
        &mut self,
        key: &str,
        temporary_data: T,
        overwrite_if_existing: bool,
    ) -> Result<(), ConnectorError> {
        let value = serde_json::to_value(temporary_data).map_err(|e| {
            ConnectorErrorKind::Serialization
                .error_with_source("Unable to encode temporary data.", e)
        })?;
        if self.data.is_null() {
            self.data = Value::Object(Map::new());
        }
        let Value::Object(data) = &mut self.data else {
            return Err(ConnectorErrorKind::InvalidEventData
                .error_with_msg("Event data is not a JSON object."));
        };
        let root = data
            .entry(TEMPORARY_DATA_ROOT_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(root) = root else {
            return Err(ConnectorErrorKind::InvalidEventData
                .error_with_msg("Temporary data is not a JSON object."));
        };
        if root.contains_key(key) && !overwrite_if_existing {
            return Err(ConnectorErrorKind::InvalidEventData
                .error_with_msg(format!("Key '{key}' already exists.")));
        }
        root.insert(key.to_owned(), value);
        Ok(())
    }

    /// Return the temporary data stored under `key`.
    pub fn temporary_data<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConnectorError> {
        self.data
            .get(TEMPORARY_DATA_ROOT_KEY)
            .and_then(|root| root.get(key))
            .ok_or_else(|| {
                ConnectorErrorKind::InvalidEventData
                    .error_with_msg(format!("Temporary data with key '{key}' not found."))
            })
            .and_then(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    ConnectorErrorKind::Serialization
                        .error_with_source("Unable to decode temporary data.", e)
                })
            })
    }

    /// Check that `time`, `type`, `id` and `source` are present and
    /// non-empty.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.time.is_none() {
            return Err(
                ConnectorErrorKind::InvalidEventData.error_with_msg("time must be specified")
            );
        }
        if self.event_type().is_empty() {
            return Err(
                ConnectorErrorKind::EventTypeMissing.error_with_msg("type must be specified")
            );
        }
        if self.id().is_empty() {
            return Err(ConnectorErrorKind::InvalidEventData.error_with_msg("id must be specified"));
        }
        if self.source.as_deref().is_none_or(str::is_empty) {
            return Err(
                ConnectorErrorKind::InvalidEventData.error_with_msg("source must be specified")
            );
        }
        Ok(())
    }

    /// Populate the attributes that must always be present on outgoing
    /// events.
    ///
    /// Fails if the event has no type.
    pub fn prepare_for_publish(&mut self) -> Result<(), ConnectorError> {
        if self.event_type().is_empty() {
            return Err(ConnectorErrorKind::EventTypeMissing.error());
        }
        self.specversion = Some(CLOUD_EVENTS_VERSION_V1.to_owned());
        if self.id().is_empty() {
            self.id = Some(Self::generate_id());
        }
        if self.time.is_none() {
            self.time = Some(Utc::now());
        }
        Ok(())
    }

    /// Generate a random (version 4) UUID.
    fn generate_id() -> String {
        let mut bytes = [0u8; 16];
        Tyst::instance().prng_fill_with_random(None, &mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let hex = bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}
