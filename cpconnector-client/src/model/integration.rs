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

//! Integration registration records and event subscriptions.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Registration of an integration at the control plane.
///
/// The same document is sent when registering and returned when the
/// registration is renewed (with the current subscriptions).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RegistrationData {
    /// Identifier assigned by the control plane. `None` before registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the integration. Also used as queue group on pub/sub
    /// transports.
    pub name: String,
    /// Host and runtime information.
    #[serde(default)]
    pub metadata: MetaData,
    /// Event subscriptions.
    #[serde(default)]
    pub subscriptions: Vec<EventSubscription>,
}

impl RegistrationData {
    /// Identifier assigned by the control plane or an empty string.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}

/// Host and runtime information about the integration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct MetaData {
    /// Host name. Usually the Kubernetes node name.
    #[serde(default)]
    pub hostname: String,
    /// Version of the integration.
    #[serde(default)]
    pub integrationversion: String,
    /// Version of the connector implementation.
    #[serde(default)]
    pub distributorversion: String,
    /// Hint where the integration runs, e.g. `control-plane` or
    /// `remote-execution-plane`.
    #[serde(default)]
    pub location: String,
    /// Kubernetes specific information.
    #[serde(default)]
    pub kubernetesmetadata: KubernetesMetaData,
    /// Last time the control plane heard from the integration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastseen: Option<DateTime<Utc>>,
}

/// Kubernetes specific information.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct KubernetesMetaData {
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// Pod name.
    #[serde(default)]
    pub podname: String,
    /// Deployment name.
    #[serde(default)]
    pub deploymentname: String,
}

/// Description of what events an integration wants to receive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventSubscription {
    /// Subscription identifier.
    #[serde(default)]
    pub id: String,
    /// Event type.
    #[serde(default)]
    pub event: String,
    /// Further restrictions on the delivered events.
    #[serde(default)]
    pub filter: EventSubscriptionFilter,
}

impl EventSubscription {
    /// Return a new subscription for `event` without any filter.
    pub fn for_event_type(id: &str, event: &str) -> Self {
        Self {
            id: id.to_owned(),
            event: event.to_owned(),
            filter: EventSubscriptionFilter::default(),
        }
    }
}

/// Restrictions by project, stage and service.
///
/// An empty list allows every value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventSubscriptionFilter {
    /// Allowed projects.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub projects: Vec<String>,
    /// Allowed stages.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stages: Vec<String>,
    /// Allowed services.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub services: Vec<String>,
}

/// Treat an explicit JSON `null` list as empty.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Response to a successful registration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RegisterIntegrationResponse {
    /// Identifier assigned by the control plane.
    pub id: String,
}

/// Subscription information stamped onto events before they are handed to
/// the application.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AdditionalSubscriptionData {
    /// The subscription the event was matched against.
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
}
