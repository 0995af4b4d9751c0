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

//! Paginated event query results.

use super::KeptnEvent;
use serde::Deserialize;
use serde::Serialize;

/// A page of events returned by the event query endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    /// Events of this page.
    #[serde(default)]
    pub events: Vec<KeptnEvent>,
    /// Key of the next page. Empty or absent on the last page.
    #[serde(default)]
    pub next_page_key: Option<String>,
    /// Size of the returned page.
    #[serde(default)]
    pub page_size: Option<f64>,
    /// Total number of events.
    #[serde(default)]
    pub total_count: Option<f64>,
}

impl EventsPage {
    /// Return the key of the next page if there is one.
    pub fn next_page(&self) -> Option<&str> {
        self.next_page_key
            .as_deref()
            .filter(|key| !key.is_empty() && *key != "0")
    }
}
