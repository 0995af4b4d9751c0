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

pub mod authentication {
    //! Control plane API authentication.

    mod api_token_cache;

    pub use self::api_token_cache::*;
}
pub mod model {
    //! Documents exchanged with the control plane.

    mod events_page;
    mod integration;
    mod keptn_event;
    mod log_entry;

    pub use self::events_page::*;
    pub use self::integration::*;
    pub use self::keptn_event::*;
    pub use self::log_entry::*;
}
mod connector_error;
pub mod pubsub;
mod rest_api_client;
pub mod time;

pub use connector_error::ConnectorError;
pub use connector_error::ConnectorErrorKind;
pub use rest_api_client::RestApiClient;
