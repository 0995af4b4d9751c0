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

pub mod conf;
pub mod control_plane;
pub mod event_matcher;
pub mod event_source;
pub mod log_forwarder;
pub mod subscription_source;
pub mod util {
    //! Utilities

    mod completion_counter;
    mod retry;

    pub use self::completion_counter::*;
    pub use self::retry::*;
}

pub use self::conf::AppConfig;
pub use self::control_plane::ControlPlane;
pub use self::control_plane::EventContext;
pub use self::control_plane::Integration;
pub use self::event_matcher::EventMatcher;
pub use self::event_source::EventSource;
pub use self::log_forwarder::LogForwarder;
pub use self::subscription_source::SubscriptionSource;
