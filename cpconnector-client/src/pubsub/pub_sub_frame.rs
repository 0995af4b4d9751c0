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

//! WebSocket frames exchanged with the pub/sub broker.

use serde::Deserialize;
use serde::Serialize;

/// WebSocket messages sent from client to broker.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PubSubCommand {
    /// Start receiving messages published on `subject`.
    Subscribe {
        /// Subject to subscribe to.
        subject: String,
        /// Messages are load-balanced between members of the same group.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue_group: Option<String>,
    },
    /// Stop receiving messages published on `subject`.
    Unsubscribe {
        /// Previously subscribed subject.
        subject: String,
    },
    /// Publish a message.
    Publish {
        /// Target subject.
        subject: String,
        /// Message payload.
        payload: String,
    },
}

/// WebSocket messages sent from broker to client.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PubSubDelivery {
    /// Delivery of a message published on a subscribed subject.
    Message {
        /// Subject the message was published on.
        subject: String,
        /// Message payload.
        payload: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let command = PubSubCommand::Subscribe {
            subject: "sh.keptn.event.echo.triggered".to_owned(),
            queue_group: Some("echo-service".to_owned()),
        };
        assert_eq!(
            serde_json::to_string(&command).unwrap(),
            r#"{"subscribe":{"subject":"sh.keptn.event.echo.triggered","queue_group":"echo-service"}}"#
        );
        let command = PubSubCommand::Subscribe {
            subject: "a".to_owned(),
            queue_group: None,
        };
        assert_eq!(
            serde_json::to_string(&command).unwrap(),
            r#"{"subscribe":{"subject":"a"}}"#
        );
        let delivery: PubSubDelivery =
            serde_json::from_str(r#"{"message":{"subject":"a","payload":"{}"}}"#).unwrap();
        assert_eq!(
            delivery,
            PubSubDelivery::Message {
                subject: "a".to_owned(),
                payload: "{}".to_owned()
            }
        );
    }
}
