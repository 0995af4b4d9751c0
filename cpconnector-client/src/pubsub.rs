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

//! Subject based publish/subscribe transport.

mod pub_sub_frame;
mod web_socket_connection;
mod web_socket_pub_sub;

pub use self::pub_sub_frame::PubSubCommand;
pub use self::pub_sub_frame::PubSubDelivery;
pub use self::web_socket_pub_sub::WebSocketPubSub;

use crate::ConnectorError;
use crate::model::KeptnEvent;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Message received on a subscribed subject.
#[derive(Clone, Debug, PartialEq)]
pub struct PubSubMessage {
    /// Subject the message was published on.
    pub subject: String,
    /// Raw message payload. Usually a JSON encoded [KeptnEvent].
    pub payload: String,
}

/// Publish/subscribe transport capability.
///
/// At most one subscription per subject is allowed. Received messages are
/// written to the channel given when subscribing.
#[async_trait]
pub trait PubSubConnector: Send + Sync {
    /// Subscribe to `subject`.
    async fn subscribe(
        &self,
        subject: &str,
        tx: UnboundedSender<PubSubMessage>,
    ) -> Result<(), ConnectorError>;

    /// Subscribe to `subject` as a member of `queue_group`.
    ///
    /// Each message is delivered to only one member of the group.
    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        tx: UnboundedSender<PubSubMessage>,
    ) -> Result<(), ConnectorError>;

    /// Subscribe to all `subjects` as a member of `queue_group`.
    ///
    /// Stops at the first failing subject.
    async fn queue_subscribe_multiple(
        &self,
        subjects: &[String],
        queue_group: &str,
        tx: UnboundedSender<PubSubMessage>,
    ) -> Result<(), ConnectorError>;

    /// Remove all subscriptions.
    async fn unsubscribe_all(&self) -> Result<(), ConnectorError>;

    /// Publish `event` on the subject named by its type.
    async fn publish(&self, event: &KeptnEvent) -> Result<(), ConnectorError>;

    /// Close the connection to the transport.
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    /// Wait until the current connection to the transport is lost.
    ///
    /// Subscriptions do not survive a lost connection. Returns immediately
    /// when there is no connection.
    async fn await_connection_loss(&self);
}
