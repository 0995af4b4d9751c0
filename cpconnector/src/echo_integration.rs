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

//! Integration answering task events.

use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::model::KeptnEvent;
use cpconnector_client::model::RegistrationData;
use cpconnector_core::EventContext;
use cpconnector_core::Integration;
use serde_json::json;

const TRIGGERED_SUFFIX: &str = ".triggered";

/// Answers every `.triggered` event with a `.started` and a successful
/// `.finished` event.
pub struct EchoIntegration {
    registration_data: RegistrationData,
}

impl EchoIntegration {
    /// Return a new instance.
    pub fn new(registration_data: RegistrationData) -> Self {
        Self { registration_data }
    }

    /// Response of type `{task}.{phase}` to `triggered`.
    fn response(&self, triggered: &KeptnEvent, task_prefix: &str, phase: &str) -> KeptnEvent {
        let event_data = triggered.event_data();
        let mut data = json!({
            "project": event_data.project,
            "stage": event_data.stage,
            "service": event_data.service,
        });
        if phase == "finished" {
            data["status"] = json!("succeeded");
            data["result"] = json!("pass");
        }
        let mut event = KeptnEvent::new(&format!("{task_prefix}.{phase}"), data);
        event.source = Some(self.registration_data.name.to_owned());
        event.shkeptncontext = triggered.shkeptncontext.clone();
        event.triggeredid = triggered.id.clone();
        event.gitcommitid = triggered.gitcommitid.clone();
        event
    }
}

#[async_trait]
impl Integration for EchoIntegration {
    async fn on_event(
        &self,
        context: EventContext,
        event: KeptnEvent,
    ) -> Result<(), ConnectorError> {
        let Some(task_prefix) = event.event_type().strip_suffix(TRIGGERED_SUFFIX) else {
            log::debug!("Ignoring event of type '{}'.", event.event_type());
            return Ok(());
        };
        log::info!("Handling '{}' with id '{}'.", event.event_type(), event.id());
        context
            .send_event(self.response(&event, task_prefix, "started"))
            .await?;
        context
            .send_event(self.response(&event, task_prefix, "finished"))
            .await
    }

    fn registration_data(&self) -> RegistrationData {
        self.registration_data.clone()
    }
}
