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

//! Connection of an integration to the control plane.
//!
//! The [ControlPlane] registers the integration, starts a
//! [SubscriptionSource] and an [EventSource] and dispatches every inbound
//! event that matches a current subscription to the [Integration].

use crate::event_matcher::EventMatcher;
use crate::event_source::EventSender;
use crate::event_source::EventSource;
use crate::event_source::EventUpdate;
use crate::log_forwarder::LogForwarder;
use crate::subscription_source::SubscriptionSource;
use crate::util::CompletionCounter;
use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::ConnectorErrorKind;
use cpconnector_client::model::AdditionalSubscriptionData;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::KeptnEvent;
use cpconnector_client::model::RegistrationData;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Temporary data key of the [AdditionalSubscriptionData] stamped on
/// dispatched events.
pub const DISTRIBUTOR_KEY: &str = "distributor";

/// Application logic receiving events from the control plane.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Handle an event matching one of the integration's subscriptions.
    ///
    /// Return an error of the kind [ConnectorErrorKind::FatalEventHandling]
    /// (anywhere in the source chain) to stop the [ControlPlane].
    async fn on_event(&self, context: EventContext, event: KeptnEvent)
    -> Result<(), ConnectorError>;

    /// Initial registration record of the integration.
    fn registration_data(&self) -> RegistrationData;
}

/// Handed to [Integration::on_event] with every event.
#[derive(Clone)]
pub struct EventContext {
    cancellation_token: CancellationToken,
    sender: Arc<dyn EventSender>,
}

impl EventContext {
    /// Return a new instance.
    pub fn new(cancellation_token: CancellationToken, sender: Arc<dyn EventSender>) -> Self {
        Self {
            cancellation_token,
            sender,
        }
    }

    /// Cancelled when the connector shuts down.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Sender for response events.
    pub fn sender(&self) -> &Arc<dyn EventSender> {
        &self.sender
    }

    /// Send a response event.
    pub async fn send_event(&self, event: KeptnEvent) -> Result<(), ConnectorError> {
        self.sender.send_event(event).await
    }
}

/// Lifecycle of a [ControlPlane].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorState {
    /// Not connected. Initial and final state.
    Unregistered,
    /// Registration at the control plane is in progress.
    Registering,
    /// Receiving and dispatching events.
    Registered,
    /// Waiting for sources and event handlers to finish.
    Draining,
}

struct SharedState {
    state: ConnectorState,
    integration_id: String,
    subscriptions: Vec<EventSubscription>,
}

/// Offers sent events to a [LogForwarder] before handing them to the
/// transport.
struct ForwardingEventSender {
    log_forwarder: Arc<dyn LogForwarder>,
    integration_id: String,
    sender: Arc<dyn EventSender>,
}

#[async_trait]
impl EventSender for ForwardingEventSender {
    async fn send_event(&self, event: KeptnEvent) -> Result<(), ConnectorError> {
        if let Err(e) = self
            .log_forwarder
            .forward(&event, &self.integration_id)
            .await
        {
            log::warn!("Could not forward event '{}' to log: {e}", event.id());
        }
        self.sender.send_event(event).await
    }
}

/// Connects an [Integration] to the control plane.
pub struct ControlPlane {
    subscription_source: Arc<dyn SubscriptionSource>,
    event_source: Arc<dyn EventSource>,
    log_forwarder: Option<Arc<dyn LogForwarder>>,
    shared_state: RwLock<SharedState>,
    event_handlers: Arc<CompletionCounter>,
}

impl ControlPlane {
    /// Return a new instance.
    ///
    /// Without a `log_forwarder` sent events go straight to the transport.
    pub fn new(
        subscription_source: Arc<dyn SubscriptionSource>,
        event_source: Arc<dyn EventSource>,
        log_forwarder: Option<Arc<dyn LogForwarder>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscription_source,
            event_source,
            log_forwarder,
            shared_state: RwLock::new(SharedState {
                state: ConnectorState::Unregistered,
                integration_id: String::new(),
                subscriptions: Vec::new(),
            }),
            event_handlers: CompletionCounter::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectorState {
        self.shared_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Return `true` when registered and dispatching events.
    pub fn is_registered(&self) -> bool {
        self.state() == ConnectorState::Registered
    }

    /// Identifier assigned at the last registration.
    pub fn integration_id(&self) -> String {
        self.shared_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .integration_id
            .to_owned()
    }

    /// Current subscription snapshot.
    pub fn subscriptions(&self) -> Vec<EventSubscription> {
        self.shared_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions
            .clone()
    }

    fn set_state(&self, state: ConnectorState) {
        self.shared_state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
    }

    /// Register `integration` and dispatch events until `cancellation_token`
    /// is cancelled or a component fails.
    ///
    /// Returns `Ok` after a graceful shutdown and the failure that caused
    /// the shutdown otherwise. Either way, sources and event handlers have
    /// finished when this returns.
    pub async fn register(
        &self,
        cancellation_token: CancellationToken,
        integration: Arc<dyn Integration>,
    ) -> Result<(), ConnectorError> {
        {
            let mut shared_state = self
                .shared_state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if shared_state.state != ConnectorState::Unregistered {
                return Err(ConnectorErrorKind::RegistrationFailed.error_with_msg(format!(
                    "Control plane is already in state {:?}.",
                    shared_state.state
                )));
            }
            shared_state.state = ConnectorState::Registering;
        }
        let mut registration_data = integration.registration_data();
        log::debug!("Registering integration '{}'.", registration_data.name);
        let integration_id = match self.subscription_source.register(&registration_data).await {
            Ok(integration_id) => integration_id,
            Err(e) => {
                self.set_state(ConnectorState::Unregistered);
                return Err(ConnectorErrorKind::RegistrationFailed
                    .error_with_source("Could not register integration.", e));
            }
        };
        log::debug!("Registered with integration id '{integration_id}'.");
        registration_data.id = Some(integration_id.to_owned());
        {
            let mut shared_state = self
                .shared_state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            shared_state.integration_id = integration_id.to_owned();
            shared_state.subscriptions.clear();
        }
        let (event_updates_tx, mut event_updates_rx) = mpsc::unbounded_channel();
        let (subscription_updates_tx, mut subscription_updates_rx) = mpsc::unbounded_channel();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let sources = CompletionCounter::new();
        if let Err(e) = self
            .event_source
            .start(
                cancellation_token.clone(),
                registration_data.clone(),
                event_updates_tx,
                error_tx.clone(),
                sources.guard(),
            )
            .await
        {
            log::error!("Unable to start event source: {e}");
            sources.wait_for_zero().await;
            self.set_state(ConnectorState::Unregistered);
            return Err(e);
        }
        log::debug!("Event source started for integration id '{integration_id}'.");
        if let Err(e) = self
            .subscription_source
            .start(
                cancellation_token.clone(),
                registration_data,
                subscription_updates_tx,
                error_tx.clone(),
                sources.guard(),
            )
            .await
        {
            log::error!("Unable to start subscription source: {e}");
            self.shutdown(&sources).await;
            return Err(e);
        }
        log::debug!("Subscription source started.");
        self.set_state(ConnectorState::Registered);
        let sender = self.event_sender(&integration_id);
        let res = loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    log::info!("Control plane connection cancelled. Unregistering.");
                    break Ok(());
                }
                Some(e) = error_rx.recv() => {
                    log::error!("Stopping control plane connection due to error: {e}");
                    break Err(e);
                }
                Some(subscriptions) = subscription_updates_rx.recv() => {
                    self.on_subscription_update(subscriptions).await;
                }
                Some(event_update) = event_updates_rx.recv() => {
                    self.dispatch(
                        event_update,
                        &integration,
                        &cancellation_token,
                        &sender,
                        &error_tx,
                    );
                }
            }
        };
        self.shutdown(&sources).await;
        res
    }

    /// Replace the subscription snapshot and tell the event source.
    async fn on_subscription_update(&self, subscriptions: Vec<EventSubscription>) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Got a subscription update with {} subscriptions.",
                subscriptions.len()
            );
        }
        self.shared_state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions = subscriptions.clone();
        self.event_source.on_subscription_update(&subscriptions).await;
    }

    /// Sender handed to event handlers.
    fn event_sender(&self, integration_id: &str) -> Arc<dyn EventSender> {
        let sender = self.event_source.sender();
        match &self.log_forwarder {
            Some(log_forwarder) => Arc::new(ForwardingEventSender {
                log_forwarder: Arc::clone(log_forwarder),
                integration_id: integration_id.to_owned(),
                sender,
            }),
            None => sender,
        }
    }

    /// Run the integration's handler once per matching subscription.
    fn dispatch(
        &self,
        event_update: EventUpdate,
        integration: &Arc<dyn Integration>,
        cancellation_token: &CancellationToken,
        sender: &Arc<dyn EventSender>,
        error_tx: &UnboundedSender<ConnectorError>,
    ) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Received event '{}' of type '{}'.",
                event_update.event.id(),
                event_update.event.event_type()
            );
        }
        let subscription_ids = match event_update.subscription_id {
            Some(subscription_id) => vec![subscription_id],
            None => self
                .shared_state
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .subscriptions
                .iter()
                .filter(|subscription| subscription.event == event_update.subject)
                .filter(|subscription| EventMatcher::new(subscription).matches(&event_update.event))
                .map(|subscription| subscription.id.to_owned())
                .collect(),
        };
        for subscription_id in subscription_ids {
            log::info!(
                "Forwarding event '{}' matching subscription '{subscription_id}'.",
                event_update.event.id()
            );
            let mut event = event_update.event.clone();
            if let Err(e) = event.add_temporary_data(
                DISTRIBUTOR_KEY,
                AdditionalSubscriptionData { subscription_id },
                true,
            ) {
                log::warn!("Could not append subscription data to event: {e}");
            }
            let context = EventContext::new(cancellation_token.clone(), Arc::clone(sender));
            let integration = Arc::clone(integration);
            let error_tx = error_tx.clone();
            let event_handler_guard = self.event_handlers.guard();
            tokio::spawn(async move {
                let event_id = event.id().to_owned();
                if let Err(e) = integration.on_event(context, event).await {
                    if e.is_fatal() {
                        log::error!("Fatal error during handling of event '{event_id}': {e}");
                        if error_tx.send(e).is_err() {
                            log::debug!("Error channel is closed.");
                        }
                    } else {
                        log::warn!("Error during handling of event '{event_id}': {e}");
                    }
                }
                drop(event_handler_guard);
            });
        }
    }

    /// Stop the sources, drain and clean up.
    async fn shutdown(&self, sources: &CompletionCounter) {
        self.set_state(ConnectorState::Draining);
        log::info!("Stopping subscription source.");
        if let Err(e) = self.subscription_source.stop() {
            log::warn!("Unable to stop subscription source: {e}");
        }
        log::info!("Stopping event source.");
        if let Err(e) = self.event_source.stop() {
            log::warn!("Unable to stop event source: {e}");
        }
        sources.wait_for_zero().await;
        log::info!(
            "Waiting for {} event handlers to finish.",
            self.event_handlers.outstanding()
        );
        self.event_handlers.wait_for_zero().await;
        log::info!("Cleaning up event source.");
        if let Err(e) = self.event_source.cleanup().await {
            log::warn!("Unable to clean up event source: {e}");
        }
        self.set_state(ConnectorState::Unregistered);
    }
}

/// Run `control_plane` until SIGHUP, SIGINT, SIGQUIT or SIGTERM is received.
///
/// The process exits with a failure code if the shutdown does not complete
/// within `shutdown_timeout` after the signal.
pub async fn run_with_graceful_shutdown(
    control_plane: &ControlPlane,
    integration: Arc<dyn Integration>,
    shutdown_timeout: Duration,
) -> Result<(), ConnectorError> {
    let cancellation_token = CancellationToken::new();
    let done_token = CancellationToken::new();
    let signal_cancellation_token = cancellation_token.clone();
    let signal_done_token = done_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal_done_token.cancelled() => return,
            res = block_until_signaled() => {
                if let Err(e) = res {
                    log::error!("Unable to listen for signals: {e}");
                    return;
                }
            }
        }
        signal_cancellation_token.cancel();
        tokio::select! {
            _ = signal_done_token.cancelled() => {}
            _ = tokio::time::sleep(shutdown_timeout) => {
                log::error!("Failed to shut down gracefully within {shutdown_timeout:?}.");
                std::process::exit(1);
            }
        }
    });
    let res = control_plane.register(cancellation_token, integration).await;
    done_token.cancel();
    res
}

/// Block until a termination signal is received.
async fn block_until_signaled() -> Result<(), std::io::Error> {
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sighup.recv() => log::debug!("SIGHUP received."),
        _ = sigint.recv() => log::debug!("SIGINT received."),
        _ = sigquit.recv() => log::debug!("SIGQUIT received."),
        _ = sigterm.recv() => log::debug!("SIGTERM received."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription_source::UniformApi;
    use crate::subscription_source::UniformSubscriptionSource;
    use crate::util::CompletionGuard;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }

    /// Shared record of observable calls in order.
    #[derive(Default)]
    struct CallLog(Mutex<Vec<String>>);

    impl CallLog {
        fn push(&self, call: &str) {
            self.0.lock().unwrap().push(call.to_owned());
        }

        fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }
    }

    struct MockSubscriptionSource {
        integration_id: Option<String>,
        fail_start: bool,
        subscriptions: Vec<EventSubscription>,
        stop_token: Mutex<Option<CancellationToken>>,
        calls: Arc<CallLog>,
    }

    impl MockSubscriptionSource {
        fn new(subscriptions: Vec<EventSubscription>, calls: &Arc<CallLog>) -> Self {
            Self {
                integration_id: Some("X".to_owned()),
                fail_start: false,
                subscriptions,
                stop_token: Mutex::new(None),
                calls: Arc::clone(calls),
            }
        }
    }

    #[async_trait]
    impl SubscriptionSource for MockSubscriptionSource {
        async fn register(
            &self,
            registration_data: &RegistrationData,
        ) -> Result<String, ConnectorError> {
            self.calls.push("subscription_source.register");
            assert_eq!(registration_data.name, "integration");
            self.integration_id
                .clone()
                .ok_or_else(|| ConnectorErrorKind::Transport.error_with_msg("unreachable"))
        }

        async fn start(
            &self,
            cancellation_token: CancellationToken,
            registration_data: RegistrationData,
            updates_tx: UnboundedSender<Vec<EventSubscription>>,
            _error_tx: UnboundedSender<ConnectorError>,
            completion_guard: CompletionGuard,
        ) -> Result<(), ConnectorError> {
            self.calls.push("subscription_source.start");
            assert_eq!(registration_data.id(), "X");
            if self.fail_start {
                return Err(ConnectorErrorKind::Transport.error_with_msg("start failed"));
            }
            let cancellation_token = cancellation_token.child_token();
            *self.stop_token.lock().unwrap() = Some(cancellation_token.clone());
            let subscriptions = self.subscriptions.clone();
            tokio::spawn(async move {
                let _ = updates_tx.send(subscriptions);
                cancellation_token.cancelled().await;
                drop(completion_guard);
            });
            Ok(())
        }

        fn stop(&self) -> Result<(), ConnectorError> {
            self.calls.push("subscription_source.stop");
            if let Some(stop_token) = self.stop_token.lock().unwrap().as_ref() {
                stop_token.cancel();
            }
            Ok(())
        }
    }

    struct MockEventSender {
        calls: Arc<CallLog>,
    }

    #[async_trait]
    impl EventSender for MockEventSender {
        async fn send_event(&self, event: KeptnEvent) -> Result<(), ConnectorError> {
            self.calls.push(&format!("send:{}", event.event_type()));
            Ok(())
        }
    }

    struct MockEventSource {
        updates_tx: Mutex<Option<UnboundedSender<EventUpdate>>>,
        error_tx: Mutex<Option<UnboundedSender<ConnectorError>>>,
        stop_token: Mutex<Option<CancellationToken>>,
        subscription_updates: Mutex<Vec<Vec<EventSubscription>>>,
        started: Notify,
        calls: Arc<CallLog>,
    }

    impl MockEventSource {
        fn new(calls: &Arc<CallLog>) -> Arc<Self> {
            Arc::new(Self {
                updates_tx: Mutex::new(None),
                error_tx: Mutex::new(None),
                stop_token: Mutex::new(None),
                subscription_updates: Mutex::new(Vec::new()),
                started: Notify::new(),
                calls: Arc::clone(calls),
            })
        }

        /// Wait until the first subscription update was received.
        async fn await_subscription_update(&self) {
            loop {
                if !self.subscription_updates.lock().unwrap().is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        fn deliver(&self, event_update: EventUpdate) {
            self.updates_tx
                .lock()
                .unwrap()
                .as_ref()
                .unwrap()
                .send(event_update)
                .unwrap();
        }
    }

    #[async_trait]
    impl EventSource for MockEventSource {
        async fn start(
            &self,
            cancellation_token: CancellationToken,
            _registration_data: RegistrationData,
            updates_tx: UnboundedSender<EventUpdate>,
            error_tx: UnboundedSender<ConnectorError>,
            completion_guard: CompletionGuard,
        ) -> Result<(), ConnectorError> {
            self.calls.push("event_source.start");
            let cancellation_token = cancellation_token.child_token();
            *self.stop_token.lock().unwrap() = Some(cancellation_token.clone());
            *self.updates_tx.lock().unwrap() = Some(updates_tx);
            *self.error_tx.lock().unwrap() = Some(error_tx);
            tokio::spawn(async move {
                cancellation_token.cancelled().await;
                drop(completion_guard);
            });
            self.started.notify_one();
            Ok(())
        }

        async fn on_subscription_update(&self, subscriptions: &[EventSubscription]) {
            self.subscription_updates
                .lock()
                .unwrap()
                .push(subscriptions.to_vec());
        }

        fn sender(&self) -> Arc<dyn EventSender> {
            Arc::new(MockEventSender {
                calls: Arc::clone(&self.calls),
            })
        }

        fn stop(&self) -> Result<(), ConnectorError> {
            self.calls.push("event_source.stop");
            if let Some(stop_token) = self.stop_token.lock().unwrap().as_ref() {
                stop_token.cancel();
            }
            Ok(())
        }

        async fn cleanup(&self) -> Result<(), ConnectorError> {
            self.calls.push("event_source.cleanup");
            Ok(())
        }
    }

    enum Behavior {
        Succeed,
        Fail,
        FailFatal,
        BlockUntilReleased(Arc<Notify>),
        Respond,
    }

    struct MockIntegration {
        behavior: Behavior,
        received: Mutex<Vec<KeptnEvent>>,
        calls: Arc<CallLog>,
    }

    impl MockIntegration {
        fn new(behavior: Behavior, calls: &Arc<CallLog>) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                received: Mutex::new(Vec::new()),
                calls: Arc::clone(calls),
            })
        }

        fn received(&self) -> Vec<KeptnEvent> {
            self.received.lock().unwrap().clone()
        }

        async fn await_received(&self, count: usize) {
            loop {
                if self.received.lock().unwrap().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[async_trait]
    impl Integration for MockIntegration {
        async fn on_event(
            &self,
            context: EventContext,
            event: KeptnEvent,
        ) -> Result<(), ConnectorError> {
            self.received.lock().unwrap().push(event);
            match &self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(ConnectorErrorKind::Unspecified.error_with_msg("oops")),
                Behavior::FailFatal => Err(ConnectorErrorKind::Unspecified.error_with_source(
                    "handler gave up",
                    ConnectorErrorKind::FatalEventHandling.error(),
                )),
                Behavior::BlockUntilReleased(release) => {
                    release.notified().await;
                    self.calls.push("integration.on_event.done");
                    Ok(())
                }
                Behavior::Respond => {
                    context
                        .send_event(KeptnEvent::new(
                            "sh.keptn.event.echo.finished",
                            json!({"status": "errored", "message": "failed"}),
                        ))
                        .await
                }
            }
        }

        fn registration_data(&self) -> RegistrationData {
            RegistrationData {
                name: "integration".to_owned(),
                ..RegistrationData::default()
            }
        }
    }

    struct MockLogForwarder {
        calls: Arc<CallLog>,
    }

    #[async_trait]
    impl LogForwarder for MockLogForwarder {
        async fn forward(
            &self,
            event: &KeptnEvent,
            integration_id: &str,
        ) -> Result<(), ConnectorError> {
            self.calls
                .push(&format!("forward:{}:{integration_id}", event.event_type()));
            Err(ConnectorErrorKind::Transport.error_with_msg("log endpoint down"))
        }
    }

    fn event_update(event_type: &str, subscription_id: Option<&str>) -> EventUpdate {
        let mut event = KeptnEvent::new(event_type, json!({"project": "p"}));
        event.id = Some("eID".to_owned());
        EventUpdate {
            event,
            subject: event_type.to_owned(),
            subscription_id: subscription_id.map(str::to_owned),
        }
    }

    /// Start `control_plane.register` in a task and wait for it to start the
    /// event source.
    async fn spawn_register(
        control_plane: &Arc<ControlPlane>,
        event_source: &Arc<MockEventSource>,
        integration: &Arc<MockIntegration>,
        cancellation_token: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), ConnectorError>> {
        let started = event_source.started.notified();
        let control_plane = Arc::clone(control_plane);
        let integration = Arc::clone(integration) as Arc<dyn Integration>;
        let cancellation_token = cancellation_token.clone();
        let handle =
            tokio::spawn(async move {
                control_plane
                    .register(cancellation_token, integration)
                    .await
            });
        timeout(TIMEOUT, started).await.unwrap();
        handle
    }

    #[tokio::test]
    async fn test_matching_event_is_dispatched_with_subscription_id() {
        init_logger();
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(
            vec![EventSubscription::for_event_type("sID", "a")],
            &calls,
        ));
        let event_source = MockEventSource::new(&calls);
        let integration = MockIntegration::new(Behavior::Succeed, &calls);
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let cancellation_token = CancellationToken::new();
        let handle =
            spawn_register(&control_plane, &event_source, &integration, &cancellation_token).await;
        timeout(TIMEOUT, event_source.await_subscription_update())
            .await
            .unwrap();
        assert!(control_plane.is_registered());
        assert_eq!(control_plane.integration_id(), "X");
        assert_eq!(control_plane.subscriptions().len(), 1);
        event_source.deliver(event_update("a", None));
        // Not subscribed
        event_source.deliver(event_update("b", None));
        timeout(TIMEOUT, integration.await_received(1)).await.unwrap();
        cancellation_token.cancel();
        timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap();
        let received = integration.received();
        assert_eq!(received.len(), 1);
        let distributor: AdditionalSubscriptionData =
            received[0].temporary_data(DISTRIBUTOR_KEY).unwrap();
        assert_eq!(distributor.subscription_id, "sID");
        assert_eq!(control_plane.state(), ConnectorState::Unregistered);
        assert_eq!(calls.count("event_source.cleanup"), 1);
    }

    #[tokio::test]
    async fn test_event_is_dispatched_once_per_matching_subscription() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(
            vec![
                EventSubscription::for_event_type("s1", "a"),
                EventSubscription::for_event_type("s2", "a"),
            ],
            &calls,
        ));
        let event_source = MockEventSource::new(&calls);
        let integration = MockIntegration::new(Behavior::Succeed, &calls);
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let cancellation_token = CancellationToken::new();
        let handle =
            spawn_register(&control_plane, &event_source, &integration, &cancellation_token).await;
        timeout(TIMEOUT, event_source.await_subscription_update())
            .await
            .unwrap();
        event_source.deliver(event_update("a", None));
        timeout(TIMEOUT, integration.await_received(2)).await.unwrap();
        cancellation_token.cancel();
        timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap();
        let mut subscription_ids = integration
            .received()
            .iter()
            .map(|event| {
                event
                    .temporary_data::<AdditionalSubscriptionData>(DISTRIBUTOR_KEY)
                    .unwrap()
                    .subscription_id
            })
            .collect::<Vec<_>>();
        subscription_ids.sort();
        assert_eq!(subscription_ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_resolved_subscription_id_skips_matching() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(vec![], &calls));
        let event_source = MockEventSource::new(&calls);
        let integration = MockIntegration::new(Behavior::Fail, &calls);
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let cancellation_token = CancellationToken::new();
        let handle =
            spawn_register(&control_plane, &event_source, &integration, &cancellation_token).await;
        event_source.deliver(event_update("unsubscribed", Some("known")));
        timeout(TIMEOUT, integration.await_received(1)).await.unwrap();
        // A non-fatal handler error keeps the connector running.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(control_plane.is_registered());
        cancellation_token.cancel();
        timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap();
        let distributor: AdditionalSubscriptionData = integration.received()[0]
            .temporary_data(DISTRIBUTOR_KEY)
            .unwrap();
        assert_eq!(distributor.subscription_id, "known");
    }

    #[tokio::test]
    async fn test_fatal_handler_error_stops_control_plane() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(
            vec![EventSubscription::for_event_type("sID", "a")],
            &calls,
        ));
        let event_source = MockEventSource::new(&calls);
        let integration = MockIntegration::new(Behavior::FailFatal, &calls);
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let handle = spawn_register(
            &control_plane,
            &event_source,
            &integration,
            &CancellationToken::new(),
        )
        .await;
        timeout(TIMEOUT, event_source.await_subscription_update())
            .await
            .unwrap();
        event_source.deliver(event_update("a", None));
        let err = timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(control_plane.state(), ConnectorState::Unregistered);
        assert_eq!(calls.count("subscription_source.stop"), 1);
        assert_eq!(calls.count("event_source.stop"), 1);
        assert_eq!(calls.count("event_source.cleanup"), 1);
    }

    #[tokio::test]
    async fn test_source_error_stops_control_plane() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(vec![], &calls));
        let event_source = MockEventSource::new(&calls);
        let integration = MockIntegration::new(Behavior::Succeed, &calls);
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let handle = spawn_register(
            &control_plane,
            &event_source,
            &integration,
            &CancellationToken::new(),
        )
        .await;
        event_source
            .error_tx
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .send(ConnectorErrorKind::Transport.error_with_msg("poll failed"))
            .unwrap();
        let err = timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.kind(), &ConnectorErrorKind::Transport);
        assert_eq!(calls.count("event_source.cleanup"), 1);
    }

    #[tokio::test]
    async fn test_cleanup_waits_for_event_handlers() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(
            vec![EventSubscription::for_event_type("sID", "a")],
            &calls,
        ));
        let event_source = MockEventSource::new(&calls);
        let release = Arc::new(Notify::new());
        let integration =
            MockIntegration::new(Behavior::BlockUntilReleased(Arc::clone(&release)), &calls);
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let cancellation_token = CancellationToken::new();
        let handle =
            spawn_register(&control_plane, &event_source, &integration, &cancellation_token).await;
        timeout(TIMEOUT, event_source.await_subscription_update())
            .await
            .unwrap();
        event_source.deliver(event_update("a", None));
        timeout(TIMEOUT, integration.await_received(1)).await.unwrap();
        cancellation_token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(control_plane.state(), ConnectorState::Draining);
        assert_eq!(calls.count("event_source.cleanup"), 0);
        release.notify_one();
        timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap();
        let calls = calls.calls();
        let done = calls
            .iter()
            .position(|call| call == "integration.on_event.done")
            .unwrap();
        let cleanup = calls
            .iter()
            .position(|call| call == "event_source.cleanup")
            .unwrap();
        assert!(done < cleanup);
    }

    #[tokio::test]
    async fn test_sent_events_are_offered_to_log_forwarder() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(
            vec![EventSubscription::for_event_type("sID", "a")],
            &calls,
        ));
        let event_source = MockEventSource::new(&calls);
        let integration = MockIntegration::new(Behavior::Respond, &calls);
        let log_forwarder = Arc::new(MockLogForwarder {
            calls: Arc::clone(&calls),
        });
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            Some(log_forwarder as Arc<dyn LogForwarder>),
        );
        let cancellation_token = CancellationToken::new();
        let handle =
            spawn_register(&control_plane, &event_source, &integration, &cancellation_token).await;
        timeout(TIMEOUT, event_source.await_subscription_update())
            .await
            .unwrap();
        event_source.deliver(event_update("a", None));
        timeout(TIMEOUT, integration.await_received(1)).await.unwrap();
        cancellation_token.cancel();
        timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap();
        let calls = calls.calls();
        let forward = calls
            .iter()
            .position(|call| call == "forward:sh.keptn.event.echo.finished:X")
            .unwrap();
        // A failing log forwarder does not prevent sending.
        let send = calls
            .iter()
            .position(|call| call == "send:sh.keptn.event.echo.finished")
            .unwrap();
        assert!(forward < send);
    }

    #[tokio::test]
    async fn test_registration_failure() {
        let calls = Arc::new(CallLog::default());
        let mut subscription_source = MockSubscriptionSource::new(vec![], &calls);
        subscription_source.integration_id = None;
        let event_source = MockEventSource::new(&calls);
        let control_plane = ControlPlane::new(
            Arc::new(subscription_source),
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let integration = MockIntegration::new(Behavior::Succeed, &calls);
        let err = control_plane
            .register(CancellationToken::new(), integration)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ConnectorErrorKind::RegistrationFailed);
        assert!(err.has_kind(ConnectorErrorKind::Transport));
        assert_eq!(control_plane.state(), ConnectorState::Unregistered);
        assert_eq!(calls.count("event_source.start"), 0);
    }

    #[tokio::test]
    async fn test_failing_source_start_drains_started_source() {
        let calls = Arc::new(CallLog::default());
        let mut subscription_source = MockSubscriptionSource::new(vec![], &calls);
        subscription_source.fail_start = true;
        let event_source = MockEventSource::new(&calls);
        let control_plane = ControlPlane::new(
            Arc::new(subscription_source),
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let integration = MockIntegration::new(Behavior::Succeed, &calls);
        let err = timeout(
            TIMEOUT,
            control_plane.register(CancellationToken::new(), integration),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err.kind(), &ConnectorErrorKind::Transport);
        assert_eq!(calls.count("event_source.stop"), 1);
        assert_eq!(calls.count("event_source.cleanup"), 1);
        assert_eq!(control_plane.state(), ConnectorState::Unregistered);
    }

    struct FailingUniformApi;

    #[async_trait]
    impl UniformApi for FailingUniformApi {
        async fn register_integration(
            &self,
            _registration_data: &RegistrationData,
        ) -> Result<String, ConnectorError> {
            Ok("X".to_owned())
        }

        async fn ping(&self, _integration_id: &str) -> Result<RegistrationData, ConnectorError> {
            Err(ConnectorErrorKind::Transport.error_with_msg("control plane down"))
        }
    }

    #[tokio::test]
    async fn test_exceeded_ping_attempts_stop_both_sources() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = UniformSubscriptionSource::new(Arc::new(FailingUniformApi))
            .with_max_ping_attempts(3)
            .with_ping_attempts_interval(Duration::from_millis(5));
        let event_source = MockEventSource::new(&calls);
        let control_plane = ControlPlane::new(
            Arc::new(subscription_source),
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        let integration = MockIntegration::new(Behavior::Succeed, &calls);
        let err = timeout(
            TIMEOUT,
            control_plane.register(CancellationToken::new(), integration),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err.kind(), &ConnectorErrorKind::MaxPingRetriesExceeded);
        assert_eq!(calls.count("event_source.stop"), 1);
        assert_eq!(calls.count("event_source.cleanup"), 1);
        assert!(!control_plane.is_registered());
    }

    #[tokio::test]
    async fn test_control_plane_is_reusable() {
        let calls = Arc::new(CallLog::default());
        let subscription_source = Arc::new(MockSubscriptionSource::new(vec![], &calls));
        let event_source = MockEventSource::new(&calls);
        let integration = MockIntegration::new(Behavior::Succeed, &calls);
        let control_plane = ControlPlane::new(
            subscription_source,
            Arc::clone(&event_source) as Arc<dyn EventSource>,
            None,
        );
        for _ in 0..2 {
            let cancellation_token = CancellationToken::new();
            let handle =
                spawn_register(&control_plane, &event_source, &integration, &cancellation_token)
                    .await;
            cancellation_token.cancel();
            timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap();
            assert_eq!(control_plane.state(), ConnectorState::Unregistered);
        }
        assert_eq!(calls.count("subscription_source.register"), 2);
        assert_eq!(calls.count("event_source.cleanup"), 2);
    }
}
