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

//! [SubscriptionSource] renewing the registration at the control plane.

use super::SubscriptionSource;
use super::UniformApi;
use crate::util::CompletionGuard;
use crate::util::RetryOutcome;
use crate::util::retry_with_fixed_delay;
use async_trait::async_trait;
use cpconnector_client::ConnectorError;
use cpconnector_client::ConnectorErrorKind;
use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::RegistrationData;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// [SubscriptionSource] that periodically pings the control plane to renew
/// the registration and fetch the current subscriptions.
///
/// Each ping is retried with a fixed delay. When all attempts fail, a single
/// [ConnectorErrorKind::MaxPingRetriesExceeded] error is reported and the
/// source stops.
pub struct UniformSubscriptionSource {
    uniform_api: Arc<dyn UniformApi>,
    fetch_interval: Duration,
    max_ping_attempts: u32,
    ping_attempts_interval: Duration,
    stop_token: Mutex<Option<CancellationToken>>,
}

impl UniformSubscriptionSource {
    /// Default time between subscription fetches.
    pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default number of ping attempts.
    pub const DEFAULT_MAX_PING_ATTEMPTS: u32 = 10;
    /// Default time between ping attempts.
    pub const DEFAULT_PING_ATTEMPTS_INTERVAL: Duration = Duration::from_secs(3);

    /// Return a new instance using the defaults.
    pub fn new(uniform_api: Arc<dyn UniformApi>) -> Self {
        Self {
            uniform_api,
            fetch_interval: Self::DEFAULT_FETCH_INTERVAL,
            max_ping_attempts: Self::DEFAULT_MAX_PING_ATTEMPTS,
            ping_attempts_interval: Self::DEFAULT_PING_ATTEMPTS_INTERVAL,
            stop_token: Mutex::new(None),
        }
    }

    /// Set the time between subscription fetches.
    pub fn with_fetch_interval(mut self, fetch_interval: Duration) -> Self {
        self.fetch_interval = fetch_interval;
        self
    }

    /// Set the number of ping attempts before giving up.
    pub fn with_max_ping_attempts(mut self, max_ping_attempts: u32) -> Self {
        self.max_ping_attempts = max_ping_attempts;
        self
    }

    /// Set the time between ping attempts.
    pub fn with_ping_attempts_interval(mut self, ping_attempts_interval: Duration) -> Self {
        self.ping_attempts_interval = ping_attempts_interval;
        self
    }

    /// Ping right away and then on every tick until cancelled or out of
    /// attempts.
    #[allow(clippy::too_many_arguments)]
    async fn run(
        uniform_api: Arc<dyn UniformApi>,
        fetch_interval: Duration,
        max_ping_attempts: u32,
        ping_attempts_interval: Duration,
        cancellation_token: CancellationToken,
        integration_id: String,
        updates_tx: UnboundedSender<Vec<EventSubscription>>,
        error_tx: UnboundedSender<ConnectorError>,
    ) {
        let mut interval = tokio::time::interval(fetch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let outcome = retry_with_fixed_delay(
                max_ping_attempts,
                ping_attempts_interval,
                &cancellation_token,
                || Self::ping(uniform_api.as_ref(), &integration_id),
            )
            .await;
            match outcome {
                RetryOutcome::Done(subscriptions) => {
                    if updates_tx.send(subscriptions).is_err() {
                        log::debug!("Subscription update channel is closed.");
                        break;
                    }
                }
                RetryOutcome::Exhausted(e) => {
                    log::error!("Reached max number of attempts to ping control plane: {e}");
                    let error = ConnectorErrorKind::MaxPingRetriesExceeded.error_with_source(
                        "Maximum retries for pinging control plane exceeded.",
                        e,
                    );
                    if error_tx.send(error).is_err() {
                        log::debug!("Error channel is closed.");
                    }
                    break;
                }
                RetryOutcome::Cancelled => break,
            }
        }
        log::debug!("Subscription source for integration '{integration_id}' stopped.");
    }

    async fn ping(
        uniform_api: &dyn UniformApi,
        integration_id: &str,
    ) -> Result<Vec<EventSubscription>, ConnectorError> {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Renewing integration '{integration_id}'.");
        }
        let integration = uniform_api.ping(integration_id).await.map_err(|e| {
            log::warn!("Unable to ping control plane: {e}");
            e
        })?;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Ping successful, got {} subscriptions for '{integration_id}'.",
                integration.subscriptions.len()
            );
        }
        Ok(integration.subscriptions)
    }
}

#[async_trait]
impl SubscriptionSource for UniformSubscriptionSource {
    async fn register(
        &self,
        registration_data: &RegistrationData,
    ) -> Result<String, ConnectorError> {
        self.uniform_api
            .register_integration(registration_data)
            .await
    }

    async fn start(
        &self,
        cancellation_token: CancellationToken,
        registration_data: RegistrationData,
        updates_tx: UnboundedSender<Vec<EventSubscription>>,
        error_tx: UnboundedSender<ConnectorError>,
        completion_guard: CompletionGuard,
    ) -> Result<(), ConnectorError> {
        log::debug!(
            "Starting to fetch subscriptions for integration '{}'.",
            registration_data.id()
        );
        let cancellation_token = cancellation_token.child_token();
        *self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancellation_token.clone());
        let uniform_api = Arc::clone(&self.uniform_api);
        let fetch_interval = self.fetch_interval;
        let max_ping_attempts = self.max_ping_attempts;
        let ping_attempts_interval = self.ping_attempts_interval;
        let integration_id = registration_data.id().to_owned();
        tokio::spawn(async move {
            Self::run(
                uniform_api,
                fetch_interval,
                max_ping_attempts,
                ping_attempts_interval,
                cancellation_token,
                integration_id,
                updates_tx,
                error_tx,
            )
            .await;
            drop(completion_guard);
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), ConnectorError> {
        if let Some(stop_token) = self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            stop_token.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::CompletionCounter;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    /// Fails every ping after the first `succeed_first` ones.
    struct MockUniformApi {
        succeed_first: usize,
        pings: AtomicUsize,
        register_result: Option<String>,
    }

    impl MockUniformApi {
        fn new(succeed_first: usize) -> Arc<Self> {
            Arc::new(Self {
                succeed_first,
                pings: AtomicUsize::new(0),
                register_result: Some("iID".to_owned()),
            })
        }
    }

    #[async_trait]
    impl UniformApi for MockUniformApi {
        async fn register_integration(
            &self,
            _registration_data: &RegistrationData,
        ) -> Result<String, ConnectorError> {
            self.register_result.clone().ok_or_else(|| {
                ConnectorErrorKind::UnexpectedResponse.error_with_msg("registration refused")
            })
        }

        async fn ping(&self, integration_id: &str) -> Result<RegistrationData, ConnectorError> {
            assert_eq!(integration_id, "iID");
            if self.pings.fetch_add(1, Ordering::SeqCst) >= self.succeed_first {
                return Err(ConnectorErrorKind::Transport.error_with_msg("error occured"));
            }
            Ok(RegistrationData {
                id: Some(integration_id.to_owned()),
                subscriptions: vec![EventSubscription::for_event_type("sID", "keptn.event")],
                ..RegistrationData::default()
            })
        }
    }

    fn registration_data() -> RegistrationData {
        RegistrationData {
            id: Some("iID".to_owned()),
            name: "integrationName".to_owned(),
            ..RegistrationData::default()
        }
    }

    async fn start(
        source: &UniformSubscriptionSource,
        cancellation_token: &CancellationToken,
    ) -> (
        Arc<CompletionCounter>,
        UnboundedReceiver<Vec<EventSubscription>>,
        UnboundedReceiver<ConnectorError>,
    ) {
        let counter = CompletionCounter::new();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        source
            .start(
                cancellation_token.clone(),
                registration_data(),
                updates_tx,
                error_tx,
                counter.guard(),
            )
            .await
            .unwrap();
        (counter, updates_rx, error_rx)
    }

    #[tokio::test]
    async fn test_failed_initial_pings_exceed_max_attempts() {
        let uniform_api = MockUniformApi::new(0);
        let source = UniformSubscriptionSource::new(Arc::clone(&uniform_api) as Arc<dyn UniformApi>)
            .with_max_ping_attempts(2)
            .with_ping_attempts_interval(Duration::from_millis(10));
        let (counter, mut updates_rx, mut error_rx) =
            start(&source, &CancellationToken::new()).await;
        let err = timeout(Duration::from_secs(5), error_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err.kind(), &ConnectorErrorKind::MaxPingRetriesExceeded);
        timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
        assert_eq!(uniform_api.pings.load(Ordering::SeqCst), 2);
        assert!(updates_rx.try_recv().is_err());
        // Exactly one terminal error
        assert!(error_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_subsequent_pings_exceed_max_attempts() {
        let uniform_api = MockUniformApi::new(1);
        let source = UniformSubscriptionSource::new(Arc::clone(&uniform_api) as Arc<dyn UniformApi>)
            .with_fetch_interval(Duration::from_millis(20))
            .with_max_ping_attempts(3)
            .with_ping_attempts_interval(Duration::from_millis(10));
        let (counter, mut updates_rx, mut error_rx) =
            start(&source, &CancellationToken::new()).await;
        let subscriptions = timeout(Duration::from_secs(5), updates_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(subscriptions[0].id, "sID");
        let err = timeout(Duration::from_secs(5), error_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err.kind(), &ConnectorErrorKind::MaxPingRetriesExceeded);
        timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
        assert_eq!(uniform_api.pings.load(Ordering::SeqCst), 1 + 3);
    }

    #[tokio::test]
    async fn test_fetches_on_every_interval() {
        let uniform_api = MockUniformApi::new(usize::MAX);
        let source = UniformSubscriptionSource::new(Arc::clone(&uniform_api) as Arc<dyn UniformApi>)
            .with_fetch_interval(Duration::from_millis(5));
        let cancellation_token = CancellationToken::new();
        let (counter, mut updates_rx, _error_rx) = start(&source, &cancellation_token).await;
        for _ in 0..5 {
            let subscriptions = timeout(Duration::from_secs(5), updates_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(subscriptions.len(), 1);
        }
        cancellation_token.cancel();
        timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
        assert!(uniform_api.pings.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn test_stop_interrupts_retry_delay() {
        let uniform_api = MockUniformApi::new(0);
        let source = UniformSubscriptionSource::new(Arc::clone(&uniform_api) as Arc<dyn UniformApi>)
            .with_ping_attempts_interval(Duration::from_secs(60));
        let (counter, _updates_rx, mut error_rx) = start(&source, &CancellationToken::new()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.stop().unwrap();
        timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
        assert!(error_rx.try_recv().is_err());
        source.stop().unwrap();
    }

    #[tokio::test]
    async fn test_register() {
        let uniform_api = MockUniformApi::new(0);
        let source =
            UniformSubscriptionSource::new(Arc::clone(&uniform_api) as Arc<dyn UniformApi>);
        assert_eq!(source.register(&registration_data()).await.unwrap(), "iID");
        let refusing_api = Arc::new(MockUniformApi {
            succeed_first: 0,
            pings: AtomicUsize::new(0),
            register_result: None,
        });
        let source = UniformSubscriptionSource::new(refusing_api as Arc<dyn UniformApi>);
        let err = source.register(&registration_data()).await.unwrap_err();
        assert_eq!(err.kind(), &ConnectorErrorKind::UnexpectedResponse);
    }
}
