//! Feed client: assembles the session components and exposes the lifecycle.

use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::dispatch::{EventDispatcher, EventKind, HandlerId, HandlerSet};
use crate::error::WsResult;
use crate::feed::{ErrorReporter, FeedEndpoint, FeedSource, MessageConsumer, TracingReporter};
use crate::reconnect::{FixedInterval, ReconnectLoop, RetryPolicy};
use crate::registry::{DeliverToConsumer, EventSubscriptionRegistry, ReportErrors};
use crate::router::MessageRouter;
use crate::session::{RegistrationState, Session};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::tls::TlsSettings;
use crate::transport::{ConnectionState, Connector, WsConnector};
use std::sync::Arc;
use tracing::info;

/// Builder for [`FeedClient`].
pub struct FeedClientBuilder {
    config: ConnectionConfig,
    feed_source: Arc<dyn FeedSource>,
    consumer: Arc<dyn MessageConsumer>,
    reporter: Arc<dyn ErrorReporter>,
    connector: Option<Arc<dyn Connector>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    tls: Option<TlsSettings>,
}

impl FeedClientBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the transport (defaults to [`WsConnector`]).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the retry policy (defaults to a fixed interval from config).
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Override TLS settings derived from config, e.g. to inject a custom verifier.
    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn build(self) -> FeedClient {
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::new(
                self.config.emit_on_ping,
                self.config.disable_nagle,
            )),
        };
        let policy: Arc<dyn RetryPolicy> = match self.retry_policy {
            Some(policy) => policy,
            None => Arc::new(FixedInterval::new(self.config.reconnect_interval())),
        };
        let tls = self.tls.unwrap_or_else(|| self.config.tls_settings());

        let session = Session::new();
        let dispatcher = EventDispatcher::new();
        let stats = Arc::new(SessionStats::new());

        let connection = Arc::new(ConnectionManager::new(
            session.clone(),
            dispatcher.clone(),
            self.feed_source,
            connector,
            tls,
            self.config.open_mode,
        ));
        let reconnect =
            ReconnectLoop::new(session.clone(), connection.clone(), policy, stats.clone());
        let router = MessageRouter::new(session.clone(), dispatcher.clone(), stats.clone());

        let handlers = HandlerSet::new()
            .with(HandlerId::Close, EventKind::Close, reconnect.close_handler())
            .with(
                HandlerId::Error,
                EventKind::Error,
                Arc::new(ReportErrors {
                    reporter: self.reporter,
                    stats: stats.clone(),
                }),
            )
            .with(HandlerId::Open, EventKind::Open, router.open_handler())
            .with(HandlerId::Handshake, EventKind::Message, router.handshake_handler())
            .with(
                HandlerId::Consumer,
                EventKind::Message,
                Arc::new(DeliverToConsumer {
                    consumer: self.consumer,
                    stats: stats.clone(),
                }),
            );
        if let Some(binding) = handlers.get(HandlerId::Handshake) {
            router.set_handshake_binding(binding.clone());
        }

        let registry = EventSubscriptionRegistry::new(
            session.clone(),
            connection.clone(),
            dispatcher.clone(),
            reconnect.clone(),
            handlers,
        );

        FeedClient {
            session,
            connection,
            registry,
            reconnect,
            dispatcher,
            stats,
            _router: router,
        }
    }
}

/// Single persistent connection to a market-data feed.
///
/// Call [`init`](Self::init) once, then drive [`resume`](Self::resume) and
/// [`sleep`](Self::sleep) as the host moves between foreground and background.
pub struct FeedClient {
    session: Arc<Session>,
    connection: Arc<ConnectionManager>,
    registry: EventSubscriptionRegistry,
    reconnect: Arc<ReconnectLoop>,
    dispatcher: Arc<EventDispatcher>,
    stats: Arc<SessionStats>,
    _router: Arc<MessageRouter>,
}

impl FeedClient {
    pub fn builder(
        config: ConnectionConfig,
        feed_source: Arc<dyn FeedSource>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> FeedClientBuilder {
        FeedClientBuilder {
            config,
            feed_source,
            consumer,
            reporter: Arc::new(TracingReporter),
            connector: None,
            retry_policy: None,
            tls: None,
        }
    }

    /// Fetch the initial endpoint and create the first handle.
    pub async fn init(&self) -> WsResult<()> {
        let guard = self.session.lock().await;
        self.connection.init(&guard)
    }

    /// Create a new handle, fetching the endpoint again unless `is_init`.
    pub async fn connect(&self, is_init: bool) -> WsResult<()> {
        let guard = self.session.lock().await;
        self.connection.connect(&guard, is_init)
    }

    /// Start connecting the current handle.
    pub async fn open(&self) -> WsResult<()> {
        let guard = self.session.lock().await;
        let attempt = self.connection.start_open(&guard)?;
        drop(guard);
        self.connection.finish_open(attempt).await
    }

    /// Gracefully close the current handle.
    pub async fn close(&self) -> WsResult<()> {
        let guard = self.session.lock().await;
        self.connection.close(&guard)
    }

    pub async fn resume(&self) -> WsResult<()> {
        self.registry.resume().await
    }

    pub async fn sleep(&self) -> WsResult<()> {
        self.registry.sleep().await
    }

    /// Move to the feed the source now selects; reopens when active.
    pub async fn switch_feed(&self) -> WsResult<()> {
        let guard = self.session.lock().await;
        self.connection.connect(&guard, false)?;
        if !self.session.is_active() {
            return Ok(());
        }
        info!("Switching feed while active, opening new connection");
        let attempt = self.connection.start_open(&guard)?;
        drop(guard);
        self.connection.finish_open(attempt).await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registry.state()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnect.is_running()
    }

    pub fn endpoint(&self) -> Option<FeedEndpoint> {
        self.connection.endpoint()
    }

    /// Handlers currently bound, in dispatch order.
    pub fn bound_handlers(&self) -> Vec<HandlerId> {
        self.dispatcher.bound()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OpenMode;
    use crate::dispatch::Frame;
    use crate::error::WsError;
    use crate::feed::{MockErrorReporter, StaticFeedSource};
    use crate::test_support::{MockConnector, RecordingConsumer, SwitchableFeedSource};
    use crate::transport::TransportHandle;
    use std::time::Duration;

    const ALL_HANDLERS: [HandlerId; 5] = [
        HandlerId::Close,
        HandlerId::Error,
        HandlerId::Open,
        HandlerId::Handshake,
        HandlerId::Consumer,
    ];

    struct Harness {
        client: FeedClient,
        connector: Arc<MockConnector>,
        consumer: Arc<RecordingConsumer>,
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            open_mode: OpenMode::Blocking,
            reconnect_interval_ms: 10,
            ..Default::default()
        }
    }

    async fn harness_with(
        source: Arc<dyn FeedSource>,
        reporter: Option<MockErrorReporter>,
    ) -> Harness {
        harness_config(test_config(), source, reporter).await
    }

    async fn harness_config(
        config: ConnectionConfig,
        source: Arc<dyn FeedSource>,
        reporter: Option<MockErrorReporter>,
    ) -> Harness {
        let connector = Arc::new(MockConnector::new());
        let consumer = Arc::new(RecordingConsumer::default());
        let mut builder = FeedClient::builder(config, source, consumer.clone())
            .connector(connector.clone());
        if let Some(reporter) = reporter {
            builder = builder.reporter(Arc::new(reporter));
        }
        let client = builder.build();
        client.init().await.unwrap();
        Harness {
            client,
            connector,
            consumer,
        }
    }

    fn feed_a() -> Arc<StaticFeedSource> {
        Arc::new(StaticFeedSource::new(FeedEndpoint::new(
            "wss://feed/A",
            "SUB:BTC",
        )))
    }

    async fn harness() -> Harness {
        harness_with(feed_a(), None).await
    }

    /// Let spawned tasks run up to their next timer under paused time.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn assert_consistent(client: &FeedClient) {
        match client.registration_state() {
            RegistrationState::Active => {
                assert_eq!(client.bound_handlers(), ALL_HANDLERS.to_vec());
            }
            RegistrationState::Suspended => {
                assert!(client.bound_handlers().is_empty());
                assert!(!client.is_reconnecting());
            }
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_resume_opens_and_subscribes() {
        let h = harness().await;
        assert_eq!(h.client.registration_state(), RegistrationState::Suspended);
        assert!(h.client.bound_handlers().is_empty());

        h.client.resume().await.unwrap();

        let handle = h.connector.last().unwrap();
        assert_eq!(handle.uri(), "wss://feed/A");
        assert_eq!(handle.sent(), vec!["SUB:BTC".to_string()]);
        assert_eq!(h.client.registration_state(), RegistrationState::Active);
        assert_eq!(h.client.bound_handlers(), ALL_HANDLERS.to_vec());
        assert!(h.client.is_connected());
    }

    #[tokio::test]
    async fn test_resume_and_sleep_are_idempotent() {
        let h = harness().await;
        h.client.resume().await.unwrap();
        h.client.resume().await.unwrap();

        let handle = h.connector.last().unwrap();
        assert_eq!(handle.open_calls(), 1);
        assert_eq!(handle.sent().len(), 1);
        assert_eq!(h.client.bound_handlers(), ALL_HANDLERS.to_vec());

        h.client.sleep().await.unwrap();
        h.client.sleep().await.unwrap();

        assert_eq!(handle.close_calls(), 1);
        assert!(h.client.bound_handlers().is_empty());
        assert_eq!(h.client.registration_state(), RegistrationState::Suspended);
    }

    #[tokio::test]
    async fn test_sleep_after_resume_stays_down() {
        let h = harness().await;
        h.client.resume().await.unwrap();
        h.client.sleep().await.unwrap();

        assert!(!h.client.is_connected());
        assert!(!h.client.is_reconnecting());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.connector.total_open_calls(), 1);
        assert_eq!(h.client.stats().reconnect_runs, 0);
    }

    #[tokio::test]
    async fn test_unexpected_close_reconnects_until_alive() {
        let h = harness().await;
        h.client.resume().await.unwrap();
        let handle = h.connector.last().unwrap();

        h.connector.set_open_succeeds(false);
        handle.drop_connection();
        wait_until(|| handle.open_calls() >= 4).await;
        assert!(h.client.is_reconnecting());
        assert!(!h.client.is_connected());

        h.connector.set_open_succeeds(true);
        wait_until(|| h.client.is_connected() && !h.client.is_reconnecting()).await;

        let stats = h.client.stats();
        assert_eq!(stats.reconnect_runs, 1);
        assert_eq!(stats.subscriptions_sent, 2);
        assert_eq!(handle.sent(), vec!["SUB:BTC".to_string(), "SUB:BTC".to_string()]);
        assert_eq!(h.client.bound_handlers(), ALL_HANDLERS.to_vec());
        assert_eq!(h.connector.handles().len(), 1);
    }

    #[tokio::test]
    async fn test_rapid_closes_start_one_loop() {
        let h = harness().await;
        h.client.resume().await.unwrap();
        let handle = h.connector.last().unwrap();

        handle.drop_connection();
        handle.drop_connection();
        assert!(h.client.is_reconnecting());

        wait_until(|| h.client.is_connected() && !h.client.is_reconnecting()).await;
        let stats = h.client.stats();
        assert_eq!(stats.unexpected_closes, 2);
        assert_eq!(stats.reconnect_runs, 1);
        assert_eq!(handle.open_calls(), 2);
    }

    #[tokio::test]
    async fn test_sleep_cancels_reconnect_in_flight() {
        let h = harness().await;
        h.connector.set_open_succeeds(false);

        // Open failure is advisory; the session stays active and retries.
        assert!(h.client.resume().await.is_err());
        assert_eq!(h.client.registration_state(), RegistrationState::Active);
        assert!(h.client.is_reconnecting());

        h.client.sleep().await.unwrap();
        assert!(!h.client.is_reconnecting());

        let calls = h.connector.total_open_calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.total_open_calls(), calls);
    }

    #[tokio::test]
    async fn test_handshake_then_consumer_only() {
        let h = harness().await;
        h.client.resume().await.unwrap();
        let handle = h.connector.last().unwrap();

        handle.deliver_text("{\"channel\":\"subscriptionResponse\"}");
        handle.deliver_text("{\"channel\":\"trades\"}");
        handle.deliver(Frame::Binary(vec![1, 2, 3]));

        assert_eq!(h.consumer.frames().len(), 3);
        assert_eq!(h.client.stats().handshakes, 1);
        assert!(!h.client.bound_handlers().contains(&HandlerId::Handshake));
    }

    #[tokio::test]
    async fn test_switch_feed_targets_new_endpoint() {
        let source = Arc::new(SwitchableFeedSource::new(FeedEndpoint::new(
            "wss://feed/A",
            "SUB:BTC",
        )));
        let h = harness_with(source.clone(), None).await;
        h.client.resume().await.unwrap();

        source.set(FeedEndpoint::new("wss://feed/B", "SUB:ETH"));
        h.client.switch_feed().await.unwrap();

        let handles = h.connector.handles();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].close_calls(), 1);
        assert_eq!(handles[1].uri(), "wss://feed/B");
        assert_eq!(handles[1].sent(), vec!["SUB:ETH".to_string()]);
        assert_eq!(h.client.endpoint().unwrap().uri, "wss://feed/B");
        // Close of the replaced handle is not an unexpected close.
        assert_eq!(h.client.stats().unexpected_closes, 0);
        assert!(!h.client.is_reconnecting());
    }

    #[tokio::test]
    async fn test_switch_feed_while_suspended_does_not_open() {
        let source = Arc::new(SwitchableFeedSource::new(FeedEndpoint::new(
            "wss://feed/A",
            "SUB:BTC",
        )));
        let h = harness_with(source.clone(), None).await;

        source.set(FeedEndpoint::new("wss://feed/B", "SUB:ETH"));
        h.client.switch_feed().await.unwrap();

        assert_eq!(h.connector.last().unwrap().uri(), "wss://feed/B");
        assert_eq!(h.connector.total_open_calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_reported_without_state_change() {
        let mut reporter = MockErrorReporter::new();
        reporter
            .expect_report()
            .withf(|m| m == "frame too large")
            .times(1)
            .return_const(());
        let source = Arc::new(StaticFeedSource::new(FeedEndpoint::new(
            "wss://feed/A",
            "SUB:BTC",
        )));
        let h = harness_with(source, Some(reporter)).await;
        h.client.resume().await.unwrap();

        h.connector.last().unwrap().emit_error("frame too large");

        assert!(h.client.is_connected());
        assert!(!h.client.is_reconnecting());
        assert_eq!(h.client.registration_state(), RegistrationState::Active);
        assert_eq!(h.client.stats().transport_errors, 1);
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_endpoint() {
        let connector = Arc::new(MockConnector::new());
        let source = Arc::new(StaticFeedSource::new(FeedEndpoint::new(
            "http://feed/A",
            "SUB:BTC",
        )));
        let client = FeedClient::builder(
            test_config(),
            source,
            Arc::new(RecordingConsumer::default()),
        )
        .connector(connector.clone())
        .build();

        assert!(client.init().await.unwrap_err().is_configuration());
        assert!(connector.handles().is_empty());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_resume_before_init_is_rejected() {
        let connector = Arc::new(MockConnector::new());
        let client = FeedClient::builder(
            test_config(),
            feed_a(),
            Arc::new(RecordingConsumer::default()),
        )
        .connector(connector.clone())
        .build();

        assert!(client.resume().await.unwrap_err().is_configuration());
        assert_eq!(client.registration_state(), RegistrationState::Suspended);
        assert!(client.bound_handlers().is_empty());
        assert!(!client.is_reconnecting());
        assert!(connector.handles().is_empty());

        // Nothing was left half-bound, so a later init and resume succeed.
        client.init().await.unwrap();
        client.resume().await.unwrap();
        assert_eq!(client.bound_handlers(), ALL_HANDLERS.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_follow_fixed_interval() {
        let config = ConnectionConfig {
            open_mode: OpenMode::Blocking,
            reconnect_interval_ms: 1000,
            ..Default::default()
        };
        let h = harness_config(config, feed_a(), None).await;
        h.client.resume().await.unwrap();
        let handle = h.connector.last().unwrap();
        assert_eq!(handle.open_calls(), 1);

        h.connector.set_open_succeeds(false);
        handle.drop_connection();
        settle().await;

        for expected in 2..=4 {
            tokio::time::advance(Duration::from_millis(999)).await;
            settle().await;
            assert_eq!(handle.open_calls(), expected - 1);

            tokio::time::advance(Duration::from_millis(1)).await;
            settle().await;
            assert_eq!(handle.open_calls(), expected);
        }
        assert_eq!(h.client.stats().reconnect_attempts, 3);
        assert_eq!(h.client.stats().reconnect_runs, 1);

        h.client.sleep().await.unwrap();
        assert!(!h.client.is_reconnecting());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resume_and_sleep_leave_consistent_state() {
        let Harness {
            client, connector, ..
        } = harness().await;
        let client = Arc::new(client);

        for round in 0..100 {
            let (a, b) = (client.clone(), client.clone());
            let (first, second) = if round % 2 == 0 {
                tokio::join!(
                    tokio::spawn(async move { a.resume().await }),
                    tokio::spawn(async move { b.sleep().await }),
                )
            } else {
                tokio::join!(
                    tokio::spawn(async move { a.sleep().await }),
                    tokio::spawn(async move { b.resume().await }),
                )
            };
            first.unwrap().unwrap();
            second.unwrap().unwrap();

            assert_consistent(&client);
            if round % 10 == 5 {
                if let Some(handle) = connector.last() {
                    handle.drop_connection();
                }
            }
        }

        client.sleep().await.unwrap();
        assert_consistent(&client);
    }

    #[tokio::test]
    async fn test_sleep_during_hanging_reconnect_returns() {
        let config = ConnectionConfig {
            open_mode: OpenMode::Blocking,
            reconnect_interval_ms: 20,
            ..Default::default()
        };
        let h = harness_config(config, feed_a(), None).await;
        h.client.resume().await.unwrap();
        let handle = h.connector.last().unwrap();

        h.connector.set_open_hangs(true);
        handle.drop_connection();
        wait_until(|| h.client.connection_state() == ConnectionState::Connecting).await;
        assert!(h.client.is_reconnecting());

        tokio::time::timeout(Duration::from_secs(1), h.client.sleep())
            .await
            .expect("sleep blocked by reconnect attempt")
            .unwrap();

        assert!(!h.client.is_reconnecting());
        assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
        assert!(h.client.bound_handlers().is_empty());
    }

    #[tokio::test]
    async fn test_sleep_cancels_blocking_resume() {
        let Harness {
            client, connector, ..
        } = harness().await;
        let client = Arc::new(client);
        connector.set_open_hangs(true);

        let resuming = tokio::spawn({
            let client = client.clone();
            async move { client.resume().await }
        });
        wait_until(|| client.connection_state() == ConnectionState::Connecting).await;

        tokio::time::timeout(Duration::from_secs(1), client.sleep())
            .await
            .expect("sleep blocked by resume")
            .unwrap();
        let resumed = tokio::time::timeout(Duration::from_secs(1), resuming)
            .await
            .expect("resume never settled")
            .unwrap();

        assert!(matches!(resumed, Err(WsError::Cancelled)));
        assert_eq!(client.registration_state(), RegistrationState::Suspended);
        assert!(client.bound_handlers().is_empty());
    }
}
