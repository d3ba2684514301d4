// =============================================================================
// Connection Manager — one authenticated quote transport per provider
// =============================================================================
//
// State machine:
//
//   Disconnected --connect--> Connecting --open--> Connected
//        ^                        |                    |
//        |                   token/handshake        error --> Error
//        |                      failure                |
//        +--------- close / disconnect <---------------+
//
// Every transition runs under one lock on the `ConnectionRecord`, which owns
// all connection-scoped handles (session task, outbound sender, keepalive
// task, reconnect and stream-switch timers). Each connect attempt gets a
// generation number; events and timers carrying an older generation are
// dropped, so a late close from a torn-down socket can never clobber the
// state of its successor.
//
// Recovery:
//   - abnormal close (any code but 1000) -> reconnect after a fixed delay when
//     auto-connect is on and the session is still authenticated;
//   - token or handshake failure        -> same reconnect path;
//   - not authenticated at connect time -> Error, no retry;
//   - disconnect()                      -> close 1000, cancel every timer.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::auth::AuthProvider;
use crate::config::QuoteConfig;
use crate::market_data::subscriptions::{Subscribed, Unsubscribed};
use crate::market_data::translator::{self, Applied};
use crate::market_data::{QuoteStore, SubscriptionTracker};
use crate::stream::protocol::{is_normal_closure, ClientFrame, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::stream::transport::{Connector, Outbound, TransportEvent, TransportLink};
use crate::types::{ConnectionStatus, StreamType};

/// Capacity of the execution fan-out channel.
const EXECUTION_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Connection record
// =============================================================================

/// One connect attempt and, once open, its transport.
struct Session {
    /// Token acquisition, handshake and read loop.
    task: JoinHandle<()>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    keepalive: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Reconnect,
    StreamSwitch,
}

struct ConnectionRecord {
    status: ConnectionStatus,
    stream_type: StreamType,
    generation: u64,
    session: Option<Session>,
    reconnect_timer: Option<JoinHandle<()>>,
    switch_timer: Option<JoinHandle<()>>,
    /// Consecutive reconnects scheduled since the last successful open.
    reconnect_attempts: u32,
}

impl ConnectionRecord {
    fn timer_slot(&mut self, kind: TimerKind) -> &mut Option<JoinHandle<()>> {
        match kind {
            TimerKind::Reconnect => &mut self.reconnect_timer,
            TimerKind::StreamSwitch => &mut self.switch_timer,
        }
    }

    fn cancel_timers(&mut self) {
        for handle in [self.reconnect_timer.take(), self.switch_timer.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    /// Tear down the current session. Sends a normal-closure frame when the
    /// transport is open.
    fn end_session(&mut self, reason: &str) {
        if let Some(session) = self.session.take() {
            if let Some(keepalive) = session.keepalive {
                keepalive.abort();
            }
            if let Some(outbound) = session.outbound {
                let _ = outbound.send(Outbound::Close {
                    code: NORMAL_CLOSURE,
                    reason: reason.to_string(),
                });
            }
            session.task.abort();
        }
        // Anything still in flight for the old session is now stale.
        self.generation += 1;
    }
}

// =============================================================================
// ConnectionManager
// =============================================================================

struct Shared {
    config: QuoteConfig,
    auth: Arc<dyn AuthProvider>,
    connector: Arc<dyn Connector>,
    store: Arc<QuoteStore>,
    subscriptions: Arc<SubscriptionTracker>,
    executions: broadcast::Sender<Value>,
    status: watch::Sender<ConnectionStatus>,
    record: Mutex<ConnectionRecord>,
}

/// Owns the live quote transport. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        config: QuoteConfig,
        auth: Arc<dyn AuthProvider>,
        connector: Arc<dyn Connector>,
        store: Arc<QuoteStore>,
        subscriptions: Arc<SubscriptionTracker>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (executions, _) = broadcast::channel(EXECUTION_CHANNEL_CAPACITY);
        let stream_type = config.default_stream_type;
        Self {
            shared: Arc::new(Shared {
                config,
                auth,
                connector,
                store,
                subscriptions,
                executions,
                status,
                record: Mutex::new(ConnectionRecord {
                    status: ConnectionStatus::Disconnected,
                    stream_type,
                    generation: 0,
                    session: None,
                    reconnect_timer: None,
                    switch_timer: None,
                    reconnect_attempts: 0,
                }),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open a transport unless one is already open or opening.
    pub fn connect(&self) {
        let mut record = self.shared.record.lock();
        self.shared.connect_locked(&mut record);
    }

    /// Close the transport with a normal closure and cancel every pending
    /// timer. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut record = self.shared.record.lock();
        let was = record.status;
        record.cancel_timers();
        record.end_session("Normal closure");
        record.reconnect_attempts = 0;
        self.shared.set_status(&mut record, ConnectionStatus::Disconnected);
        if was != ConnectionStatus::Disconnected {
            info!(stream = %record.stream_type, "quote stream disconnected");
        }
    }

    pub fn reconnect(&self) {
        self.disconnect();
        self.connect();
    }

    /// React to the session signing in or out.
    pub fn on_auth_changed(&self, authenticated: bool) {
        if !authenticated {
            info!("session not authenticated — disconnecting quote stream");
            self.disconnect();
        } else if self.shared.config.auto_connect {
            info!("session authenticated — connecting quote stream");
            self.connect();
        }
    }

    /// Switch feeds. An active connection is torn down immediately and the
    /// new stream is connected after the settle delay; a burst of switches
    /// collapses into a single connect for the last selected stream.
    pub fn set_stream_type(&self, stream_type: StreamType) {
        let mut record = self.shared.record.lock();
        let switching = record.switch_timer.is_some();
        if record.stream_type == stream_type && !switching {
            return;
        }

        let was_active = record.status.is_active() || switching;
        let previous = record.stream_type;
        record.stream_type = stream_type;

        if !was_active {
            info!(from = %previous, to = %stream_type, "stream type changed while idle");
            return;
        }

        info!(from = %previous, to = %stream_type, "stream type changed — reconnecting");
        record.cancel_timers();
        record.end_session("Stream type changed");
        self.shared.set_status(&mut record, ConnectionStatus::Disconnected);

        let delay = self.shared.config.stream_switch_delay();
        self.shared
            .arm_timer(&mut record, TimerKind::StreamSwitch, delay);
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Record interest in `symbol`; the feed is told on first interest when
    /// the transport is open. Symbols tracked while disconnected are sent when
    /// the next transport opens.
    pub fn subscribe(&self, symbol: &str) -> Subscribed {
        let record = self.shared.record.lock();
        let outcome = self.shared.subscriptions.add(symbol);
        if outcome == Subscribed::First {
            let sent = self.shared.send_locked(&record, &ClientFrame::subscribe(symbol));
            debug!(symbol = %symbol, sent, "symbol subscribed");
        }
        outcome
    }

    pub fn unsubscribe(&self, symbol: &str) -> Unsubscribed {
        let record = self.shared.record.lock();
        let outcome = self.shared.subscriptions.remove(symbol);
        if outcome == Unsubscribed::Last {
            let sent = self
                .shared
                .send_locked(&record, &ClientFrame::unsubscribe(symbol));
            debug!(symbol = %symbol, sent, "symbol unsubscribed");
        }
        outcome
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.shared.record.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn stream_type(&self) -> StreamType {
        self.shared.record.lock().stream_type
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Raw execution payloads received on the exec stream.
    pub fn executions(&self) -> broadcast::Receiver<Value> {
        self.shared.executions.subscribe()
    }

    /// `true` while a reconnect or stream-switch timer is pending.
    pub fn has_pending_reconnect(&self) -> bool {
        let record = self.shared.record.lock();
        record.reconnect_timer.is_some() || record.switch_timer.is_some()
    }
}

// =============================================================================
// Transitions
// =============================================================================

impl Shared {
    fn set_status(&self, record: &mut ConnectionRecord, status: ConnectionStatus) {
        record.status = status;
        self.status.send_replace(status);
    }

    fn connect_locked(self: &Arc<Self>, record: &mut ConnectionRecord) {
        if record.status.is_active() {
            debug!(stream = %record.stream_type, status = %record.status, "already connected or connecting");
            return;
        }

        if !self.auth.is_authenticated() {
            warn!(stream = %record.stream_type, "not authenticated — cannot connect to quote stream");
            self.set_status(record, ConnectionStatus::Error);
            return;
        }

        record.cancel_timers();
        if record.session.is_some() {
            // Errored transport that has not reported its close yet.
            record.end_session("Reconnecting");
        }
        record.generation += 1;
        let generation = record.generation;
        let stream_type = record.stream_type;
        self.set_status(record, ConnectionStatus::Connecting);
        info!(stream = %stream_type, generation, "connecting to quote stream");

        let task = tokio::spawn(run_session(self.clone(), generation, stream_type));
        record.session = Some(Session {
            task,
            outbound: None,
            keepalive: None,
        });
    }

    fn arm_timer(self: &Arc<Self>, record: &mut ConnectionRecord, kind: TimerKind, delay: std::time::Duration) {
        let generation = record.generation;
        let deadline = Instant::now() + delay;
        let shared = self.clone();
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            shared.fire_timer(kind, generation);
        });
        if let Some(old) = record.timer_slot(kind).replace(handle) {
            old.abort();
        }
    }

    fn fire_timer(self: &Arc<Self>, kind: TimerKind, generation: u64) {
        let mut record = self.record.lock();
        if record.generation != generation {
            return;
        }
        // Our own handle; dropping it detaches rather than aborts.
        record.timer_slot(kind).take();
        debug!(?kind, stream = %record.stream_type, "timer fired");
        self.connect_locked(&mut record);
    }

    fn schedule_reconnect(self: &Arc<Self>, record: &mut ConnectionRecord) {
        let cap = self.config.max_reconnect_attempts;
        if cap > 0 && record.reconnect_attempts >= cap {
            error!(
                stream = %record.stream_type,
                attempts = record.reconnect_attempts,
                "reconnect limit reached — giving up"
            );
            return;
        }
        record.reconnect_attempts += 1;
        let delay = self.config.reconnect_interval();
        info!(
            stream = %record.stream_type,
            delay_ms = delay.as_millis() as u64,
            attempt = record.reconnect_attempts,
            "scheduling quote stream reconnect"
        );
        self.arm_timer(record, TimerKind::Reconnect, delay);
    }

    fn should_retry(&self) -> bool {
        self.config.auto_connect && self.auth.is_authenticated()
    }

    /// Transport open: start keepalive, replay subscriptions.
    fn on_open(&self, generation: u64, outbound: &mpsc::UnboundedSender<Outbound>) -> bool {
        let mut record = self.record.lock();
        if record.generation != generation {
            return false;
        }

        let keepalive = spawn_keepalive(
            outbound.clone(),
            self.config.keepalive_interval(),
            record.stream_type,
        );
        if let Some(session) = record.session.as_mut() {
            session.outbound = Some(outbound.clone());
            session.keepalive = Some(keepalive);
        }
        record.reconnect_attempts = 0;
        self.set_status(&mut record, ConnectionStatus::Connected);

        let symbols = self.subscriptions.symbols();
        for symbol in &symbols {
            let _ = outbound.send(Outbound::Text(ClientFrame::subscribe(symbol.as_str()).to_json()));
        }
        info!(stream = %record.stream_type, resubscribed = symbols.len(), "quote stream connected");
        true
    }

    fn on_message(&self, generation: u64, stream_type: StreamType, text: &str) {
        if self.record.lock().generation != generation {
            return;
        }

        match translator::decode(stream_type, text) {
            Ok(message) => {
                if let Applied::Execution(execution) = translator::apply(&self.store, message) {
                    let _ = self.executions.send(execution);
                }
            }
            Err(e) => {
                warn!(stream = %stream_type, error = %e, raw = %text, "failed to parse quote message");
            }
        }
    }

    fn on_transport_error(&self, generation: u64, message: &str) {
        let mut record = self.record.lock();
        if record.generation != generation {
            return;
        }
        error!(stream = %record.stream_type, error = %message, "quote WebSocket error");
        self.set_status(&mut record, ConnectionStatus::Error);
    }

    fn on_close(self: &Arc<Self>, generation: u64, code: Option<u16>, reason: &str) {
        let mut record = self.record.lock();
        if record.generation != generation {
            return;
        }

        if let Some(session) = record.session.take() {
            if let Some(keepalive) = session.keepalive {
                keepalive.abort();
            }
            // `session.task` is the caller; let it finish on its own.
        }
        self.set_status(&mut record, ConnectionStatus::Disconnected);
        info!(stream = %record.stream_type, code = ?code, reason = %reason, "quote stream closed");

        if !is_normal_closure(code) && self.should_retry() {
            self.schedule_reconnect(&mut record);
        }
    }

    /// Token or handshake failure.
    fn on_connect_failed(self: &Arc<Self>, generation: u64, reason: &str) {
        let mut record = self.record.lock();
        if record.generation != generation {
            return;
        }
        error!(stream = %record.stream_type, error = %reason, "failed to connect to quote stream");
        record.session = None;
        self.set_status(&mut record, ConnectionStatus::Error);

        if self.should_retry() {
            self.schedule_reconnect(&mut record);
        }
    }

    fn send_locked(&self, record: &ConnectionRecord, frame: &ClientFrame) -> bool {
        if record.status != ConnectionStatus::Connected {
            return false;
        }
        match record.session.as_ref().and_then(|s| s.outbound.as_ref()) {
            Some(outbound) => outbound.send(Outbound::Text(frame.to_json())).is_ok(),
            None => false,
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Acquire a token, open the transport, then feed inbound events into the
/// state machine until the transport closes.
async fn run_session(shared: Arc<Shared>, generation: u64, stream_type: StreamType) {
    let token = match shared.auth.access_token().await {
        Ok(token) => token,
        Err(e) => {
            shared.on_connect_failed(generation, &e.to_string());
            return;
        }
    };

    let url = match shared.config.authenticated_url(stream_type, &token) {
        Ok(url) => url,
        Err(e) => {
            shared.on_connect_failed(generation, &e.to_string());
            return;
        }
    };
    info!(stream = %stream_type, host = url.host_str().unwrap_or(""), path = url.path(), "opening quote WebSocket");

    let TransportLink {
        outbound,
        mut inbound,
    } = match shared.connector.open(url).await {
        Ok(link) => link,
        Err(e) => {
            shared.on_connect_failed(generation, &e.to_string());
            return;
        }
    };

    if !shared.on_open(generation, &outbound) {
        let _ = outbound.send(Outbound::Close {
            code: NORMAL_CLOSURE,
            reason: "Superseded".into(),
        });
        return;
    }

    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Text(text) => shared.on_message(generation, stream_type, &text),
            TransportEvent::Error(message) => shared.on_transport_error(generation, &message),
            TransportEvent::Closed { code, reason } => {
                shared.on_close(generation, code, &reason);
                return;
            }
        }
    }

    shared.on_close(generation, Some(ABNORMAL_CLOSURE), "transport dropped");
}

fn spawn_keepalive(
    outbound: mpsc::UnboundedSender<Outbound>,
    period: std::time::Duration,
    stream_type: StreamType,
) -> JoinHandle<()> {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            debug!(stream = %stream_type, "sending ping");
            if outbound
                .send(Outbound::Text(ClientFrame::Ping.to_json()))
                .is_err()
            {
                break;
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::advance;

    use crate::auth::StaticTokenAuth;
    use crate::stream::testing::{settle, FakeConnector};

    struct Harness {
        manager: ConnectionManager,
        connector: Arc<FakeConnector>,
        auth: Arc<StaticTokenAuth>,
        store: Arc<QuoteStore>,
    }

    fn harness_with(config: QuoteConfig) -> Harness {
        let connector = FakeConnector::new();
        let auth = Arc::new(StaticTokenAuth::new("secret-token"));
        let store = Arc::new(QuoteStore::new());
        let manager = ConnectionManager::new(
            config,
            auth.clone(),
            connector.clone(),
            store.clone(),
            Arc::new(SubscriptionTracker::new()),
        );
        Harness {
            manager,
            connector,
            auth,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(QuoteConfig::default())
    }

    async fn connected() -> Harness {
        let h = harness();
        h.manager.connect();
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
        h
    }

    #[tokio::test(start_paused = true)]
    async fn connect_twice_opens_one_transport() {
        let h = harness();
        h.manager.connect();
        assert_eq!(h.manager.status(), ConnectionStatus::Connecting);
        h.manager.connect();
        settle().await;

        assert_eq!(h.connector.opened(), 1);
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);

        h.manager.connect();
        settle().await;
        assert_eq!(h.connector.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_travels_as_query_parameter() {
        let h = connected().await;
        let url = h.connector.url(0);
        assert_eq!(url.path(), "/ws_esp");
        assert_eq!(url.query(), Some("access_token=secret-token"));
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_connect_is_an_error_without_retry() {
        let h = harness();
        h.auth.set_authenticated(false);
        h.manager.connect();
        assert_eq!(h.manager.status(), ConnectionStatus::Error);

        advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(h.connector.attempts(), 0);
        assert!(!h.manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_after_delay() {
        let h = connected().await;
        h.connector.close(0, 1006);
        settle().await;

        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h.manager.has_pending_reconnect());

        advance(Duration::from_millis(4_900)).await;
        settle().await;
        assert_eq!(h.connector.opened(), 1);

        advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(h.connector.opened(), 2);
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn server_normal_close_is_not_retried() {
        let h = connected().await;
        h.connector.close(0, 1000);
        settle().await;

        advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(h.connector.opened(), 1);
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_sends_normal_closure_and_never_reconnects() {
        let h = connected().await;
        h.manager.disconnect();
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);

        let sent = h.connector.sent(0);
        assert_eq!(
            sent.last(),
            Some(&Outbound::Close {
                code: 1000,
                reason: "Normal closure".into()
            })
        );

        // A late close from the old socket is ignored.
        h.connector.close(0, 1006);
        advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(h.connector.attempts(), 1);
        assert!(!h.manager.has_pending_reconnect());

        // Idempotent.
        h.manager.disconnect();
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let h = connected().await;
        h.connector.close(0, 1011);
        settle().await;
        assert!(h.manager.has_pending_reconnect());

        h.manager.disconnect();
        assert!(!h.manager.has_pending_reconnect());
        advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_sets_error_until_close() {
        let h = connected().await;
        h.connector.push_error(0, "boom");
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Error);

        h.connector.close(0, 1006);
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h.manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn token_failure_is_retried() {
        let h = harness();
        h.auth.set_token(None);
        h.manager.connect();
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Error);
        assert!(h.manager.has_pending_reconnect());

        h.auth.set_token(Some("fresh".into()));
        advance(Duration::from_millis(5_001)).await;
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
        assert_eq!(h.connector.url(0).query(), Some("access_token=fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_failure_is_retried() {
        let h = harness();
        h.connector.fail_next(1);
        h.manager.connect();
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Error);

        advance(Duration::from_millis(5_001)).await;
        settle().await;
        assert_eq!(h.connector.attempts(), 2);
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_cap_stops_retrying() {
        let mut config = QuoteConfig::default();
        config.max_reconnect_attempts = 2;
        let h = harness_with(config);
        h.connector.fail_next(10);
        h.manager.connect();
        settle().await;

        for _ in 0..5 {
            advance(Duration::from_millis(5_001)).await;
            settle().await;
        }
        assert_eq!(h.connector.attempts(), 3);
        assert_eq!(h.manager.status(), ConnectionStatus::Error);
        assert!(!h.manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_connect_off_never_retries() {
        let mut config = QuoteConfig::default();
        config.auto_connect = false;
        let h = harness_with(config);
        h.manager.connect();
        settle().await;
        h.connector.close(0, 1006);
        settle().await;
        assert!(!h.manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_every_interval() {
        let h = connected().await;
        assert!(h.connector.sent_text(0).is_empty());

        advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(h.connector.sent_text(0), vec![r#"{"type":"ping"}"#]);

        advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(h.connector.sent_text(0).len(), 2);

        h.connector.close(0, 1000);
        settle().await;
        advance(Duration::from_secs(90)).await;
        settle().await;
        assert_eq!(h.connector.sent_text(0).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_before_connect_is_replayed_on_open() {
        let h = harness();
        assert_eq!(h.manager.subscribe("EUR/USD"), Subscribed::First);
        h.manager.connect();
        settle().await;

        assert_eq!(
            h.connector.sent_text(0),
            vec![r#"{"type":"subscribe","symbol":"EUR/USD"}"#]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn only_first_and_last_interest_reach_the_wire() {
        let h = connected().await;
        h.manager.subscribe("EUR/USD");
        h.manager.subscribe("EUR/USD");
        h.manager.unsubscribe("EUR/USD");
        assert_eq!(h.connector.sent_text(0).len(), 1);

        h.manager.unsubscribe("EUR/USD");
        assert_eq!(
            h.connector.sent_text(0),
            vec![
                r#"{"type":"subscribe","symbol":"EUR/USD"}"#,
                r#"{"type":"unsubscribe","symbol":"EUR/USD"}"#,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_the_store() {
        let h = connected().await;
        h.connector.push_text(
            0,
            r#"{"symbol":"EUR/USD","price":"1.1000","quantity":"5","entry_type":"0","time_stamp":"1000000"}"#,
        );
        h.connector.push_text(0, "garbage");
        h.connector.push_text(0, r#"{"type":"pong"}"#);
        h.connector.push_text(
            0,
            r#"{"symbol":"EUR/USD","price":"1.1002","quantity":"7","entry_type":"1","time_stamp":"2000000"}"#,
        );
        settle().await;

        let q = h.store.get("EUR/USD").unwrap();
        assert_eq!(q.bid, 1.1000);
        assert_eq!(q.ask, 1.1002);
        assert_eq!(q.volume, 7);
        assert_eq!(q.timestamp, 2_000);
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn executions_are_forwarded_not_stored() {
        let mut config = QuoteConfig::default();
        config.default_stream_type = StreamType::Exec;
        let h = harness_with(config);
        let mut executions = h.manager.executions();
        h.manager.connect();
        settle().await;

        h.connector
            .push_text(0, r#"{"execution_data":{"id":"X1","symbol":"EUR/USD"}}"#);
        settle().await;

        let exec = executions.try_recv().unwrap();
        assert_eq!(exec["id"], "X1");
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn three_switches_collapse_into_one_connect() {
        let h = connected().await;
        h.manager.set_stream_type(StreamType::Rfs);
        h.manager.set_stream_type(StreamType::Exec);
        h.manager.set_stream_type(StreamType::Rfs);
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.manager.stream_type(), StreamType::Rfs);

        advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(h.connector.opened(), 1);

        advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(h.connector.opened(), 2);
        assert_eq!(h.connector.url(1).path(), "/ws_rfs");
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);

        advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.connector.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_while_idle_only_records_the_stream() {
        let h = harness();
        h.manager.set_stream_type(StreamType::Exec);
        assert!(!h.manager.has_pending_reconnect());
        advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(h.connector.attempts(), 0);

        h.manager.connect();
        settle().await;
        assert_eq!(h.connector.url(0).path(), "/ws_exec");
    }

    #[tokio::test(start_paused = true)]
    async fn late_close_from_switched_socket_is_ignored() {
        let h = connected().await;
        h.manager.set_stream_type(StreamType::Rfs);
        advance(Duration::from_millis(1_001)).await;
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);

        h.connector.close(0, 1006);
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
        assert!(!h.manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn losing_authentication_disconnects_for_good() {
        let h = connected().await;
        h.connector.close(0, 1006);
        settle().await;
        assert!(h.manager.has_pending_reconnect());

        h.auth.set_authenticated(false);
        h.manager.on_auth_changed(false);
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(!h.manager.has_pending_reconnect());

        advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(h.connector.attempts(), 1);

        h.auth.set_authenticated(true);
        h.manager.on_auth_changed(true);
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
        assert_eq!(h.connector.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_transport_error_replaces_the_errored_session() {
        let h = connected().await;
        h.connector.push_error(0, "reset");
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Error);

        h.manager.connect();
        settle().await;
        assert_eq!(
            h.connector.sent(0).last(),
            Some(&Outbound::Close {
                code: 1000,
                reason: "Reconnecting".into()
            })
        );
        assert_eq!(h.connector.opened(), 2);
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);

        // The old socket's close arrives late and changes nothing.
        h.connector.close(0, 1006);
        settle().await;
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
        assert!(!h.manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_without_auto_connect_stays_idle() {
        let mut config = QuoteConfig::default();
        config.auto_connect = false;
        let h = harness_with(config);

        h.manager.on_auth_changed(true);
        settle().await;
        advance(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(h.connector.attempts(), 0);
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn status_changes_are_observable() {
        let h = harness();
        let mut rx = h.manager.status_changes();
        h.manager.connect();
        settle().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_opens_a_fresh_transport() {
        let h = connected().await;
        h.manager.reconnect();
        settle().await;
        assert_eq!(h.connector.opened(), 2);
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
    }
}
