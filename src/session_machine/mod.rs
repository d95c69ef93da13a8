//! Session Machine — connection lifecycle + protocol state machine layered
//! over a Transport (§4.2).
//!
//! One generic `SessionMachine<P: VenueProtocol>` serves both
//! specializations named in §4.2 (public/private): "the source's private
//! and public adapters are near-duplicates of the same session machine
//! specialized on authentication; the design factors out the common
//! machine and keeps venue differences only in the protocol capability"
//! (§9). `SessionKind` (carried in `new`) picks the branch at `connect()`
//! time; everything else — reconnect/backoff, liveness watchdog,
//! ping/pong, ordering — is shared.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};



use crate::config::ReconnectCaps;
use crate::domain::{SessionId, SessionKind, SessionState, Symbol};
use crate::error::CoreError;
use crate::multiplexer::Multiplexer;
use crate::subscription::{SubscriptionKey, SubscriptionRegistry};
use crate::transport::{Transport, TransportEvent};
use crate::venue_protocol::{CreateOrderRequest, InboundMessage, VenueProtocol};

/// Liveness watchdog tick interval (§4.2).
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);
/// Dead-connection threshold once past the grace period (§4.2).
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(15);
/// Suppresses false positives right after a fresh connect (§4.2).
const LIVENESS_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Private sessions always subscribe these two channels on authentication,
/// in addition to any caller-configured defaults (§4.8, §6).
pub const EXECUTIONS_CHANNEL: &str = "executions";
pub const BALANCES_CHANNEL: &str = "balances";

/// Source of authentication tokens — an adapter over
/// [`crate::credential::CredentialService`] so `SessionMachine` does not
/// need to be generic over the token issuer too.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn get_token(&self) -> Result<String, CoreError>;
}

#[async_trait]
impl<I> TokenSource for crate::credential::CredentialService<I>
where
    I: crate::credential::TokenIssuer + Send + Sync + 'static,
{
    async fn get_token(&self) -> Result<String, CoreError> {
        self.get_token().await.map(|t| t.value)
    }
}

/// Events a `SessionMachine` reports to its owner (the Adapter Facade).
/// Market-data and execution payloads are forwarded as `Inbound` for the
/// Order-Book Assembler / Execution Reconciler to process — the session
/// machine's job stops at decoding the wire frame into canonical shape.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected { reason: String },
    Inbound(InboundMessage),
    Error(CoreError),
}

type TransportFactory = Arc<dyn Fn() -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) + Send + Sync>;

struct Shared {
    state: Mutex<SessionState>,
    manual_close: AtomicBool,
    reconnect_attempts: AtomicU32,
    last_message_at: Mutex<Option<Instant>>,
    connected_at: Mutex<Option<Instant>>,
    /// Instant of the first failure in the current reconnect run; cleared on
    /// every successful `Connected` transition. Backs the `max_elapsed` bound
    /// (§7: reconnect is "bounded only by total elapsed time, not attempt
    /// count").
    reconnect_started_at: Mutex<Option<Instant>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    subscriptions: Mutex<SubscriptionRegistry>,
}

/// One lifecycle of one transport connection plus its protocol state (§3,
/// §4.2). Exclusively owns its Transport and Subscription Registry, as §3
/// specifies.
pub struct SessionMachine<P: VenueProtocol + 'static> {
    pub id: SessionId,
    pub kind: SessionKind,
    venue: String,
    protocol: Arc<P>,
    transport_factory: TransportFactory,
    token_source: Option<Arc<dyn TokenSource>>,
    api_key: String,
    multiplexer: Arc<Multiplexer>,
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    reconnect_caps: ReconnectCaps,
    default_subscriptions: Vec<SubscriptionKey>,
}

impl<P: VenueProtocol + 'static> SessionMachine<P> {
    /// `default_subscriptions` are (channel, symbol) pairs re-requested on
    /// every successful connect/reconnect for public sessions, and on
    /// reconnect for private sessions (which additionally always
    /// subscribes `executions`/`balances` on the authenticating path,
    /// §4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        kind: SessionKind,
        venue: impl Into<String>,
        protocol: Arc<P>,
        transport_factory: TransportFactory,
        token_source: Option<Arc<dyn TokenSource>>,
        api_key: impl Into<String>,
        reconnect_caps: ReconnectCaps,
        default_subscriptions: Vec<SubscriptionKey>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let machine = Self {
            id,
            kind,
            venue: venue.into(),
            protocol,
            transport_factory,
            token_source,
            api_key: api_key.into(),
            multiplexer: Arc::new(Multiplexer::new()),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Disconnected),
                manual_close: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                last_message_at: Mutex::new(None),
                connected_at: Mutex::new(None),
                reconnect_started_at: Mutex::new(None),
                transport: Mutex::new(None),
                subscriptions: Mutex::new(SubscriptionRegistry::new()),
            }),
            events_tx,
            reconnect_caps,
            default_subscriptions,
        };
        (machine, events_rx)
    }

    pub async fn state(&self) -> SessionState {
        *self.shared.state.lock().await
    }

    /// Idempotent: a no-op if already connecting/connected (§6 "idempotent").
    pub async fn connect(self: &Arc<Self>) -> Result<(), CoreError> {
        {
            let state = self.shared.state.lock().await;
            if !matches!(*state, SessionState::Disconnected | SessionState::Failed) {
                return Ok(());
            }
        }
        self.shared.manual_close.store(false, Ordering::SeqCst);
        *self.shared.state.lock().await = SessionState::Connecting;
        info!(session = %self.id, venue = %self.venue, kind = ?self.kind, "connecting session");

        let me = Arc::clone(self);
        tokio::spawn(async move {
            me.run_supervisor().await;
        });

        Ok(())
    }

    /// Cancels all timers, fails all pending requests, closes the
    /// transport, and schedules no reconnect (§4.2).
    pub async fn disconnect(&self) {
        self.shared.manual_close.store(true, Ordering::SeqCst);
        *self.shared.state.lock().await = SessionState::Disconnecting;
        self.multiplexer.fail_all_on_disconnect().await;
        if let Some(transport) = self.shared.transport.lock().await.take() {
            transport.close().await;
        }
        *self.shared.state.lock().await = SessionState::Disconnected;
        *self.shared.reconnect_started_at.lock().await = None;
    }

    /// Forces an immediate reconnect, as if the transport had dropped —
    /// used by the stale-data watchdog (§4.6: "the entire connection is
    /// recycled") and the liveness watchdog (§4.2).
    pub async fn force_reconnect(&self, reason: &str) {
        warn!(session = %self.id, reason, "forcing reconnect");
        if let Some(transport) = self.shared.transport.lock().await.take() {
            transport.close().await;
        }
    }

    async fn is_manual_close(&self) -> bool {
        self.shared.manual_close.load(Ordering::SeqCst)
    }

    /// Drives one connect attempt, then loops on reconnect until manually
    /// disconnected. Runs as a background task for the lifetime of the
    /// session.
    async fn run_supervisor(self: Arc<Self>) {
        loop {
            if self.is_manual_close().await {
                break;
            }

            match self.attempt_connect().await {
                Ok((transport, mut rx)) => {
                    *self.shared.transport.lock().await = Some(Arc::clone(&transport));
                    *self.shared.connected_at.lock().await = Some(Instant::now());
                    *self.shared.last_message_at.lock().await = Some(Instant::now());
                    self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
                    *self.shared.reconnect_started_at.lock().await = None;

                    if let Err(e) = self.on_transport_open().await {
                        error!(session = %self.id, error = %e, "post-connect setup failed");
                        let _ = self.events_tx.send(SessionEvent::Error(e));
                    } else {
                        let _ = self.events_tx.send(SessionEvent::Connected);
                    }

                    let watchdog_handle = self.spawn_liveness_watchdog();
                    let reason = self.process_until_closed(&mut rx).await;
                    watchdog_handle.abort();

                    *self.shared.transport.lock().await = None;
                    self.multiplexer.fail_all_on_disconnect().await;
                    let _ = self.events_tx.send(SessionEvent::Disconnected { reason });
                }
                Err(e) => {
                    error!(session = %self.id, error = %e, "connect attempt failed");
                    let _ = self.events_tx.send(SessionEvent::Error(e));
                }
            }

            if self.is_manual_close().await {
                *self.shared.state.lock().await = SessionState::Disconnected;
                break;
            }

            *self.shared.state.lock().await = SessionState::Failed;

            let started_at = {
                let mut started = self.shared.reconnect_started_at.lock().await;
                *started.get_or_insert(Instant::now())
            };
            if let Some(max_elapsed) = self.reconnect_caps.max_elapsed {
                if started_at.elapsed() >= max_elapsed {
                    error!(
                        session = %self.id,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "reconnect budget (max_elapsed) exhausted, giving up"
                    );
                    let _ = self.events_tx.send(SessionEvent::Error(CoreError::Transport(format!(
                        "reconnect abandoned after {}ms, exceeding max_elapsed",
                        started_at.elapsed().as_millis()
                    ))));
                    *self.shared.state.lock().await = SessionState::Disconnected;
                    *self.shared.reconnect_started_at.lock().await = None;
                    break;
                }
            }

            let delay = self.next_backoff_delay();
            debug!(session = %self.id, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::time::sleep(delay).await;
            *self.shared.state.lock().await = SessionState::Connecting;
        }
    }

    /// `delay = min(max_delay, initial_delay * 2^attempt * U[0.85, 1.15])` (§4.2).
    fn next_backoff_delay(&self) -> Duration {
        let attempt = self.shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        let jitter = rand::thread_rng().gen_range(0.85..=1.15);
        let base = self.reconnect_caps.initial_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let scaled = (base * jitter).min(self.reconnect_caps.max_delay.as_secs_f64());
        Duration::from_secs_f64(scaled.max(0.0))
    }

    async fn attempt_connect(&self) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>), CoreError> {
        let (transport, rx) = (self.transport_factory)();
        tokio::time::timeout(INITIAL_CONNECT_TIMEOUT, transport.open())
            .await
            .map_err(|_| CoreError::Timeout {
                operation: "connect".into(),
                timeout_ms: INITIAL_CONNECT_TIMEOUT.as_millis() as u64,
            })?
            .map_err(|e| CoreError::Transport(e.to_string()))?;
        Ok((transport, rx))
    }

    /// Public sessions go straight to `Connected` + default subscriptions;
    /// private sessions authenticate first (§4.2).
    async fn on_transport_open(&self) -> Result<(), CoreError> {
        match self.kind {
            SessionKind::Public => {
                *self.shared.state.lock().await = SessionState::Connected;
                self.resubscribe_all().await;
            }
            SessionKind::Private => {
                *self.shared.state.lock().await = SessionState::Authenticating;
                self.authenticate().await?;
                *self.shared.state.lock().await = SessionState::Authenticated;
                self.subscribe(EXECUTIONS_CHANNEL, None).await?;
                self.subscribe(BALANCES_CHANNEL, None).await?;
                self.resubscribe_all().await;
            }
        }
        Ok(())
    }

    async fn authenticate(&self) -> Result<(), CoreError> {
        let Some(token_source) = &self.token_source else {
            return Err(CoreError::Auth("no credential service configured".into()));
        };
        let token = token_source.get_token().await?;
        let request_id = self.multiplexer.next_request_id();
        let frame = self.protocol.encode_logon(&self.api_key, &token, &request_id);
        self.send_frame(frame).await?;
        Ok(())
    }

    /// Re-requests every previously active `(channel, symbol)` plus the
    /// session's configured defaults (§4.5: resubscription after reconnect).
    async fn resubscribe_all(&self) {
        let mut keys = self.shared.subscriptions.lock().await.reset_for_reconnect();
        for default in &self.default_subscriptions {
            if !keys.contains(default) {
                keys.push(default.clone());
            }
        }
        for key in keys {
            if let Err(e) = self.subscribe(&key.channel, Some(key.symbol)).await {
                warn!(session = %self.id, error = %e, "resubscribe failed");
            }
        }
    }

    pub async fn subscribe(&self, channel: &str, symbol: Option<Symbol>) -> Result<(), CoreError> {
        let request_id = self.multiplexer.next_request_id();
        let frame = self.protocol.encode_subscribe(channel, symbol.as_ref(), &request_id);
        if let Some(sym) = &symbol {
            self.shared.subscriptions.lock().await.mark_pending(SubscriptionKey::new(channel, sym.clone()));
        }
        self.send_frame(frame).await
    }

    pub async fn unsubscribe(&self, channel: &str, symbol: Option<Symbol>) -> Result<(), CoreError> {
        let request_id = self.multiplexer.next_request_id();
        let frame = self.protocol.encode_unsubscribe(channel, symbol.as_ref(), &request_id);
        if let Some(sym) = &symbol {
            self.shared.subscriptions.lock().await.remove(&SubscriptionKey::new(channel, sym.clone()));
        }
        self.send_frame(frame).await
    }

    pub fn active_subscriptions(&self) -> Arc<Mutex<SubscriptionRegistry>> {
        Arc::clone(&self.shared.subscriptions)
    }

    /// Transmits an order request, correlating the response through the
    /// Request-Response Multiplexer with the crate's default timeout (§4.4).
    pub async fn send_order(&self, request: &CreateOrderRequest) -> Result<serde_json::Value, CoreError> {
        let protocol = Arc::clone(&self.protocol);
        let request = request.clone();
        self.with_transport(|transport| {
            self.multiplexer.send_request(DEFAULT_REQUEST_TIMEOUT, move |request_id| {
                let frame = protocol.encode_order(&request, &request_id);
                let transport = Arc::clone(&transport);
                async move { transport.send(frame).await.map_err(|e| CoreError::Transport(e.to_string())) }
            })
        })
        .await
    }

    pub async fn send_cancel(
        &self,
        exchange_id: Option<&crate::domain::ExchangeOrderId>,
        client_order_id: &crate::domain::OrderId,
    ) -> Result<serde_json::Value, CoreError> {
        let protocol = Arc::clone(&self.protocol);
        let exchange_id = exchange_id.cloned();
        let client_order_id = client_order_id.clone();
        self.with_transport(|transport| {
            self.multiplexer.send_request(DEFAULT_REQUEST_TIMEOUT, move |request_id| {
                let frame = protocol.encode_cancel(exchange_id.as_ref(), &client_order_id, &request_id);
                let transport = Arc::clone(&transport);
                async move { transport.send(frame).await.map_err(|e| CoreError::Transport(e.to_string())) }
            })
        })
        .await
    }

    async fn with_transport<F, Fut>(&self, f: F) -> Result<serde_json::Value, CoreError>
    where
        F: FnOnce(Arc<dyn Transport>) -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, CoreError>>,
    {
        let transport = self
            .shared
            .transport
            .lock()
            .await
            .clone()
            .ok_or_else(|| CoreError::Transport("session not connected".into()))?;
        f(transport).await
    }

    async fn send_frame(&self, frame: String) -> Result<(), CoreError> {
        let transport = self
            .shared
            .transport
            .lock()
            .await
            .clone()
            .ok_or_else(|| CoreError::Transport("session not connected".into()))?;
        transport.send(frame).await.map_err(|e| CoreError::Transport(e.to_string()))
    }

    /// Processes inbound transport events until the connection drops,
    /// returning a human-readable reason.
    async fn process_until_closed(&self, rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> String {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Message(text) => {
                    *self.shared.last_message_at.lock().await = Some(Instant::now());
                    self.handle_inbound(self.protocol.decode_frame(&text)).await;
                }
                TransportEvent::Closed => return "closed by peer".into(),
                TransportEvent::Error(e) => return e,
            }
        }
        "transport channel dropped".into()
    }

    async fn handle_inbound(&self, message: InboundMessage) {
        match message {
            InboundMessage::Ping { request_id } => {
                let frame = self.protocol.encode_pong(request_id.as_ref());
                if let Err(e) = self.send_frame(frame).await {
                    warn!(session = %self.id, error = %e, "failed to send pong");
                }
            }
            InboundMessage::Heartbeat => {}
            InboundMessage::RequestResponse { request_id, payload } => {
                self.multiplexer.complete(&request_id, payload).await;
            }
            InboundMessage::RequestError { request_id, message } => {
                if let Some(id) = request_id {
                    self.multiplexer
                        .fail(&id, CoreError::Venue { request_id: id.to_string(), message })
                        .await;
                } else {
                    warn!(session = %self.id, message, "protocol error without req_id");
                    let _ = self
                        .events_tx
                        .send(SessionEvent::Error(CoreError::Protocol(message)));
                }
            }
            InboundMessage::SubscriptionAck { channel, symbol } => {
                if let Some(symbol) = symbol {
                    self.shared
                        .subscriptions
                        .lock()
                        .await
                        .mark_active(&SubscriptionKey::new(channel, symbol));
                }
            }
            InboundMessage::Unrecognized => {}
            other => {
                let _ = self.events_tx.send(SessionEvent::Inbound(other));
            }
        }
    }

    fn spawn_liveness_watchdog(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                interval.tick().await;
                let state = *me.shared.state.lock().await;
                if !state.is_connected() {
                    continue;
                }
                let connected_at = *me.shared.connected_at.lock().await;
                if let Some(connected_at) = connected_at {
                    if connected_at.elapsed() < LIVENESS_GRACE {
                        continue;
                    }
                }
                let last = *me.shared.last_message_at.lock().await;
                if let Some(last) = last {
                    if last.elapsed() > LIVENESS_TIMEOUT {
                        me.force_reconnect("liveness watchdog: no messages within timeout").await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue_protocol::json_venue::JsonVenueProtocol;
    use std::sync::atomic::AtomicUsize;

    /// In-memory transport that replays a scripted set of frames and
    /// records every sent frame, letting tests drive `SessionMachine`
    /// without a real network.
    struct MockTransport {
        open_count: AtomicUsize,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(&self) -> Result<(), crate::transport::TransportError> {
            self.open_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send(&self, frame: String) -> Result<(), crate::transport::TransportError> {
            self.sent.lock().await.push(frame);
            Ok(())
        }
        async fn close(&self) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn connect_transitions_public_session_to_connected_and_emits_event() {
        let factory: TransportFactory = Arc::new(move || {
            let (_tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(MockTransport {
                open_count: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            });
            (transport as Arc<dyn Transport>, rx)
        });

        let (machine, mut session_events) = SessionMachine::new(
            SessionId::new("s1"),
            SessionKind::Public,
            "testvenue",
            Arc::new(JsonVenueProtocol::default()),
            factory,
            None,
            "",
            ReconnectCaps::default(),
            vec![],
        );
        let machine = Arc::new(machine);
        machine.connect().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), session_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SessionEvent::Connected));
        assert_eq!(machine.state().await, SessionState::Connected);
    }

    /// Transport whose `open()` always fails, for exercising the
    /// `max_elapsed` reconnect budget.
    struct AlwaysFailingTransport;

    #[async_trait]
    impl Transport for AlwaysFailingTransport {
        async fn open(&self) -> Result<(), crate::transport::TransportError> {
            Err(crate::transport::TransportError::Connect("refused".into()))
        }
        async fn send(&self, _frame: String) -> Result<(), crate::transport::TransportError> {
            Err(crate::transport::TransportError::NotOpen)
        }
        async fn close(&self) {}
        fn is_open(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn gives_up_and_emits_terminal_error_once_max_elapsed_is_exceeded() {
        let factory: TransportFactory = Arc::new(|| {
            let (_tx, rx) = mpsc::unbounded_channel();
            (Arc::new(AlwaysFailingTransport) as Arc<dyn Transport>, rx)
        });

        let caps = ReconnectCaps {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_elapsed: Some(Duration::from_millis(50)),
        };

        let (machine, mut session_events) = SessionMachine::new(
            SessionId::new("s1"),
            SessionKind::Public,
            "testvenue",
            Arc::new(JsonVenueProtocol::default()),
            factory,
            None,
            "",
            caps,
            vec![],
        );
        let machine = Arc::new(machine);
        machine.connect().await.unwrap();

        let deadline = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match session_events.recv().await {
                    Some(SessionEvent::Error(CoreError::Transport(msg))) if msg.contains("max_elapsed") => {
                        return;
                    }
                    Some(_) => continue,
                    None => panic!("session event channel closed before terminal error"),
                }
            }
        })
        .await;

        assert!(deadline.is_ok(), "expected a terminal max_elapsed error within the timeout");
        assert_eq!(machine.state().await, SessionState::Disconnected);
    }

    #[test]
    fn backoff_delay_never_exceeds_max_delay() {
        let caps = ReconnectCaps {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_elapsed: None,
        };
        let shared = Shared {
            state: Mutex::new(SessionState::Failed),
            manual_close: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(20),
            last_message_at: Mutex::new(None),
            connected_at: Mutex::new(None),
            reconnect_started_at: Mutex::new(None),
            transport: Mutex::new(None),
            subscriptions: Mutex::new(SubscriptionRegistry::new()),
        };
        let (events_tx, _rx) = mpsc::unbounded_channel();
        let machine: SessionMachine<JsonVenueProtocol> = SessionMachine {
            id: SessionId::new("s1"),
            kind: SessionKind::Public,
            venue: "v".into(),
            protocol: Arc::new(JsonVenueProtocol::default()),
            transport_factory: Arc::new(|| unreachable!()),
            token_source: None,
            api_key: String::new(),
            multiplexer: Arc::new(Multiplexer::new()),
            shared: Arc::new(shared),
            events_tx,
            reconnect_caps: caps,
            default_subscriptions: vec![],
        };
        let delay = machine.next_backoff_delay();
        assert!(delay <= Duration::from_secs(5));
    }
}
