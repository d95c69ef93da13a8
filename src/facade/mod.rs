//! Adapter Facade — the one surface the strategy talks to (§4.10).
//!
//! Owns a public (market-data) [`SessionMachine`] and, in `Live` mode, a
//! private (authenticated) one; wires their decoded frames through the
//! Order-Book Assembler and Execution Reconciler into the exchange-agnostic
//! [`AdapterEvent`] stream. In `Paper` mode the private session is never
//! opened at all (§4.10) — orders are filled in-process by a
//! [`PaperFillSimulator`] instead.

mod fee_cache;
mod paper;

pub use fee_cache::FeeCache;
pub use paper::{PaperFillSimulator, SimplePaperFillSimulator};

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

use crate::config::{AdapterConfig, TradingMode};
use crate::domain::{
    AdapterEvent, ExchangeOrderId, FeeRates, Order, OrderId, OrderSide, OrderStatus, OrderType,
    SessionId, SessionKind, Symbol,
};
use crate::error::CoreError;
use crate::orderbook_assembler::{self, OrderBookAssembler};
use crate::reconciler::{ExecutionReconciler, ReconcileOutcome};
use crate::session_machine::{SessionEvent, SessionMachine, TokenSource};
use crate::store::OrderStore;
use crate::transport::{Transport, TransportEvent, WebSocketTransport};
use crate::venue_protocol::{CreateOrderRequest, ExecType, ExecutionReportRaw, FeeReportField, InboundMessage, VenueProtocol};

type TransportFactory = Arc<dyn Fn() -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) + Send + Sync>;

fn websocket_factory(url: impl Into<String>) -> TransportFactory {
    let url = url.into();
    Arc::new(move || {
        let (transport, rx) = WebSocketTransport::new(url.clone());
        (Arc::new(transport) as Arc<dyn Transport>, rx)
    })
}

/// Everything the facade needs to stand up its session machine(s) beyond
/// what [`AdapterConfig`] already carries — connection endpoints and the
/// external collaborators (§1: token issuance, durable store) it does not
/// own the implementation of.
pub struct FacadeDeps<P: VenueProtocol + 'static> {
    pub protocol: Arc<P>,
    pub public_url: String,
    /// `None` is only valid in `Paper` mode (§4.10).
    pub private_url: Option<String>,
    pub token_source: Option<Arc<dyn TokenSource>>,
    pub store: Arc<dyn OrderStore>,
    pub paper_simulator: Option<Arc<dyn PaperFillSimulator>>,
}

/// The exchange-agnostic contract the strategy drives (§6).
pub struct AdapterFacade<P: VenueProtocol + 'static> {
    config: AdapterConfig,
    protocol: Arc<P>,
    public_session: Arc<SessionMachine<P>>,
    private_session: Option<Arc<SessionMachine<P>>>,
    assembler: Arc<Mutex<OrderBookAssembler>>,
    reconciler: Arc<ExecutionReconciler>,
    store: Arc<dyn OrderStore>,
    fee_cache: Arc<Mutex<FeeCache>>,
    paper_simulator: Option<Arc<dyn PaperFillSimulator>>,
    symbol: Symbol,
}

impl<P: VenueProtocol + 'static> AdapterFacade<P> {
    pub fn new(
        config: AdapterConfig,
        deps: FacadeDeps<P>,
    ) -> (Self, mpsc::UnboundedReceiver<AdapterEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let symbol = Symbol::new(config.symbol.clone());

        let public_session_id = SessionId::new(
            config
                .session_id
                .clone()
                .unwrap_or_else(|| format!("{}-public", config.venue)),
        );
        let (public_session, public_events) = SessionMachine::new(
            public_session_id,
            SessionKind::Public,
            config.venue.clone(),
            Arc::clone(&deps.protocol),
            websocket_factory(deps.public_url),
            None,
            "",
            config.reconnect_caps.clone(),
            vec![],
        );
        let public_session = Arc::new(public_session);

        let private_session = if config.trading_mode == TradingMode::Live {
            let private_url = deps
                .private_url
                .clone()
                .expect("live trading mode requires a private session endpoint");
            let private_session_id = SessionId::new(format!("{}-private", config.venue));
            let (private_session, private_events) = SessionMachine::new(
                private_session_id.clone(),
                SessionKind::Private,
                config.venue.clone(),
                Arc::clone(&deps.protocol),
                websocket_factory(private_url),
                deps.token_source.clone(),
                config.api_key.clone(),
                config.reconnect_caps.clone(),
                vec![],
            );
            let private_session = Arc::new(private_session);
            (private_session, private_events).into()
        } else {
            None
        };

        let assembler = Arc::new(Mutex::new(
            OrderBookAssembler::new(config.order_book_depth),
        ));
        let reconciler = Arc::new(ExecutionReconciler::new(Arc::clone(&deps.store)));
        let fee_cache = Arc::new(Mutex::new(FeeCache::new(std::time::Duration::from_millis(
            config.fee_refresh_interval_ms,
        ))));

        spawn_session_event_loop_with_rx(
            Arc::clone(&public_session),
            public_events,
            Arc::clone(&assembler),
            Arc::clone(&reconciler),
            Arc::clone(&deps.protocol),
            Arc::clone(&fee_cache),
            events_tx.clone(),
        );
        spawn_stale_book_watchdog(Arc::clone(&public_session), Arc::clone(&assembler));

        let paper_simulator = match config.trading_mode {
            TradingMode::Paper => Some(
                deps.paper_simulator
                    .clone()
                    .unwrap_or_else(|| Arc::new(SimplePaperFillSimulator) as Arc<dyn PaperFillSimulator>),
            ),
            TradingMode::Live => deps.paper_simulator.clone(),
        };

        let private_session = if let Some((session, rx)) = private_session {
            spawn_session_event_loop_with_rx(
                Arc::clone(&session),
                rx,
                Arc::clone(&assembler),
                Arc::clone(&reconciler),
                Arc::clone(&deps.protocol),
                Arc::clone(&fee_cache),
                events_tx.clone(),
            );
            Some(session)
        } else {
            None
        };

        let facade = Self {
            config,
            protocol: deps.protocol,
            public_session,
            private_session,
            assembler,
            reconciler,
            store: deps.store,
            fee_cache,
            paper_simulator,
            symbol,
        };

        (facade, events_rx)
    }

    pub async fn connect(&self) -> Result<(), CoreError> {
        self.public_session.connect().await?;
        if let Some(private) = &self.private_session {
            private.connect().await?;
        }
        if self.config.subscribe_to_order_book {
            self.subscribe_order_book(&self.symbol).await?;
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.public_session.disconnect().await;
        if let Some(private) = &self.private_session {
            private.disconnect().await;
        }
        self.assembler.lock().await.drop_all();
    }

    pub async fn subscribe_order_book(&self, symbol: &Symbol) -> Result<(), CoreError> {
        self.public_session.subscribe("book", Some(symbol.clone())).await
    }

    pub async fn subscribe_trades(&self, symbol: &Symbol) -> Result<(), CoreError> {
        self.public_session.subscribe("trades", Some(symbol.clone())).await
    }

    /// Re-requests the `balances` channel, which (per the shipped protocols'
    /// convention, §6) re-pushes a full snapshot on every (re)subscribe.
    pub async fn fetch_balances(&self) -> Result<(), CoreError> {
        let private = self
            .private_session
            .as_ref()
            .ok_or_else(|| CoreError::Validation("fetch_balances requires a private session".into()))?;
        private.subscribe(crate::session_machine::BALANCES_CHANNEL, None).await
    }

    pub async fn get_current_fees(&self, symbol: &Symbol, force_refresh: bool) -> FeeRates {
        self.fee_cache
            .lock()
            .await
            .get_or_refresh(self.protocol.as_ref(), symbol, force_refresh)
    }

    /// Creates an order. In `Paper` mode it is booked locally and filled
    /// immediately via the configured [`PaperFillSimulator`]; in `Live`
    /// mode it is sent to the venue over the private session (§4.10).
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, CoreError> {
        if request.order_type == OrderType::Limit && request.price.is_none() {
            return Err(CoreError::Validation("limit order requires a price".into()));
        }
        if request.size.is_sign_negative() || request.size.is_zero() {
            return Err(CoreError::Validation("order size must be positive".into()));
        }

        let session_id = self
            .private_session
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| self.public_session.id.clone());

        let now = Utc::now();
        // §4.7: "Compute TTL: explicit > default-per-side" — an explicit
        // `ttl_s` on the request always wins over the buy/sell default.
        let ttl_ms = request
            .ttl_s
            .map(|s| s * 1_000)
            .unwrap_or_else(|| self.config.ttl_overrides.for_side(request.side));
        let order = Order {
            internal_id: request.client_order_id.clone(),
            exchange_id: None,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            size: request.size,
            filled_size: Decimal::ZERO,
            remaining_size: request.size,
            status: OrderStatus::Pending,
            created_at: now,
            last_updated: now,
            ttl_ms,
            expires_at: now + chrono::Duration::milliseconds(ttl_ms as i64),
            session_id: session_id.clone(),
            parent_order_id: request.parent_order_id.clone(),
            purpose: request.purpose.clone(),
            pricing_metadata: request.pricing_metadata.clone(),
        };

        self.store
            .add(&order)
            .await
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        self.reconciler.track_pending(order.clone()).await;

        match self.config.trading_mode {
            TradingMode::Paper => {
                let simulator = self
                    .paper_simulator
                    .clone()
                    .expect("paper mode always configures a simulator");
                let report = simulator.simulate_fill(&request).await;
                let fee_rates = self.get_current_fees(&request.symbol, false).await;
                let outcome = self.reconciler.reconcile(report, &session_id, fee_rates).await;
                log_discarded(&outcome);
            }
            TradingMode::Live => {
                let private = self
                    .private_session
                    .as_ref()
                    .ok_or_else(|| CoreError::Validation("live trading requires a private session".into()))?;
                private.send_order(&request).await?;
            }
        }

        Ok(order)
    }

    /// Cancels a locally-tracked order. Per §9 Open Question (b): this does
    /// exactly one store lookup; if the order is gone or never received an
    /// exchange id, that is "insufficient information" and cancellation is
    /// a no-op rather than an error or a second lookup attempt.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<(), CoreError> {
        let order = self
            .store
            .get_by_id(order_id)
            .await
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        let Some(order) = order else {
            warn!(order_id = %order_id, "cancel_order: unknown order, ignoring");
            return Ok(());
        };
        if order.is_terminal() {
            return Ok(());
        }

        self.reconciler.cancel_tracker().mark(order_id.clone()).await;

        match self.config.trading_mode {
            TradingMode::Paper => {
                if order.exchange_id.is_none() {
                    warn!(order_id = %order_id, "cancel_order: no exchange id yet, insufficient information to cancel");
                    self.reconciler.cancel_tracker().clear(order_id).await;
                    return Ok(());
                }
                let report = cancel_report(&order);
                let fee_rates = self.get_current_fees(&order.symbol, false).await;
                let outcome = self
                    .reconciler
                    .reconcile(report, &order.session_id, fee_rates)
                    .await;
                log_discarded(&outcome);
            }
            TradingMode::Live => {
                let private = self
                    .private_session
                    .as_ref()
                    .ok_or_else(|| CoreError::Validation("live trading requires a private session".into()))?;
                private.send_cancel(order.exchange_id.as_ref(), order_id).await?;
            }
        }
        Ok(())
    }

    /// Cancels every non-terminal order this facade's store knows about
    /// (§6 `cancel_all_managed`). Best-effort: one order's failure is
    /// logged and does not stop the rest.
    pub async fn cancel_all_managed(&self) -> Result<(), CoreError> {
        let orders = self
            .store
            .get_all()
            .await
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        for order in orders.into_iter().filter(|o| !o.is_terminal()) {
            if let Err(e) = self.cancel_order(&order.internal_id).await {
                error!(order_id = %order.internal_id, error = %e, "cancel_all_managed: cancel failed");
            }
        }
        Ok(())
    }
}

fn cancel_report(order: &Order) -> ExecutionReportRaw {
    ExecutionReportRaw {
        exec_type: ExecType::Canceled,
        exchange_order_id: order.exchange_id.clone(),
        client_order_id: Some(order.internal_id.clone()),
        symbol: Some(order.symbol.clone()),
        side: Some(order.side),
        cumulative_qty: Some(order.filled_size),
        last_fill_qty: None,
        last_fill_price: None,
        fee: FeeReportField::None,
        timestamp: Utc::now(),
        trade_id: None,
        execution_id: None,
        liquidity_indicator: None,
    }
}

fn log_discarded(outcome: &ReconcileOutcome) {
    if let ReconcileOutcome::Discarded { reason } = outcome {
        warn!(reason, "reconciler discarded a locally-generated report");
    }
}

/// Recycles the public session's connection whenever the assembler has
/// gone quiet on every subscribed symbol past its stale threshold (§4.6:
/// "the entire connection is recycled"). Runs for the lifetime of the
/// facade; checking interval matches the session liveness watchdog's tick.
fn spawn_stale_book_watchdog<P: VenueProtocol + 'static>(
    session: Arc<SessionMachine<P>>,
    assembler: Arc<Mutex<OrderBookAssembler>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            if assembler.lock().await.is_stale(std::time::Instant::now()) {
                session.force_reconnect("order book data stale past threshold").await;
            }
        }
    })
}

/// Drains one session's decoded-frame stream for the lifetime of the
/// facade, translating `InboundMessage`s into `AdapterEvent`s via the
/// Order-Book Assembler and Execution Reconciler.
#[allow(clippy::too_many_arguments)]
fn spawn_session_event_loop_with_rx<P: VenueProtocol + 'static>(
    session: Arc<SessionMachine<P>>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    assembler: Arc<Mutex<OrderBookAssembler>>,
    reconciler: Arc<ExecutionReconciler>,
    protocol: Arc<P>,
    fee_cache: Arc<Mutex<FeeCache>>,
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::Connected => {
                    let _ = events_tx.send(AdapterEvent::Connected { session_id: session.id.clone() });
                }
                SessionEvent::Disconnected { reason } => {
                    if session.kind == SessionKind::Public {
                        assembler.lock().await.drop_all();
                    }
                    let _ = events_tx.send(AdapterEvent::Disconnected {
                        session_id: session.id.clone(),
                        reason,
                    });
                }
                SessionEvent::Error(e) => {
                    let _ = events_tx.send(AdapterEvent::Error(e));
                }
                SessionEvent::Inbound(message) => {
                    handle_inbound(
                        message,
                        &session,
                        &assembler,
                        &reconciler,
                        protocol.as_ref(),
                        &fee_cache,
                        &events_tx,
                    )
                    .await;
                }
            }
        }
    })
}

async fn handle_inbound<P: VenueProtocol + 'static>(
    message: InboundMessage,
    session: &Arc<SessionMachine<P>>,
    assembler: &Arc<Mutex<OrderBookAssembler>>,
    reconciler: &Arc<ExecutionReconciler>,
    protocol: &P,
    fee_cache: &Arc<Mutex<FeeCache>>,
    events_tx: &mpsc::UnboundedSender<AdapterEvent>,
) {
    match message {
        InboundMessage::Snapshot { channel, symbol, bids, asks, timestamp, sequence } => {
            let update = assembler
                .lock()
                .await
                .apply_snapshot(symbol, bids, asks, timestamp, sequence);
            let _ = channel;
            let _ = events_tx.send(AdapterEvent::OrderBookUpdate(update));
        }
        InboundMessage::Delta { channel, symbol, levels, timestamp, sequence } => {
            let deltas: Vec<orderbook_assembler::DeltaLevel> = levels
                .into_iter()
                .map(|l| orderbook_assembler::DeltaLevel { side: l.side, price: l.price, size: l.size })
                .collect();
            let mut guard = assembler.lock().await;
            match guard.apply_delta(&symbol, &deltas, timestamp, sequence) {
                Ok(update) => {
                    drop(guard);
                    let _ = events_tx.send(AdapterEvent::OrderBookUpdate(update));
                }
                Err(_resync_required) => {
                    guard.drop_symbol(&symbol);
                    drop(guard);
                    warn!(symbol = %symbol, channel, "order book resync required, resubscribing");
                    if let Err(e) = session.subscribe(&channel, Some(symbol)).await {
                        error!(error = %e, "resync resubscribe failed");
                    }
                }
            }
        }
        InboundMessage::Trade(trade) => {
            let _ = events_tx.send(AdapterEvent::Trade(trade));
        }
        InboundMessage::Ticker(ticker) => {
            let _ = events_tx.send(AdapterEvent::Ticker(ticker));
        }
        InboundMessage::Execution(report) => {
            let symbol = report.symbol.clone().unwrap_or_else(|| Symbol::new(""));
            let fee_rates = fee_cache.lock().await.get_or_refresh(protocol, &symbol, false);
            let outcome = reconciler.reconcile(report, &session.id, fee_rates).await;
            emit_from_outcome(outcome, events_tx);
        }
        InboundMessage::BalancesSnapshot(balances) => {
            let _ = events_tx.send(AdapterEvent::BalancesUpdated(balances));
        }
        InboundMessage::SubscriptionAck { .. }
        | InboundMessage::RequestResponse { .. }
        | InboundMessage::RequestError { .. }
        | InboundMessage::Ping { .. }
        | InboundMessage::Heartbeat
        | InboundMessage::Unrecognized => {
            // Handled inside SessionMachine itself before an Inbound event
            // is ever emitted for market-data/execution consumers.
        }
    }
}

fn emit_from_outcome(outcome: ReconcileOutcome, events_tx: &mpsc::UnboundedSender<AdapterEvent>) {
    match outcome {
        ReconcileOutcome::Filled { order, fill } => {
            let _ = events_tx.send(AdapterEvent::OrderFilled { order, fill });
        }
        ReconcileOutcome::PartiallyFilled { order, cumulative_filled_size, average_price, .. } => {
            let _ = events_tx.send(AdapterEvent::OrderPartiallyFilled {
                order,
                cumulative_filled_size,
                average_price,
            });
        }
        ReconcileOutcome::StatusChanged(order) => {
            let event = if order.status == OrderStatus::Cancelled {
                AdapterEvent::OrderCancelled(order)
            } else {
                AdapterEvent::OrderUpdate(order)
            };
            let _ = events_tx.send(event);
        }
        ReconcileOutcome::Unreconciled(update) => {
            let _ = events_tx.send(AdapterEvent::UnreconciledExchangeUpdate(update));
        }
        ReconcileOutcome::Discarded { reason } => {
            warn!(reason, "reconciler discarded an inbound execution report");
        }
    }
}
