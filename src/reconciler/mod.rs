//! Execution Reconciler — turns raw venue execution reports into order
//! state transitions and fill events (§4.8).
//!
//! §4.8's four order-lookup strategies, in the order they're tried:
//! 1. direct `client_order_id` on the report (session cache, then store)
//! 2. `exchange_order_id` resolved through the store's id mapping
//! 3. a store scan for an order with matching `exchange_id` + `session_id`
//! 4. a scan of the in-session pending-orders cache by `exchange_id`
//!
//! If none resolve, the report becomes an `UnreconciledExchangeUpdate`
//! rather than being dropped (§4.8, §3).

#[cfg(test)]
mod scenarios;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{
    Fee, FeeRates, Fill, FillId, LiquidityIndicator, Order, OrderId, OrderStatus, SessionId,
    Symbol, UnreconciledExchangeUpdate, UnreconciledKind,
};
use crate::store::OrderStore;
use crate::venue_protocol::{ExecType, ExecutionReportRaw, FeeReportField};

/// Bound on the fill dedup window (§4.8: "a fill is identified by
/// `(order_id, timestamp)`; the reconciler keeps a bounded set of
/// recently-seen keys, oldest dropped first").
const FILL_DEDUP_CAPACITY: usize = 1000;

/// Tracks orders with an outstanding cancel request in flight.
///
/// `PENDING_CANCEL` is deliberately not an [`OrderStatus`] variant — §4.7
/// calls it "an internal substate" the strategy never needs to see. This is
/// that substate's home: the reconciler consults it to decide whether a
/// terminal `Cancelled` report was expected or venue-initiated.
#[derive(Default)]
pub struct PendingCancelTracker {
    pending: Mutex<HashSet<OrderId>>,
}

impl PendingCancelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark(&self, order_id: OrderId) {
        self.pending.lock().await.insert(order_id);
    }

    pub async fn clear(&self, order_id: &OrderId) {
        self.pending.lock().await.remove(order_id);
    }

    pub async fn is_pending(&self, order_id: &OrderId) -> bool {
        self.pending.lock().await.contains(order_id)
    }
}

/// Outcome of reconciling one execution report against local order state.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Order transitioned to `Filled` on this report.
    Filled { order: Order, fill: Fill },
    /// Order transitioned to `PartiallyFilled` (or stayed there) on this report.
    PartiallyFilled {
        order: Order,
        fill: Fill,
        cumulative_filled_size: Decimal,
        average_price: Decimal,
    },
    /// A non-fill status transition (new/open/cancelled/expired/rejected).
    StatusChanged(Order),
    /// No locally-tracked order could be resolved for this report (§4.8, §3).
    Unreconciled(UnreconciledExchangeUpdate),
    /// The report was dropped: duplicate fill, over-fill, illegal transition,
    /// or a shape the core cannot safely apply.
    Discarded { reason: String },
}

/// Reconciles raw execution reports against order state (§4.8).
///
/// Holds the in-session pending-orders cache (lookup strategy 4) and the
/// fill dedup window alongside a handle to the durable [`OrderStore`] (§4.12),
/// which backs lookup strategies 1-3 and receives every applied mutation.
pub struct ExecutionReconciler {
    store: Arc<dyn OrderStore>,
    pending_orders: Mutex<std::collections::HashMap<OrderId, Order>>,
    fill_dedup: Mutex<VecDeque<(OrderId, DateTime<Utc>)>>,
    cancel_tracker: PendingCancelTracker,
}

impl ExecutionReconciler {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            pending_orders: Mutex::new(std::collections::HashMap::new()),
            fill_dedup: Mutex::new(VecDeque::new()),
            cancel_tracker: PendingCancelTracker::new(),
        }
    }

    pub fn cancel_tracker(&self) -> &PendingCancelTracker {
        &self.cancel_tracker
    }

    /// Registers an order created this session, before any execution report
    /// for it has arrived — the source for lookup strategy 4, and what lets
    /// an execution report that races ahead of the create-order response
    /// still resolve (§8 "fill-before-ack race").
    pub async fn track_pending(&self, order: Order) {
        self.pending_orders.lock().await.insert(order.internal_id.clone(), order);
    }

    /// Reconciles one raw report. `fee_rates` backs strategy (d) fee
    /// reconstruction when the venue didn't report a fee (§4.8, §4.11).
    pub async fn reconcile(
        &self,
        report: ExecutionReportRaw,
        session_id: &SessionId,
        fee_rates: FeeRates,
    ) -> ReconcileOutcome {
        let Some(order) = self.lookup_order(&report, session_id).await else {
            return ReconcileOutcome::Unreconciled(self.build_unreconciled(&report, session_id));
        };

        if report.exec_type.is_fill() {
            self.apply_fill(order, report, session_id, fee_rates).await
        } else {
            self.apply_status(order, report).await
        }
    }

    async fn lookup_order(&self, report: &ExecutionReportRaw, session_id: &SessionId) -> Option<Order> {
        if let Some(client_order_id) = &report.client_order_id {
            if let Some(order) = self.pending_orders.lock().await.get(client_order_id).cloned() {
                return Some(order);
            }
            if let Ok(Some(order)) = self.store.get_by_id(client_order_id).await {
                return Some(order);
            }
        }

        let exchange_id = report.exchange_order_id.as_ref()?;

        if let Ok(Some(client_order_id)) = self.store.get_client_order_id_by_exchange(exchange_id).await {
            if let Ok(Some(order)) = self.store.get_by_id(&client_order_id).await {
                return Some(order);
            }
        }

        if let Ok(all) = self.store.get_all().await {
            if let Some(order) = all
                .into_iter()
                .find(|o| o.exchange_id.as_ref() == Some(exchange_id) && &o.session_id == session_id)
            {
                return Some(order);
            }
        }

        self.pending_orders
            .lock()
            .await
            .values()
            .find(|o| o.exchange_id.as_ref() == Some(exchange_id))
            .cloned()
    }

    async fn apply_fill(
        &self,
        mut order: Order,
        report: ExecutionReportRaw,
        session_id: &SessionId,
        fee_rates: FeeRates,
    ) -> ReconcileOutcome {
        let Some(fill_qty) = report.last_fill_qty.filter(|q| !q.is_zero()) else {
            return ReconcileOutcome::Discarded {
                reason: "fill report carried no non-zero fill quantity".into(),
            };
        };

        let dedup_key = (order.internal_id.clone(), report.timestamp);
        if self.is_duplicate_fill(&dedup_key).await {
            debug!(order_id = %order.internal_id, timestamp = %report.timestamp, "duplicate fill dropped");
            return ReconcileOutcome::Discarded {
                reason: "duplicate fill (order_id, timestamp) already seen".into(),
            };
        }

        if let Err(e) = order.apply_fill(fill_qty) {
            warn!(order_id = %order.internal_id, error = %e, "fill rejected by order invariant");
            return ReconcileOutcome::Discarded { reason: e.to_string() };
        }
        self.record_fill_key(dedup_key).await;

        if order.exchange_id.is_none() {
            order.exchange_id = report.exchange_order_id.clone();
        }
        // Side recovery (§4.8): a missing side on the report never corrupts
        // the already-known order; it just falls back to what we have.
        let side = report.side.unwrap_or(order.side);

        self.persist(&order).await;

        let price = report
            .last_fill_price
            .filter(|p| !p.is_zero())
            .or(order.price)
            .unwrap_or_default();
        let cost = price * fill_qty;
        let liquidity = report.liquidity_indicator.unwrap_or(LiquidityIndicator::Unknown);
        let fee = build_fee(&report.fee, cost, fee_rates, &order.symbol, liquidity);

        let fill = Fill {
            fill_id: FillId::generate(),
            internal_order_id: order.internal_id.clone(),
            exchange_order_id: order
                .exchange_id
                .clone()
                .unwrap_or_else(|| crate::domain::ExchangeOrderId::new("")),
            symbol: order.symbol.clone(),
            side,
            price,
            size: fill_qty,
            cost,
            fee,
            timestamp: report.timestamp,
            liquidity_indicator: liquidity,
            session_id: session_id.clone(),
            trade_id: report.trade_id.clone(),
            execution_id: report.execution_id.clone(),
        };

        if order.is_terminal() {
            self.pending_orders.lock().await.remove(&order.internal_id);
            ReconcileOutcome::Filled { order, fill }
        } else {
            let cumulative_filled_size = report.cumulative_qty.unwrap_or(order.filled_size);
            self.pending_orders
                .lock()
                .await
                .insert(order.internal_id.clone(), order.clone());
            ReconcileOutcome::PartiallyFilled {
                order,
                fill,
                cumulative_filled_size,
                average_price: price,
            }
        }
    }

    async fn apply_status(&self, mut order: Order, report: ExecutionReportRaw) -> ReconcileOutcome {
        let Some(next_status) = map_exec_type_to_status(report.exec_type) else {
            return ReconcileOutcome::Discarded {
                reason: format!("no status mapping for {:?}", report.exec_type),
            };
        };

        if !order.status.can_transition_to(next_status) {
            return ReconcileOutcome::Discarded {
                reason: format!("illegal transition {:?} -> {:?}", order.status, next_status),
            };
        }

        // Field preservation (§4.8): never let a zero/absent reported size
        // overwrite a previously known non-zero size.
        if let Some(exchange_id) = &report.exchange_order_id {
            if order.exchange_id.is_none() {
                order.exchange_id = Some(exchange_id.clone());
            }
        }

        if order.transition(next_status).is_err() {
            return ReconcileOutcome::Discarded {
                reason: "status transition rejected by order invariant".into(),
            };
        }

        if next_status == OrderStatus::Cancelled {
            self.cancel_tracker.clear(&order.internal_id).await;
        }

        self.persist(&order).await;

        if order.is_terminal() {
            self.pending_orders.lock().await.remove(&order.internal_id);
        } else {
            self.pending_orders
                .lock()
                .await
                .insert(order.internal_id.clone(), order.clone());
        }

        ReconcileOutcome::StatusChanged(order)
    }

    async fn persist(&self, order: &Order) {
        if let Err(e) = self.store.update(order).await {
            warn!(order_id = %order.internal_id, error = %e, "failed to persist reconciled order");
        }
    }

    async fn is_duplicate_fill(&self, key: &(OrderId, DateTime<Utc>)) -> bool {
        self.fill_dedup.lock().await.contains(key)
    }

    async fn record_fill_key(&self, key: (OrderId, DateTime<Utc>)) {
        let mut dedup = self.fill_dedup.lock().await;
        dedup.push_back(key);
        if dedup.len() > FILL_DEDUP_CAPACITY {
            dedup.pop_front();
        }
    }

    fn build_unreconciled(
        &self,
        report: &ExecutionReportRaw,
        session_id: &SessionId,
    ) -> UnreconciledExchangeUpdate {
        UnreconciledExchangeUpdate {
            kind: if report.exec_type.is_fill() {
                UnreconciledKind::Fill
            } else {
                UnreconciledKind::Order
            },
            exchange_order_id: report.exchange_order_id.as_ref().map(|id| id.to_string()),
            client_order_id: report.client_order_id.as_ref().map(|id| id.to_string()),
            session_id: session_id.clone(),
            raw: serde_json::json!({
                "exec_type": format!("{:?}", report.exec_type),
                "cumulative_qty": report.cumulative_qty,
                "last_fill_qty": report.last_fill_qty,
                "last_fill_price": report.last_fill_price,
                "timestamp": report.timestamp.to_rfc3339(),
            }),
        }
    }
}

fn map_exec_type_to_status(exec_type: ExecType) -> Option<OrderStatus> {
    match exec_type {
        ExecType::New | ExecType::PendingNew | ExecType::Replaced => Some(OrderStatus::Open),
        ExecType::Canceled => Some(OrderStatus::Cancelled),
        ExecType::Expired => Some(OrderStatus::Expired),
        ExecType::Rejected => Some(OrderStatus::Rejected),
        ExecType::Trade | ExecType::Filled => None,
    }
}

/// The four fee-reporting strategies (§4.8): explicit, USD-equivalent,
/// first-of-array, and (absent all three) reconstruction from `cost *
/// fee_rate` with the liquidity-appropriate rate, flagged `reconstructed`.
fn build_fee(
    field: &FeeReportField,
    cost: Decimal,
    fee_rates: FeeRates,
    symbol: &Symbol,
    liquidity: LiquidityIndicator,
) -> Fee {
    match field {
        FeeReportField::Explicit { amount, currency, rate } => Fee {
            amount: *amount,
            currency: currency.clone(),
            rate: *rate,
            reconstructed: false,
        },
        FeeReportField::UsdEquivalent(amount) => Fee {
            amount: *amount,
            currency: "USD".to_string(),
            rate: safe_div(*amount, cost),
            reconstructed: false,
        },
        FeeReportField::FirstOfArray { amount, currency } => Fee {
            amount: *amount,
            currency: currency.clone(),
            rate: safe_div(*amount, cost),
            reconstructed: false,
        },
        FeeReportField::None => {
            let rate = match liquidity {
                LiquidityIndicator::Maker => fee_rates.maker,
                LiquidityIndicator::Taker | LiquidityIndicator::Unknown => fee_rates.taker,
            };
            let currency = symbol
                .parts()
                .map(|(_, quote)| quote.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            Fee {
                amount: cost * rate,
                currency,
                rate,
                reconstructed: true,
            }
        }
    }
}

fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}
