//! Concrete end-to-end reconciler scenarios.

use rust_decimal_macros::dec;

use super::*;
use crate::domain::{ExchangeOrderId, OrderSide, OrderType};
use crate::store::InMemoryOrderStore;

fn fresh_order(session_id: &SessionId) -> Order {
    let now = Utc::now();
    Order {
        internal_id: OrderId::generate(),
        exchange_id: None,
        symbol: Symbol::new("BTC/USD"),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        price: Some(dec!(30000)),
        size: dec!(1),
        filled_size: dec!(0),
        remaining_size: dec!(1),
        status: OrderStatus::Pending,
        created_at: now,
        last_updated: now,
        ttl_ms: 16_000,
        expires_at: now,
        session_id: session_id.clone(),
        parent_order_id: None,
        purpose: None,
        pricing_metadata: None,
    }
}

fn fill_report(client_order_id: Option<OrderId>, exchange_order_id: Option<ExchangeOrderId>) -> ExecutionReportRaw {
    ExecutionReportRaw {
        exec_type: ExecType::Filled,
        exchange_order_id,
        client_order_id,
        symbol: Some(Symbol::new("BTC/USD")),
        side: Some(OrderSide::Buy),
        cumulative_qty: Some(dec!(1)),
        last_fill_qty: Some(dec!(1)),
        last_fill_price: Some(dec!(30010)),
        fee: FeeReportField::None,
        timestamp: Utc::now(),
        trade_id: Some("T-1".into()),
        execution_id: Some("E-1".into()),
        liquidity_indicator: Some(LiquidityIndicator::Taker),
    }
}

fn fee_rates() -> FeeRates {
    FeeRates::new(dec!(0.001), dec!(0.002))
}

/// §8 scenario: order creation acknowledged, then an immediate fill arrives
/// for the same client_order_id, resolved by lookup strategy 1.
#[tokio::test]
async fn order_creation_then_immediate_fill_resolves_by_client_order_id() {
    let store = Arc::new(InMemoryOrderStore::new());
    let reconciler = ExecutionReconciler::new(store.clone());
    let session_id = SessionId::new("s1");

    let mut order = fresh_order(&session_id);
    order.transition(OrderStatus::Open).unwrap();
    order.exchange_id = Some(ExchangeOrderId::new("EX-100"));
    store.add(&order).await.unwrap();
    reconciler.track_pending(order.clone()).await;

    let report = fill_report(Some(order.internal_id.clone()), Some(ExchangeOrderId::new("EX-100")));
    let outcome = reconciler.reconcile(report, &session_id, fee_rates()).await;

    match outcome {
        ReconcileOutcome::Filled { order: filled, fill } => {
            assert_eq!(filled.status, OrderStatus::Filled);
            assert_eq!(fill.size, dec!(1));
            assert!(fill.fee.reconstructed, "no fee reported, must reconstruct from cost * rate");
        }
        other => panic!("expected Filled, got {other:?}"),
    }

    let persisted = store.get_by_id(&order.internal_id).await.unwrap().unwrap();
    assert_eq!(persisted.status, OrderStatus::Filled);
}

/// §8 scenario: a fill report for a brand-new order arrives before the
/// create-order response does, so the order exists only in the in-session
/// pending cache (not yet in the durable store) and is resolved via
/// exchange_id against that cache — lookup strategy 4.
#[tokio::test]
async fn fill_before_ack_race_resolves_via_pending_cache() {
    let store = Arc::new(InMemoryOrderStore::new());
    let reconciler = ExecutionReconciler::new(store.clone());
    let session_id = SessionId::new("s1");

    let mut order = fresh_order(&session_id);
    order.transition(OrderStatus::Open).unwrap();
    order.exchange_id = Some(ExchangeOrderId::new("EX-200"));
    // Deliberately not yet written to the store — only tracked in-session,
    // simulating the creation response racing behind the exchange's own
    // execution report.
    reconciler.track_pending(order.clone()).await;

    let report = fill_report(None, Some(ExchangeOrderId::new("EX-200")));
    let outcome = reconciler.reconcile(report, &session_id, fee_rates()).await;

    match outcome {
        ReconcileOutcome::Filled { order: filled, .. } => {
            assert_eq!(filled.internal_id, order.internal_id);
        }
        other => panic!("expected Filled via pending-cache lookup, got {other:?}"),
    }
}

/// §8 scenario: an execution report names an exchange_order_id this session
/// never created or persisted — it must surface as unreconciled, never be
/// silently dropped.
#[tokio::test]
async fn execution_report_with_unknown_order_becomes_unreconciled() {
    let store = Arc::new(InMemoryOrderStore::new());
    let reconciler = ExecutionReconciler::new(store);
    let session_id = SessionId::new("s1");

    let report = fill_report(None, Some(ExchangeOrderId::new("EX-UNKNOWN")));
    let outcome = reconciler.reconcile(report, &session_id, fee_rates()).await;

    match outcome {
        ReconcileOutcome::Unreconciled(update) => {
            assert_eq!(update.kind, UnreconciledKind::Fill);
            assert_eq!(update.exchange_order_id.as_deref(), Some("EX-UNKNOWN"));
        }
        other => panic!("expected Unreconciled, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_fill_with_same_order_and_timestamp_is_discarded() {
    let store = Arc::new(InMemoryOrderStore::new());
    let reconciler = ExecutionReconciler::new(store.clone());
    let session_id = SessionId::new("s1");

    let mut order = fresh_order(&session_id);
    order.transition(OrderStatus::Open).unwrap();
    store.add(&order).await.unwrap();
    reconciler.track_pending(order.clone()).await;

    let mut report = fill_report(Some(order.internal_id.clone()), None);
    report.last_fill_qty = Some(dec!(0.5));
    let fixed_timestamp = report.timestamp;

    let first = reconciler.reconcile(report.clone(), &session_id, fee_rates()).await;
    assert!(matches!(first, ReconcileOutcome::PartiallyFilled { .. }));

    let mut replay = report;
    replay.timestamp = fixed_timestamp;
    let second = reconciler.reconcile(replay, &session_id, fee_rates()).await;
    assert!(matches!(second, ReconcileOutcome::Discarded { .. }));
}

#[tokio::test]
async fn cancel_report_clears_pending_cancel_tracker() {
    let store = Arc::new(InMemoryOrderStore::new());
    let reconciler = ExecutionReconciler::new(store.clone());
    let session_id = SessionId::new("s1");

    let mut order = fresh_order(&session_id);
    order.transition(OrderStatus::Open).unwrap();
    store.add(&order).await.unwrap();
    reconciler.track_pending(order.clone()).await;
    reconciler.cancel_tracker().mark(order.internal_id.clone()).await;
    assert!(reconciler.cancel_tracker().is_pending(&order.internal_id).await);

    let report = ExecutionReportRaw {
        exec_type: ExecType::Canceled,
        exchange_order_id: None,
        client_order_id: Some(order.internal_id.clone()),
        symbol: Some(Symbol::new("BTC/USD")),
        side: None,
        cumulative_qty: None,
        last_fill_qty: None,
        last_fill_price: None,
        fee: FeeReportField::None,
        timestamp: Utc::now(),
        trade_id: None,
        execution_id: None,
        liquidity_indicator: None,
    };

    let outcome = reconciler.reconcile(report, &session_id, fee_rates()).await;
    match outcome {
        ReconcileOutcome::StatusChanged(updated) => assert_eq!(updated.status, OrderStatus::Cancelled),
        other => panic!("expected StatusChanged, got {other:?}"),
    }
    assert!(!reconciler.cancel_tracker().is_pending(&order.internal_id).await);
}
