//! Order domain model and its lifecycle machine (§3, §4.7).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{ExchangeOrderId, OrderId, SessionId};
use super::symbol::Symbol;

/// OrderSide indicates the direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// OrderType indicates limit or market execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// OrderStatus is the public lifecycle state (§4.7).
///
/// `PENDING_CANCEL` from §4.7 is deliberately not a variant here: it is an
/// internal bookkeeping substate of the reconciler/facade (see
/// [`crate::reconciler::PendingCancelTracker`]), not a state the strategy
/// needs to distinguish from `OPEN`/`PARTIALLY_FILLED` — §4.7 itself calls
/// it an "internal substate" for that reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Terminal states never transition further (§3, §4.7).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }

    /// Whether `self -> next` is legal under the §4.7 machine:
    /// `PENDING -> OPEN -> (PARTIALLY_FILLED -> FILLED | CANCELLED | EXPIRED | REJECTED)`.
    /// A terminal state never transitions; `FILLED` never transitions back.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Open)
                | (Pending, PartiallyFilled)
                | (Pending, Filled)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Pending, Rejected)
                | (Open, PartiallyFilled)
                | (Open, Filled)
                | (Open, Cancelled)
                | (Open, Expired)
                | (Open, Rejected)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
                | (PartiallyFilled, Expired)
        )
    }
}

/// Opaque tag describing what an order is for; the core never interprets it.
pub type Purpose = String;

/// Order represents a trading order tracked by this core, independent of venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Our primary identifier; doubles as the wire `client_order_id`.
    pub internal_id: OrderId,
    /// Assigned by the venue once accepted; absent during the pending window.
    pub exchange_id: Option<ExchangeOrderId>,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Required for limit orders; ignored (but still carried) for market orders.
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub ttl_ms: u64,
    pub expires_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub parent_order_id: Option<OrderId>,
    pub purpose: Option<Purpose>,
    /// Opaque to the core; round-tripped for the strategy's own bookkeeping.
    pub pricing_metadata: Option<serde_json::Value>,
}

/// Error returned when an order mutation would violate a §3/§4.7 invariant.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderInvariantError {
    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("fill size {fill_size} would exceed remaining size {remaining}")]
    OverFill {
        fill_size: Decimal,
        remaining: Decimal,
    },
}

impl Order {
    /// Applies a fill of `size`, updating `filled_size`/`remaining_size` and
    /// transitioning status. Never lets `filled_size + remaining_size != size`
    /// (§3 invariant) — an over-fill is rejected rather than silently clamped,
    /// since a clamp would hide a reconciliation bug upstream.
    pub fn apply_fill(&mut self, size: Decimal) -> Result<(), OrderInvariantError> {
        if size > self.remaining_size {
            return Err(OrderInvariantError::OverFill {
                fill_size: size,
                remaining: self.remaining_size,
            });
        }
        self.filled_size += size;
        self.remaining_size -= size;
        let next = if self.remaining_size.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition(next)
    }

    /// Transitions `status`, rejecting moves that violate the §4.7 machine.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderInvariantError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderInvariantError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
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
            session_id: SessionId::new("s1"),
            parent_order_id: None,
            purpose: None,
            pricing_metadata: None,
        }
    }

    #[test]
    fn partial_fill_transitions_to_partially_filled() {
        let mut order = sample_order();
        order.transition(OrderStatus::Open).unwrap();
        order.apply_fill(dec!(0.4)).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_size, dec!(0.4));
        assert_eq!(order.remaining_size, dec!(0.6));
        assert_eq!(order.filled_size + order.remaining_size, order.size);
    }

    #[test]
    fn full_fill_transitions_to_filled_and_is_terminal() {
        let mut order = sample_order();
        order.transition(OrderStatus::Open).unwrap();
        order.apply_fill(dec!(1)).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.is_terminal());
    }

    #[test]
    fn overfill_is_rejected() {
        let mut order = sample_order();
        order.transition(OrderStatus::Open).unwrap();
        let err = order.apply_fill(dec!(2)).unwrap_err();
        assert_eq!(
            err,
            OrderInvariantError::OverFill {
                fill_size: dec!(2),
                remaining: dec!(1)
            }
        );
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.filled_size, dec!(0));
    }

    #[test]
    fn filled_never_transitions_back() {
        let mut order = sample_order();
        order.transition(OrderStatus::Open).unwrap();
        order.apply_fill(dec!(1)).unwrap();
        let err = order.transition(OrderStatus::Open).unwrap_err();
        assert!(matches!(err, OrderInvariantError::IllegalTransition { .. }));
    }

    #[test]
    fn cancelled_is_terminal_and_rejects_fill() {
        let mut order = sample_order();
        order.transition(OrderStatus::Open).unwrap();
        order.transition(OrderStatus::Cancelled).unwrap();
        assert!(order.transition(OrderStatus::Filled).is_err());
    }
}
