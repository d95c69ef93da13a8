//! Paper Fill Simulator (§4.10, §9 Open Question (c)).
//!
//! §1 lists "the paper-trading fill simulator" as an external collaborator
//! specified only by its interface; §9 notes the source had two competing
//! implementations and the design externalizes the responsibility entirely.
//! `PaperFillSimulator` is that interface. `SimplePaperFillSimulator` is the
//! one reference implementation this crate ships — an instant full fill at
//! the requested (or, for market orders, a nominal) price — so `paper` mode
//! works out of the box; anything closer to a real matching engine is the
//! caller's responsibility to supply.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{ExchangeOrderId, LiquidityIndicator};
use crate::venue_protocol::{CreateOrderRequest, ExecType, ExecutionReportRaw, FeeReportField};

/// Simulates venue fills for orders created in `TradingMode::Paper` (§4.10).
/// The facade never opens a private session in paper mode; every
/// `create_order`/`cancel_order` call is routed through this trait instead.
#[async_trait]
pub trait PaperFillSimulator: Send + Sync {
    /// Produces the execution report the reconciler would have received
    /// from a real venue for this order.
    async fn simulate_fill(&self, request: &CreateOrderRequest) -> ExecutionReportRaw;
}

/// Instant full fill at the order's limit price, or at a nominal price of
/// `1` for market orders (paper mode has no live book to price against).
pub struct SimplePaperFillSimulator;

#[async_trait]
impl PaperFillSimulator for SimplePaperFillSimulator {
    async fn simulate_fill(&self, request: &CreateOrderRequest) -> ExecutionReportRaw {
        let price = request.price.unwrap_or(Decimal::ONE);
        ExecutionReportRaw {
            exec_type: ExecType::Trade,
            exchange_order_id: Some(ExchangeOrderId::new(uuid::Uuid::new_v4().to_string())),
            client_order_id: Some(request.client_order_id.clone()),
            symbol: Some(request.symbol.clone()),
            side: Some(request.side),
            cumulative_qty: Some(request.size),
            last_fill_qty: Some(request.size),
            last_fill_price: Some(price),
            fee: FeeReportField::None,
            timestamp: chrono::Utc::now(),
            trade_id: Some(uuid::Uuid::new_v4().to_string()),
            execution_id: Some(uuid::Uuid::new_v4().to_string()),
            liquidity_indicator: Some(LiquidityIndicator::Taker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderSide, OrderType, Symbol};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn fills_full_size_at_limit_price() {
        let simulator = SimplePaperFillSimulator;
        let request = CreateOrderRequest {
            client_order_id: OrderId::generate(),
            symbol: Symbol::new("BTC/USD"),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(30_000)),
            size: dec!(0.01),
            expires_at: None,
            ttl_s: None,
            parent_order_id: None,
            purpose: None,
            pricing_metadata: None,
        };

        let report = simulator.simulate_fill(&request).await;

        assert_eq!(report.last_fill_qty, Some(dec!(0.01)));
        assert_eq!(report.last_fill_price, Some(dec!(30_000)));
        assert!(report.exec_type.is_fill());
    }
}
