//! Fill domain model (§3, §4.8 fee handling).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{ExchangeOrderId, FillId, OrderId, SessionId};
use super::order::OrderSide;
use super::symbol::Symbol;

/// Maker/taker tag on a fill, determining which fee rate applies (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityIndicator {
    Maker,
    Taker,
    Unknown,
}

/// Trading fee charged on a fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub amount: Decimal,
    pub currency: String,
    pub rate: Decimal,
    /// True when `amount`/`rate` were not reported by the venue and had to
    /// be reconstructed from `cost * fee_rate` (§4.8 strategy (d)).
    pub reconstructed: bool,
}

/// Fill represents one execution against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: FillId,
    pub internal_order_id: OrderId,
    pub exchange_order_id: ExchangeOrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub cost: Decimal,
    pub fee: Fee,
    pub timestamp: DateTime<Utc>,
    pub liquidity_indicator: LiquidityIndicator,
    pub session_id: SessionId,
    pub trade_id: Option<String>,
    pub execution_id: Option<String>,
}

impl Fill {
    /// The dedup key from §4.8: "a fill is identified by (order_id, timestamp)".
    pub fn dedup_key(&self) -> (OrderId, DateTime<Utc>) {
        (self.internal_order_id.clone(), self.timestamp)
    }
}
