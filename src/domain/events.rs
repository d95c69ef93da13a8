//! Events emitted by the Adapter Facade to the strategy (§6).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::balance::Balance;
use super::fill::Fill;
use super::ids::SessionId;
use super::order::{Order, OrderSide};
use super::orderbook::PriceLevel;
use super::symbol::Symbol;
use crate::error::CoreError;

/// Emitted after each applied delta or snapshot (§4.6 "Emission policy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    pub symbol: Symbol,
    pub bids_top_n: Vec<PriceLevel>,
    pub asks_top_n: Vec<PriceLevel>,
    pub timestamp: i64,
    pub sequence: u64,
    /// Set when top bid ≥ top ask (§3: flagged, never silently dropped).
    pub crossed: bool,
}

/// A single executed trade on a public feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: Symbol,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Option<OrderSide>,
    pub timestamp: DateTime<Utc>,
    pub trade_id: Option<String>,
}

/// Best bid/ask + last-trade snapshot from a venue ticker channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// What kind of venue report an `UnreconciledExchangeUpdate` wraps (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnreconciledKind {
    Fill,
    Order,
}

/// An execution report that could not be linked to a locally-tracked order
/// in the current session (§4.8). Never silently dropped — always surfaced
/// for out-of-band handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreconciledExchangeUpdate {
    pub kind: UnreconciledKind,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub session_id: SessionId,
    pub raw: serde_json::Value,
}

/// The exchange-agnostic event surface the strategy consumes (§6).
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Connected {
        session_id: SessionId,
    },
    Disconnected {
        session_id: SessionId,
        reason: String,
    },
    OrderBookUpdate(OrderBookUpdate),
    Trade(Trade),
    Ticker(Ticker),
    OrderUpdate(Order),
    OrderFilled {
        order: Order,
        fill: Fill,
    },
    OrderCancelled(Order),
    OrderPartiallyFilled {
        order: Order,
        cumulative_filled_size: Decimal,
        average_price: Decimal,
    },
    BalancesUpdated(HashMap<String, Balance>),
    UnreconciledExchangeUpdate(UnreconciledExchangeUpdate),
    Error(CoreError),
}
