//! Normalizer / `VenueProtocol` capability set (§4.9, §9).
//!
//! §9: "Venue-specific behavior is encapsulated behind a `VenueProtocol`
//! capability set {encode_subscribe, encode_order, decode_frame,
//! symbol_rules, fee_rules}; a new venue is a new implementation of this
//! capability set, not new branches in shared code." This module defines
//! that capability set plus the closed set of tagged `InboundMessage`
//! variants every implementation decodes into — the "dynamic payload
//! polymorphism in the source becomes a closed set of tagged variants"
//! design note.
//!
//! Two concrete implementations ship here: [`json_venue::JsonVenueProtocol`]
//! (`method`/`params`/`req_id` request-response + `channel`/`type`/`data`
//! feeds) and [`fix_venue::FixVenueProtocol`] (FIX 5.0SP2), per §6.

pub mod fix_venue;
pub mod json_venue;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{ExchangeOrderId, FeeRates, OrderId, OrderSide, OrderType, RequestId, Symbol};

/// Symbol aliasing at the Normalizer boundary only (§3, §6).
///
/// §6's table: "BTC/USD" <-> "XBT/USD" and "BTC-USD"; "ETH/USD" unchanged;
/// unknown symbols pass through with a simple delimiter rewrite ("/" <->
/// "-") as a fallback.
pub trait SymbolRules: Send + Sync {
    fn to_venue(&self, canonical: &Symbol) -> String;
    fn from_venue(&self, venue_symbol: &str) -> Symbol;
}

/// Default alias table shared by both shipped protocols — the venue
/// difference in practice is in wire framing, not in this particular
/// mapping, so both `JsonVenueProtocol` and `FixVenueProtocol` reuse it.
pub struct DefaultSymbolRules;

impl SymbolRules for DefaultSymbolRules {
    fn to_venue(&self, canonical: &Symbol) -> String {
        match canonical.as_str() {
            "BTC/USD" => "XBT/USD".to_string(),
            "ETH/USD" => "ETH/USD".to_string(),
            other => other.replace('/', "-"),
        }
    }

    fn from_venue(&self, venue_symbol: &str) -> Symbol {
        match venue_symbol {
            "XBT/USD" | "BTC-USD" => Symbol::new("BTC/USD"),
            "ETH/USD" => Symbol::new("ETH/USD"),
            other if other.contains('-') => Symbol::new(other.replace('-', "/")),
            other => Symbol::new(other),
        }
    }
}

/// One `(side, price, size)` tuple from a venue delta frame (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct WireDeltaLevel {
    pub side: crate::domain::Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// A request to create an order, already validated by the facade (§4.7, §6).
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub client_order_id: OrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub size: Decimal,
    /// Present only when the venue supports GTD time-in-force (§4.7).
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Explicit TTL override in seconds (§6 `ttl_s?`); when absent, §4.7's
    /// per-side default applies.
    pub ttl_s: Option<u64>,
    pub parent_order_id: Option<OrderId>,
    pub purpose: Option<crate::domain::Purpose>,
    /// Opaque to the core; round-tripped for the strategy's own bookkeeping (§3, §6).
    pub pricing_metadata: Option<serde_json::Value>,
}

/// `ExecType` as a closed set (§4.8, §9), rather than a venue-specific string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecType {
    New,
    PendingNew,
    Replaced,
    Trade,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl ExecType {
    /// §4.8 classification: which reports are fills vs status updates.
    pub fn is_fill(self) -> bool {
        matches!(self, ExecType::Trade | ExecType::Filled)
    }

    pub fn is_terminal_status(self) -> bool {
        matches!(self, ExecType::Canceled | ExecType::Expired | ExecType::Rejected)
    }
}

/// Raw fields carried by a venue execution report (§4.8), before
/// reconciliation. `side` is `Option` because some venues omit it on
/// cancel/expire reports (§4.8 "side recovery").
#[derive(Debug, Clone)]
pub struct ExecutionReportRaw {
    pub exec_type: ExecType,
    pub exchange_order_id: Option<ExchangeOrderId>,
    pub client_order_id: Option<OrderId>,
    pub symbol: Option<Symbol>,
    pub side: Option<OrderSide>,
    pub cumulative_qty: Option<Decimal>,
    pub last_fill_qty: Option<Decimal>,
    pub last_fill_price: Option<Decimal>,
    pub fee: FeeReportField,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub trade_id: Option<String>,
    pub execution_id: Option<String>,
    pub liquidity_indicator: Option<crate::domain::LiquidityIndicator>,
}

/// The four fee-reporting shapes a venue might send (§4.8 strategies a-c;
/// strategy (d), reconstruction, has no wire representation — it is
/// synthesized by the reconciler when this is `None`).
#[derive(Debug, Clone)]
pub enum FeeReportField {
    /// Strategy (a): explicit `{amount, currency, rate}`.
    Explicit {
        amount: Decimal,
        currency: String,
        rate: Decimal,
    },
    /// Strategy (b): USD-equivalent amount only.
    UsdEquivalent(Decimal),
    /// Strategy (c): first entry of a fees array `[(amount, currency)]`.
    FirstOfArray { amount: Decimal, currency: String },
    None,
}

/// The closed set of decoded inbound frames (§9 "WireMessage"), replacing
/// dynamic payload dispatch with tagged variants every `SessionMachine`
/// handles uniformly regardless of venue.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Snapshot {
        channel: String,
        symbol: Symbol,
        bids: Vec<crate::domain::PriceLevel>,
        asks: Vec<crate::domain::PriceLevel>,
        timestamp: i64,
        sequence: u64,
    },
    Delta {
        channel: String,
        symbol: Symbol,
        levels: Vec<WireDeltaLevel>,
        timestamp: i64,
        sequence: Option<u64>,
    },
    Trade(crate::domain::Trade),
    Ticker(crate::domain::Ticker),
    SubscriptionAck {
        channel: String,
        symbol: Option<Symbol>,
    },
    RequestResponse {
        request_id: RequestId,
        payload: serde_json::Value,
    },
    RequestError {
        request_id: Option<RequestId>,
        message: String,
    },
    Execution(ExecutionReportRaw),
    BalancesSnapshot(std::collections::HashMap<String, crate::domain::Balance>),
    Heartbeat,
    Ping {
        request_id: Option<RequestId>,
    },
    /// A frame that parsed but matched no known shape — the Normalizer is
    /// total on its input domain (§4.9): malformed/unrecognized input never
    /// panics, it becomes this variant plus a logged warning upstream.
    Unrecognized,
}

/// Capability set a venue implementation must provide (§4.9, §9). Both the
/// public (market-data) and private (authenticated) specializations of
/// `SessionMachine<P>` share this one trait; venue differences live only
/// here, never as branches inside `SessionMachine` itself.
pub trait VenueProtocol: Send + Sync {
    fn encode_subscribe(&self, channel: &str, symbol: Option<&Symbol>, request_id: &RequestId) -> String;
    fn encode_unsubscribe(&self, channel: &str, symbol: Option<&Symbol>, request_id: &RequestId) -> String;
    fn encode_order(&self, request: &CreateOrderRequest, request_id: &RequestId) -> String;
    fn encode_cancel(
        &self,
        exchange_id: Option<&ExchangeOrderId>,
        client_order_id: &OrderId,
        request_id: &RequestId,
    ) -> String;
    fn encode_pong(&self, request_id: Option<&RequestId>) -> String;
    /// Encodes the authenticated logon/handshake frame, given a fresh token.
    fn encode_logon(&self, api_key: &str, token: &str, request_id: &RequestId) -> String;
    fn decode_frame(&self, raw: &str) -> InboundMessage;
    fn symbol_rules(&self) -> &dyn SymbolRules;
    fn fee_rules(&self, symbol: &Symbol) -> FeeRates;
}
