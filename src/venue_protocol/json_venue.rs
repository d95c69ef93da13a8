//! JSON-framed venue protocol (§6): authenticated request/response carries
//! `method`/`params`/`req_id`; asynchronous feeds carry `channel`/`type`/
//! `data`. This is the default `VenueProtocol` most venues in the real
//! fleet speak; `fix_venue` covers the one FIX-based venue (§9).

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{
    Balance, FeeRates, LiquidityIndicator, OrderSide, PriceLevel, RequestId, Side, Symbol, Ticker,
    Trade,
};

use super::{
    CreateOrderRequest, DefaultSymbolRules, ExecType, ExecutionReportRaw, FeeReportField,
    InboundMessage, SymbolRules, VenueProtocol, WireDeltaLevel,
};

/// Loosely-typed envelope every inbound frame is first parsed into; which
/// fields are populated determines the `InboundMessage` variant (§4.9: the
/// Normalizer must be total on its input domain, so unparseable/unexpected
/// shapes fall through to `InboundMessage::Unrecognized` rather than
/// erroring).
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    req_id: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    #[serde(rename = "type")]
    msg_type: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BookData {
    symbol: String,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    sequence: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TradeData {
    symbol: String,
    price: String,
    size: String,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    trade_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    symbol: String,
    #[serde(default)]
    best_bid: Option<String>,
    #[serde(default)]
    best_ask: Option<String>,
    #[serde(default)]
    last_price: Option<String>,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ExecutionData {
    exec_type: String,
    #[serde(default)]
    exchange_order_id: Option<String>,
    #[serde(default)]
    client_order_id: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    cumulative_qty: Option<String>,
    #[serde(default)]
    last_fill_qty: Option<String>,
    #[serde(default)]
    last_fill_price: Option<String>,
    #[serde(default)]
    fee_amount: Option<String>,
    #[serde(default)]
    fee_currency: Option<String>,
    #[serde(default)]
    fee_rate: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    trade_id: Option<String>,
    #[serde(default)]
    execution_id: Option<String>,
    #[serde(default)]
    liquidity_indicator: Option<String>,
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s).ok()
}

fn parse_levels(levels: &[[String; 2]]) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter_map(|[p, s]| {
            Some(PriceLevel {
                price: parse_decimal(p)?,
                size: parse_decimal(s)?,
            })
        })
        .collect()
}

fn parse_side(s: &str) -> Option<OrderSide> {
    match s.to_ascii_lowercase().as_str() {
        "buy" | "bid" => Some(OrderSide::Buy),
        "sell" | "ask" => Some(OrderSide::Sell),
        _ => None,
    }
}

fn parse_exec_type(s: &str) -> ExecType {
    match s {
        "new" | "pending_new" => ExecType::New,
        "replaced" => ExecType::Replaced,
        "trade" => ExecType::Trade,
        "filled" => ExecType::Filled,
        "canceled" | "cancelled" => ExecType::Canceled,
        "expired" => ExecType::Expired,
        "rejected" => ExecType::Rejected,
        _ => ExecType::New,
    }
}

/// JSON-framed venue implementation of the `VenueProtocol` capability set.
pub struct JsonVenueProtocol {
    symbol_rules: DefaultSymbolRules,
    default_maker_fee: Decimal,
    default_taker_fee: Decimal,
}

impl JsonVenueProtocol {
    pub fn new(default_maker_fee: Decimal, default_taker_fee: Decimal) -> Self {
        Self {
            symbol_rules: DefaultSymbolRules,
            default_maker_fee,
            default_taker_fee,
        }
    }
}

impl Default for JsonVenueProtocol {
    fn default() -> Self {
        Self::new(Decimal::new(1, 3), Decimal::new(2, 3)) // 0.001 / 0.002
    }
}

#[derive(Serialize)]
struct Outbound<'a> {
    method: &'a str,
    params: Value,
    req_id: String,
}

impl VenueProtocol for JsonVenueProtocol {
    fn encode_subscribe(&self, channel: &str, symbol: Option<&Symbol>, request_id: &RequestId) -> String {
        let params = match symbol {
            Some(sym) => json!({
                "channel": channel,
                "symbol": self.symbol_rules.to_venue(sym),
            }),
            None => json!({ "channel": channel }),
        };
        json!({"method": "subscribe", "params": params, "req_id": request_id.as_str()}).to_string()
    }

    fn encode_unsubscribe(
        &self,
        channel: &str,
        symbol: Option<&Symbol>,
        request_id: &RequestId,
    ) -> String {
        let params = match symbol {
            Some(sym) => json!({
                "channel": channel,
                "symbol": self.symbol_rules.to_venue(sym),
            }),
            None => json!({ "channel": channel }),
        };
        json!({"method": "unsubscribe", "params": params, "req_id": request_id.as_str()}).to_string()
    }

    fn encode_order(&self, request: &CreateOrderRequest, request_id: &RequestId) -> String {
        let mut params = json!({
            "client_order_id": request.client_order_id.as_str(),
            "symbol": self.symbol_rules.to_venue(&request.symbol),
            "side": match request.side { OrderSide::Buy => "buy", OrderSide::Sell => "sell" },
            "order_type": match request.order_type { crate::domain::OrderType::Limit => "limit", crate::domain::OrderType::Market => "market" },
            "size": request.size.to_string(),
        });
        if let Some(price) = request.price {
            params["price"] = json!(price.to_string());
        }
        if let Some(expires_at) = request.expires_at {
            params["expire_time"] = json!(expires_at.timestamp_millis());
        }
        json!({"method": "create_order", "params": params, "req_id": request_id.as_str()}).to_string()
    }

    fn encode_cancel(
        &self,
        exchange_id: Option<&crate::domain::ExchangeOrderId>,
        client_order_id: &crate::domain::OrderId,
        request_id: &RequestId,
    ) -> String {
        let params = match exchange_id {
            Some(id) => json!({"exchange_order_id": id.as_str()}),
            None => json!({"client_order_id": client_order_id.as_str()}),
        };
        json!({"method": "cancel_order", "params": params, "req_id": request_id.as_str()}).to_string()
    }

    fn encode_pong(&self, request_id: Option<&RequestId>) -> String {
        match request_id {
            Some(id) => json!({"method": "pong", "req_id": id.as_str()}).to_string(),
            None => json!({"method": "pong"}).to_string(),
        }
    }

    fn encode_logon(&self, api_key: &str, token: &str, request_id: &RequestId) -> String {
        json!({
            "method": "login",
            "params": {"api_key": api_key, "token": token},
            "req_id": request_id.as_str(),
        })
        .to_string()
    }

    fn decode_frame(&self, raw: &str) -> InboundMessage {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "unparseable frame");
                return InboundMessage::Unrecognized;
            }
        };

        if envelope.event.as_deref() == Some("ping") {
            return InboundMessage::Ping {
                request_id: envelope.req_id.map(RequestId::new),
            };
        }
        if envelope.channel.as_deref() == Some("heartbeat")
            || envelope.msg_type.as_deref() == Some("heartbeat")
        {
            return InboundMessage::Heartbeat;
        }

        if let Some(req_id) = envelope.req_id.clone() {
            if let Some(err) = envelope.error {
                return InboundMessage::RequestError {
                    request_id: Some(RequestId::new(req_id)),
                    message: err.message,
                };
            }
            if let Some(result) = envelope.result {
                return InboundMessage::RequestResponse {
                    request_id: RequestId::new(req_id),
                    payload: result,
                };
            }
        }

        let channel = match &envelope.channel {
            Some(c) => c.clone(),
            None => return InboundMessage::Unrecognized,
        };
        let msg_type = envelope.msg_type.as_deref().unwrap_or_default();
        let data = envelope.data.clone();

        match channel.as_str() {
            "book" => match msg_type {
                "subscribed" => InboundMessage::SubscriptionAck {
                    channel,
                    symbol: envelope.symbol.map(|s| self.symbol_rules.from_venue(&s)),
                },
                "snapshot" | "update" => {
                    let Some(data) = data else {
                        return InboundMessage::Unrecognized;
                    };
                    let Ok(book) = serde_json::from_value::<BookData>(data) else {
                        return InboundMessage::Unrecognized;
                    };
                    let symbol = self.symbol_rules.from_venue(&book.symbol);
                    if msg_type == "snapshot" {
                        InboundMessage::Snapshot {
                            channel,
                            symbol,
                            bids: parse_levels(&book.bids),
                            asks: parse_levels(&book.asks),
                            timestamp: book.timestamp,
                            sequence: book.sequence.unwrap_or(0),
                        }
                    } else {
                        let mut levels = Vec::new();
                        for level in parse_levels(&book.bids) {
                            levels.push(WireDeltaLevel {
                                side: Side::Bid,
                                price: level.price,
                                size: level.size,
                            });
                        }
                        for level in parse_levels(&book.asks) {
                            levels.push(WireDeltaLevel {
                                side: Side::Ask,
                                price: level.price,
                                size: level.size,
                            });
                        }
                        InboundMessage::Delta {
                            channel,
                            symbol,
                            levels,
                            timestamp: book.timestamp,
                            sequence: book.sequence,
                        }
                    }
                }
                _ => InboundMessage::Unrecognized,
            },
            "trades" => {
                if msg_type == "subscribed" {
                    return InboundMessage::SubscriptionAck {
                        channel,
                        symbol: envelope.symbol.map(|s| self.symbol_rules.from_venue(&s)),
                    };
                }
                let Some(data) = data else {
                    return InboundMessage::Unrecognized;
                };
                let Ok(t) = serde_json::from_value::<TradeData>(data) else {
                    return InboundMessage::Unrecognized;
                };
                let (Some(price), Some(size)) = (parse_decimal(&t.price), parse_decimal(&t.size))
                else {
                    return InboundMessage::Unrecognized;
                };
                InboundMessage::Trade(Trade {
                    symbol: self.symbol_rules.from_venue(&t.symbol),
                    price,
                    size,
                    side: t.side.as_deref().and_then(parse_side),
                    timestamp: chrono::DateTime::from_timestamp_millis(t.timestamp)
                        .unwrap_or_else(chrono::Utc::now),
                    trade_id: t.trade_id,
                })
            }
            "ticker" => {
                let Some(data) = data else {
                    return InboundMessage::Unrecognized;
                };
                let Ok(t) = serde_json::from_value::<TickerData>(data) else {
                    return InboundMessage::Unrecognized;
                };
                InboundMessage::Ticker(Ticker {
                    symbol: self.symbol_rules.from_venue(&t.symbol),
                    best_bid: t.best_bid.as_deref().and_then(parse_decimal),
                    best_ask: t.best_ask.as_deref().and_then(parse_decimal),
                    last_price: t.last_price.as_deref().and_then(parse_decimal),
                    timestamp: chrono::DateTime::from_timestamp_millis(t.timestamp)
                        .unwrap_or_else(chrono::Utc::now),
                })
            }
            "executions" => {
                if msg_type == "subscribed" {
                    return InboundMessage::SubscriptionAck { channel, symbol: None };
                }
                let Some(data) = data else {
                    return InboundMessage::Unrecognized;
                };
                let Ok(e) = serde_json::from_value::<ExecutionData>(data) else {
                    return InboundMessage::Unrecognized;
                };
                let fee = if let (Some(amount), Some(currency), Some(rate)) =
                    (&e.fee_amount, &e.fee_currency, &e.fee_rate)
                {
                    match (parse_decimal(amount), parse_decimal(rate)) {
                        (Some(amount), Some(rate)) => FeeReportField::Explicit {
                            amount,
                            currency: currency.clone(),
                            rate,
                        },
                        _ => FeeReportField::None,
                    }
                } else if let (Some(amount), Some(currency)) = (&e.fee_amount, &e.fee_currency) {
                    match parse_decimal(amount) {
                        Some(amount) => FeeReportField::FirstOfArray {
                            amount,
                            currency: currency.clone(),
                        },
                        None => FeeReportField::None,
                    }
                } else {
                    FeeReportField::None
                };
                InboundMessage::Execution(ExecutionReportRaw {
                    exec_type: parse_exec_type(&e.exec_type),
                    exchange_order_id: e.exchange_order_id.map(crate::domain::ExchangeOrderId::new),
                    client_order_id: e.client_order_id.map(crate::domain::OrderId::new),
                    symbol: e.symbol.map(|s| self.symbol_rules.from_venue(&s)),
                    side: e.side.as_deref().and_then(parse_side),
                    cumulative_qty: e.cumulative_qty.as_deref().and_then(parse_decimal),
                    last_fill_qty: e.last_fill_qty.as_deref().and_then(parse_decimal),
                    last_fill_price: e.last_fill_price.as_deref().and_then(parse_decimal),
                    fee,
                    timestamp: chrono::DateTime::from_timestamp_millis(e.timestamp)
                        .unwrap_or_else(chrono::Utc::now),
                    trade_id: e.trade_id,
                    execution_id: e.execution_id,
                    liquidity_indicator: e.liquidity_indicator.as_deref().map(|s| match s {
                        "maker" => LiquidityIndicator::Maker,
                        "taker" => LiquidityIndicator::Taker,
                        _ => LiquidityIndicator::Unknown,
                    }),
                })
            }
            "balances" => {
                let Some(data) = data else {
                    return InboundMessage::Unrecognized;
                };
                let Ok(map) = serde_json::from_value::<
                    std::collections::HashMap<String, (String, String, String)>,
                >(data) else {
                    return InboundMessage::Unrecognized;
                };
                let balances = map
                    .into_iter()
                    .filter_map(|(asset, (total, available, reserved))| {
                        Some((
                            asset.clone(),
                            Balance::new(
                                parse_decimal(&total)?,
                                parse_decimal(&available)?,
                                parse_decimal(&reserved)?,
                                &asset,
                            ),
                        ))
                    })
                    .collect();
                InboundMessage::BalancesSnapshot(balances)
            }
            _ => InboundMessage::Unrecognized,
        }
    }

    fn symbol_rules(&self) -> &dyn SymbolRules {
        &self.symbol_rules
    }

    fn fee_rules(&self, _symbol: &Symbol) -> FeeRates {
        FeeRates::new(self.default_maker_fee, self.default_taker_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_snapshot_with_symbol_aliasing() {
        let protocol = JsonVenueProtocol::default();
        let raw = r#"{"channel":"book","type":"snapshot","data":{"symbol":"XBT/USD","bids":[["100","1"]],"asks":[["101","1"]],"timestamp":1000,"sequence":5}}"#;
        match protocol.decode_frame(raw) {
            InboundMessage::Snapshot { symbol, sequence, .. } => {
                assert_eq!(symbol.as_str(), "BTC/USD");
                assert_eq!(sequence, 5);
            }
            other => panic!("expected Snapshot, got {other:?}"),
        }
    }

    #[test]
    fn decodes_request_response_by_req_id() {
        let protocol = JsonVenueProtocol::default();
        let raw = r#"{"req_id":"42","result":{"exchange_id":"X1"}}"#;
        match protocol.decode_frame(raw) {
            InboundMessage::RequestResponse { request_id, .. } => {
                assert_eq!(request_id.as_str(), "42");
            }
            other => panic!("expected RequestResponse, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_is_unrecognized_not_an_error() {
        let protocol = JsonVenueProtocol::default();
        assert!(matches!(
            protocol.decode_frame("not json at all"),
            InboundMessage::Unrecognized
        ));
    }

    #[test]
    fn encode_order_carries_client_order_id_and_price() {
        let protocol = JsonVenueProtocol::default();
        let request = CreateOrderRequest {
            client_order_id: crate::domain::OrderId::new("abc"),
            symbol: Symbol::new("BTC/USD"),
            side: OrderSide::Buy,
            order_type: crate::domain::OrderType::Limit,
            price: Some(Decimal::new(30000, 0)),
            size: Decimal::new(1, 2),
            expires_at: None,
            ttl_s: None,
            parent_order_id: None,
            purpose: None,
            pricing_metadata: None,
        };
        let frame = protocol.encode_order(&request, &RequestId::new("1"));
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["params"]["client_order_id"], "abc");
        assert_eq!(value["params"]["symbol"], "XBT/USD");
    }
}
