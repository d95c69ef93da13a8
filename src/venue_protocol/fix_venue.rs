//! FIX 5.0SP2 venue protocol (§6, §9): "the source's private and public
//! adapters are near-duplicates of the same session machine specialized on
//! authentication; the design factors out the common machine and keeps
//! venue differences only in the protocol capability" — this is that one
//! more capability, modeled as just another `VenueProtocol`, not a
//! separate session machine.
//!
//! Logon signatures are HMAC-SHA256 over
//! `sending_time ∥ msg_type ∥ msg_seq_num ∥ sender_comp_id ∥ target_comp_id ∥ api_key`
//! (§6), base64-encoded exactly as the teacher's Poloniex REST client signs
//! requests (`exchanges::poloniex::client::Client::sign`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;

use crate::domain::{ExchangeOrderId, FeeRates, LiquidityIndicator, OrderId, OrderSide, OrderType, RequestId, Symbol};

use super::{
    CreateOrderRequest, DefaultSymbolRules, ExecType, ExecutionReportRaw, FeeReportField,
    InboundMessage, SymbolRules, VenueProtocol,
};

const SOH: char = '\u{1}';
const BEGIN_STRING: &str = "FIX.5.0SP2";

/// `OrdStatus` values named in §6: `0,1,2,4,6,8,9,A,C`.
fn classify_ord_status(status: &str) -> ExecType {
    match status {
        "0" => ExecType::New,
        "1" => ExecType::Trade, // PartiallyFilled
        "2" => ExecType::Filled,
        "4" => ExecType::Canceled,
        "6" => ExecType::New, // PendingCancel: a status update, not a fill or terminal
        "8" => ExecType::Rejected,
        "9" => ExecType::New, // Suspended
        "A" => ExecType::PendingNew,
        "C" => ExecType::Expired,
        _ => ExecType::New,
    }
}

fn side_tag(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "1",
        OrderSide::Sell => "2",
    }
}

fn ord_type_tag(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Limit => "2",
        OrderType::Market => "1",
    }
}

fn parse_side(tag: &str) -> Option<OrderSide> {
    match tag {
        "1" => Some(OrderSide::Buy),
        "2" => Some(OrderSide::Sell),
        _ => None,
    }
}

/// Builds a tag=value FIX message body (everything after `BodyLength`,
/// before `CheckSum`), then wraps it with `BeginString`/`BodyLength`/
/// `CheckSum` per the standard envelope.
struct FixBuilder {
    fields: Vec<(u32, String)>,
}

impl FixBuilder {
    fn new(msg_type: &str, sender: &str, target: &str, seq_num: u32) -> Self {
        let mut builder = Self { fields: Vec::new() };
        builder.push(35, msg_type);
        builder.push(49, sender);
        builder.push(56, target);
        builder.push(34, seq_num.to_string());
        builder.push(52, chrono::Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string());
        builder
    }

    fn push(&mut self, tag: u32, value: impl Into<String>) -> &mut Self {
        self.fields.push((tag, value.into()));
        self
    }

    fn build(&self) -> String {
        let body: String = self
            .fields
            .iter()
            .map(|(tag, value)| format!("{tag}={value}{SOH}"))
            .collect();
        let body_with_begin = format!("8={BEGIN_STRING}{SOH}9={}{SOH}{body}", body.len());
        let checksum: u32 = body_with_begin.bytes().map(u32::from).sum::<u32>() % 256;
        format!("{body_with_begin}10={:03}{SOH}", checksum)
    }
}

fn parse_tags(raw: &str) -> HashMap<u32, String> {
    raw.split(SOH)
        .filter_map(|field| {
            let (tag, value) = field.split_once('=')?;
            Some((tag.parse().ok()?, value.to_string()))
        })
        .collect()
}

/// FIX 5.0SP2 implementation of the `VenueProtocol` capability set.
pub struct FixVenueProtocol {
    symbol_rules: DefaultSymbolRules,
    sender_comp_id: String,
    target_comp_id: String,
    seq_num: AtomicU32,
    default_maker_fee: Decimal,
    default_taker_fee: Decimal,
}

impl FixVenueProtocol {
    pub fn new(sender_comp_id: impl Into<String>, target_comp_id: impl Into<String>) -> Self {
        Self {
            symbol_rules: DefaultSymbolRules,
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            seq_num: AtomicU32::new(1),
            default_maker_fee: Decimal::new(1, 3),
            default_taker_fee: Decimal::new(2, 3),
        }
    }

    fn next_seq(&self) -> u32 {
        self.seq_num.fetch_add(1, Ordering::SeqCst)
    }

    /// HMAC-SHA256 logon signature over
    /// `sending_time ∥ msg_type ∥ msg_seq_num ∥ sender_comp_id ∥ target_comp_id ∥ api_key`
    /// (§6), keyed by the session token (analogous to the teacher's
    /// `api_secret`-keyed HMAC in `poloniex::client::Client::sign`).
    fn sign_logon(&self, token: &str, sending_time: &str, seq_num: u32, api_key: &str) -> String {
        let payload = format!(
            "{sending_time}{}{seq_num}{}{}{api_key}",
            "A", self.sender_comp_id, self.target_comp_id
        );
        let mut mac = Hmac::<Sha256>::new_from_slice(token.as_bytes())
            .expect("HMAC can take a key of any size");
        mac.update(payload.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }
}

impl VenueProtocol for FixVenueProtocol {
    fn encode_subscribe(&self, channel: &str, symbol: Option<&Symbol>, request_id: &RequestId) -> String {
        let seq = self.next_seq();
        let mut builder = FixBuilder::new("V", &self.sender_comp_id, &self.target_comp_id, seq);
        builder.push(262, request_id.as_str()); // MDReqID
        builder.push(263, "1"); // SubscriptionRequestType: snapshot + updates
        builder.push(146, "1"); // NoRelatedSym
        if let Some(sym) = symbol {
            builder.push(55, self.symbol_rules.to_venue(sym));
        } else {
            builder.push(55, channel);
        }
        builder.build()
    }

    fn encode_unsubscribe(
        &self,
        channel: &str,
        symbol: Option<&Symbol>,
        request_id: &RequestId,
    ) -> String {
        let seq = self.next_seq();
        let mut builder = FixBuilder::new("V", &self.sender_comp_id, &self.target_comp_id, seq);
        builder.push(262, request_id.as_str());
        builder.push(263, "2"); // disable
        builder.push(146, "1");
        if let Some(sym) = symbol {
            builder.push(55, self.symbol_rules.to_venue(sym));
        } else {
            builder.push(55, channel);
        }
        builder.build()
    }

    fn encode_order(&self, request: &CreateOrderRequest, request_id: &RequestId) -> String {
        let seq = self.next_seq();
        let mut builder = FixBuilder::new("D", &self.sender_comp_id, &self.target_comp_id, seq);
        builder.push(11, request.client_order_id.as_str()); // ClOrdID
        builder.push(1, request_id.as_str()); // Account, reused to tie wire req to our req_id
        builder.push(55, self.symbol_rules.to_venue(&request.symbol)); // Symbol
        builder.push(54, side_tag(request.side)); // Side
        builder.push(38, request.size.to_string()); // OrderQty
        builder.push(40, ord_type_tag(request.order_type)); // OrdType
        if let Some(price) = request.price {
            builder.push(44, price.to_string()); // Price
        }
        if request.expires_at.is_some() {
            builder.push(59, "6"); // TimeInForce: GTD
            if let Some(expiry) = request.expires_at {
                builder.push(126, expiry.format("%Y%m%d-%H:%M:%S%.3f").to_string()); // ExpireTime
            }
        } else {
            builder.push(59, "1"); // TimeInForce: GTC, closed set per §6 (1/3)
        }
        builder.build()
    }

    fn encode_cancel(
        &self,
        exchange_id: Option<&ExchangeOrderId>,
        client_order_id: &OrderId,
        request_id: &RequestId,
    ) -> String {
        let seq = self.next_seq();
        let mut builder = FixBuilder::new("F", &self.sender_comp_id, &self.target_comp_id, seq);
        builder.push(11, format!("{}-cancel", client_order_id.as_str())); // new ClOrdID for the cancel
        builder.push(41, client_order_id.as_str()); // OrigClOrdID
        builder.push(1, request_id.as_str());
        if let Some(id) = exchange_id {
            builder.push(37, id.as_str()); // OrderID
        }
        builder.build()
    }

    fn encode_pong(&self, request_id: Option<&RequestId>) -> String {
        let seq = self.next_seq();
        let mut builder = FixBuilder::new("0", &self.sender_comp_id, &self.target_comp_id, seq);
        if let Some(id) = request_id {
            builder.push(112, id.as_str()); // TestReqID echoed (Open Question (a))
        }
        builder.build()
    }

    fn encode_logon(&self, api_key: &str, token: &str, request_id: &RequestId) -> String {
        let seq = self.next_seq();
        let sending_time = chrono::Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string();
        let signature = self.sign_logon(token, &sending_time, seq, api_key);
        let mut builder = FixBuilder::new("A", &self.sender_comp_id, &self.target_comp_id, seq);
        builder.push(553, api_key); // Username
        builder.push(554, signature); // Password (carries the HMAC signature)
        builder.push(212, request_id.as_str());
        builder.build()
    }

    fn decode_frame(&self, raw: &str) -> InboundMessage {
        let tags = parse_tags(raw);
        let Some(msg_type) = tags.get(&35) else {
            return InboundMessage::Unrecognized;
        };

        match msg_type.as_str() {
            "0" => InboundMessage::Heartbeat,
            "1" => InboundMessage::Ping {
                request_id: tags.get(&112).map(|id| RequestId::new(id.clone())),
            },
            "8" => {
                let Some(ord_status) = tags.get(&39) else {
                    return InboundMessage::Unrecognized;
                };
                let fee = match (tags.get(&9001), tags.get(&9002), tags.get(&9003)) {
                    (Some(amount), Some(currency), Some(rate)) => {
                        match (amount.parse().ok(), rate.parse().ok()) {
                            (Some(amount), Some(rate)) => FeeReportField::Explicit {
                                amount,
                                currency: currency.clone(),
                                rate,
                            },
                            _ => FeeReportField::None,
                        }
                    }
                    _ => FeeReportField::None,
                };
                InboundMessage::Execution(ExecutionReportRaw {
                    exec_type: classify_ord_status(ord_status),
                    exchange_order_id: tags.get(&37).map(|s| ExchangeOrderId::new(s.clone())),
                    client_order_id: tags.get(&11).map(|s| OrderId::new(s.clone())),
                    symbol: tags.get(&55).map(|s| self.symbol_rules.from_venue(s)),
                    side: tags.get(&54).and_then(|s| parse_side(s)),
                    cumulative_qty: tags.get(&14).and_then(|s| s.parse().ok()),
                    last_fill_qty: tags.get(&32).and_then(|s| s.parse().ok()),
                    last_fill_price: tags.get(&31).and_then(|s| s.parse().ok()),
                    fee,
                    timestamp: tags
                        .get(&60)
                        .and_then(|s| {
                            chrono::NaiveDateTime::parse_from_str(s, "%Y%m%d-%H:%M:%S%.3f").ok()
                        })
                        .map(|naive| naive.and_utc())
                        .unwrap_or_else(chrono::Utc::now),
                    trade_id: tags.get(&17).cloned(),
                    execution_id: tags.get(&17).cloned(),
                    liquidity_indicator: tags.get(&851).map(|s| match s.as_str() {
                        "1" => LiquidityIndicator::Maker,
                        "2" => LiquidityIndicator::Taker,
                        _ => LiquidityIndicator::Unknown,
                    }),
                })
            }
            "3" => InboundMessage::RequestError {
                request_id: tags.get(&45).map(|s| RequestId::new(s.clone())),
                message: tags.get(&58).cloned().unwrap_or_default(),
            },
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

    fn protocol() -> FixVenueProtocol {
        FixVenueProtocol::new("US", "VENUE")
    }

    #[test]
    fn encode_order_round_trips_through_tag_parsing() {
        let protocol = protocol();
        let request = CreateOrderRequest {
            client_order_id: OrderId::new("abc"),
            symbol: Symbol::new("BTC/USD"),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: Some(Decimal::new(30000, 0)),
            size: Decimal::new(1, 2),
            expires_at: None,
            ttl_s: None,
            parent_order_id: None,
            purpose: None,
            pricing_metadata: None,
        };
        let frame = protocol.encode_order(&request, &RequestId::new("r1"));
        let tags = parse_tags(&frame);
        assert_eq!(tags.get(&11).unwrap(), "abc");
        assert_eq!(tags.get(&55).unwrap(), "XBT/USD");
        assert_eq!(tags.get(&54).unwrap(), "1");
    }

    #[test]
    fn decodes_execution_report_with_ord_status_mapping() {
        let protocol = protocol();
        let mut builder = FixBuilder::new("8", "VENUE", "US", 1);
        builder.push(37, "EX1");
        builder.push(11, "abc");
        builder.push(55, "XBT/USD");
        builder.push(39, "2"); // Filled
        builder.push(14, "1.0");
        builder.push(32, "1.0");
        builder.push(31, "30000");
        let frame = builder.build();

        match protocol.decode_frame(&frame) {
            InboundMessage::Execution(report) => {
                assert_eq!(report.exec_type, ExecType::Filled);
                assert_eq!(report.symbol.unwrap().as_str(), "BTC/USD");
            }
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[test]
    fn test_request_decodes_as_ping_with_echoed_id() {
        let protocol = protocol();
        let mut builder = FixBuilder::new("1", "VENUE", "US", 2);
        builder.push(112, "req-9");
        let frame = builder.build();
        match protocol.decode_frame(&frame) {
            InboundMessage::Ping { request_id } => {
                assert_eq!(request_id.unwrap().as_str(), "req-9");
            }
            other => panic!("expected Ping, got {other:?}"),
        }
    }
}
