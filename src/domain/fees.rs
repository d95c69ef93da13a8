//! Per-symbol fee rate data model (§3, §4.9 `fee_rules`, §4.11).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maker/taker fee rates for one symbol on one venue.
///
/// Expressed as a decimal fraction (e.g. `0.001` for 0.1%), exactly as the
/// teacher's arbitrage-bot fee type did; this is the same shape, just
/// sourced from `VenueProtocol::fee_rules` instead of a static config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRates {
    pub maker: Decimal,
    pub taker: Decimal,
}

impl FeeRates {
    pub fn new(maker: Decimal, taker: Decimal) -> Self {
        Self { maker, taker }
    }
}
