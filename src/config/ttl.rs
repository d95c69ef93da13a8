//! Per-side order TTL defaults and overrides (§4.7).

use serde::Deserialize;

/// Default time-to-live for an order when the caller gives no explicit
/// `ttl_s`: buy orders default to 16s, sell orders to 900s (§4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct TtlOverrides {
    #[serde(default = "default_buy_ttl_ms")]
    pub buy_ms: u64,
    #[serde(default = "default_sell_ttl_ms")]
    pub sell_ms: u64,
}

fn default_buy_ttl_ms() -> u64 {
    16_000
}

fn default_sell_ttl_ms() -> u64 {
    900_000
}

impl Default for TtlOverrides {
    fn default() -> Self {
        Self {
            buy_ms: default_buy_ttl_ms(),
            sell_ms: default_sell_ttl_ms(),
        }
    }
}

impl TtlOverrides {
    pub fn for_side(&self, side: crate::domain::OrderSide) -> u64 {
        match side {
            crate::domain::OrderSide::Buy => self.buy_ms,
            crate::domain::OrderSide::Sell => self.sell_ms,
        }
    }
}
