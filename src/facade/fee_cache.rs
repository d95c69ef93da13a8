//! Per-adapter fee rate cache (§4.10 `fee_refresh_interval_ms`, §4.11, §9).
//!
//! §9: "Global mutable caches (fee cache, symbol maps) are moved into
//! per-adapter owned state; no process-wide state exists." This is that
//! cache — one instance lives inside `AdapterFacade`, scoped to its own
//! `symbol -> FeeRates` table, refreshed from `VenueProtocol::fee_rules`
//! no more often than `fee_refresh_interval_ms` unless `force_refresh` is
//! requested.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::{FeeRates, Symbol};
use crate::venue_protocol::VenueProtocol;

struct Entry {
    rates: FeeRates,
    fetched_at: Instant,
}

/// Owned by one `AdapterFacade`; never shared across adapters.
pub struct FeeCache {
    entries: HashMap<Symbol, Entry>,
    refresh_interval: Duration,
}

impl FeeCache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            refresh_interval,
        }
    }

    /// Returns the cached rates for `symbol`, refreshing from the venue's
    /// `fee_rules` when the entry is missing, stale past the configured
    /// interval, or `force_refresh` is set.
    pub fn get_or_refresh<P: VenueProtocol + ?Sized>(
        &mut self,
        protocol: &P,
        symbol: &Symbol,
        force_refresh: bool,
    ) -> FeeRates {
        let now = Instant::now();
        let needs_refresh = force_refresh
            || match self.entries.get(symbol) {
                Some(entry) => now.duration_since(entry.fetched_at) >= self.refresh_interval,
                None => true,
            };

        if needs_refresh {
            let rates = protocol.fee_rules(symbol);
            self.entries.insert(
                symbol.clone(),
                Entry {
                    rates,
                    fetched_at: now,
                },
            );
            rates
        } else {
            self.entries
                .get(symbol)
                .map(|entry| entry.rates)
                .expect("checked above: entry present when refresh not needed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct FixedProtocolRates {
        calls: std::cell::Cell<u32>,
    }

    impl crate::venue_protocol::SymbolRules for FixedProtocolRates {
        fn to_venue(&self, canonical: &Symbol) -> String {
            canonical.as_str().to_string()
        }
        fn from_venue(&self, venue_symbol: &str) -> Symbol {
            Symbol::new(venue_symbol)
        }
    }

    impl VenueProtocol for FixedProtocolRates {
        fn encode_subscribe(&self, _: &str, _: Option<&Symbol>, _: &crate::domain::RequestId) -> String {
            String::new()
        }
        fn encode_unsubscribe(&self, _: &str, _: Option<&Symbol>, _: &crate::domain::RequestId) -> String {
            String::new()
        }
        fn encode_order(&self, _: &crate::venue_protocol::CreateOrderRequest, _: &crate::domain::RequestId) -> String {
            String::new()
        }
        fn encode_cancel(
            &self,
            _: Option<&crate::domain::ExchangeOrderId>,
            _: &crate::domain::OrderId,
            _: &crate::domain::RequestId,
        ) -> String {
            String::new()
        }
        fn encode_pong(&self, _: Option<&crate::domain::RequestId>) -> String {
            String::new()
        }
        fn encode_logon(&self, _: &str, _: &str, _: &crate::domain::RequestId) -> String {
            String::new()
        }
        fn decode_frame(&self, _: &str) -> crate::venue_protocol::InboundMessage {
            crate::venue_protocol::InboundMessage::Unrecognized
        }
        fn symbol_rules(&self) -> &dyn crate::venue_protocol::SymbolRules {
            self
        }
        fn fee_rules(&self, _symbol: &Symbol) -> FeeRates {
            self.calls.set(self.calls.get() + 1);
            FeeRates::new(dec!(0.0016), dec!(0.0026))
        }
    }

    #[test]
    fn refreshes_once_until_interval_elapses() {
        let protocol = FixedProtocolRates { calls: std::cell::Cell::new(0) };
        let mut cache = FeeCache::new(Duration::from_secs(3600));
        let symbol = Symbol::new("BTC/USD");

        let first = cache.get_or_refresh(&protocol, &symbol, false);
        let second = cache.get_or_refresh(&protocol, &symbol, false);

        assert_eq!(first, second);
        assert_eq!(protocol.calls.get(), 1, "second call within the interval must not refetch");
    }

    #[test]
    fn force_refresh_always_refetches() {
        let protocol = FixedProtocolRates { calls: std::cell::Cell::new(0) };
        let mut cache = FeeCache::new(Duration::from_secs(3600));
        let symbol = Symbol::new("BTC/USD");

        cache.get_or_refresh(&protocol, &symbol, false);
        cache.get_or_refresh(&protocol, &symbol, true);

        assert_eq!(protocol.calls.get(), 2);
    }
}
