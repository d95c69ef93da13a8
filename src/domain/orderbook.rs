//! Canonical order book data structures (§3, §4.6).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::symbol::Symbol;

/// A single (price, size) level on one side of a book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Which side of the book a ladder represents. Asks sort ascending by
/// price (best ask first); bids sort descending (best bid first) — §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// Sorted price→size ladder for one side of one symbol's book.
///
/// Backed by a `BTreeMap` so insertion keeps natural price order for free;
/// `Side` only controls which end callers read as "top of book". A level
/// with size ≤ 0 is never retained (§3 invariant) — `set_level` removes it
/// rather than storing a zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSide {
    levels: BTreeMap<Decimal, Decimal>,
    side: Option<Side>,
}

impl OrderBookSide {
    pub fn new(side: Side) -> Self {
        Self {
            levels: BTreeMap::new(),
            side: Some(side),
        }
    }

    fn side(&self) -> Side {
        self.side.expect("OrderBookSide constructed without Side::new")
    }

    /// Inserts or replaces a level; a size ≤ 0 removes the level (§3, §4.6).
    pub fn set_level(&mut self, price: Decimal, size: Decimal) {
        if size <= Decimal::ZERO {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, size);
        }
    }

    pub fn replace_all(&mut self, levels: impl IntoIterator<Item = PriceLevel>) {
        self.levels.clear();
        for level in levels {
            self.set_level(level.price, level.size);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Best price on this side: highest for bids, lowest for asks.
    pub fn top(&self) -> Option<PriceLevel> {
        match self.side() {
            Side::Bid => self.levels.iter().next_back(),
            Side::Ask => self.levels.iter().next(),
        }
        .map(|(&price, &size)| PriceLevel { price, size })
    }

    /// The top `n` levels, best-first.
    pub fn top_n(&self, n: usize) -> Vec<PriceLevel> {
        let iter = self
            .levels
            .iter()
            .map(|(&price, &size)| PriceLevel { price, size });
        match self.side() {
            Side::Bid => iter.rev().take(n).collect(),
            Side::Ask => iter.take(n).collect(),
        }
    }

    /// Asserts levels are in sorted order (always true for a `BTreeMap`
    /// traversed consistently — kept as a callable invariant check per §4.6
    /// "after applying, assert sorted order" so callers/tests can assert it
    /// explicitly rather than trusting the data structure implicitly).
    pub fn is_sorted(&self) -> bool {
        let prices: Vec<Decimal> = self.levels.keys().copied().collect();
        prices.windows(2).all(|w| w[0] < w[1])
    }
}

/// OrderBook maintains the canonical bid/ask ladder for one symbol (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: Symbol,
    pub bids: OrderBookSide,
    pub asks: OrderBookSide,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    /// Monotonic counter, scoped to this symbol's stream.
    pub sequence: u64,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: OrderBookSide::new(Side::Bid),
            asks: OrderBookSide::new(Side::Ask),
            timestamp: 0,
            sequence: 0,
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.top()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.top()
    }

    /// True if both sides are nonempty and best bid ≥ best ask — a crossed
    /// book. §3: "crossed books are flagged but not silently dropped", so
    /// callers check this rather than the assembler refusing the update.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_size_removes_level() {
        let mut side = OrderBookSide::new(Side::Bid);
        side.set_level(dec!(100), dec!(1));
        assert_eq!(side.len(), 1);
        side.set_level(dec!(100), dec!(0));
        assert!(side.is_empty());
    }

    #[test]
    fn bids_sorted_descending_asks_ascending() {
        let mut bids = OrderBookSide::new(Side::Bid);
        bids.set_level(dec!(99), dec!(2));
        bids.set_level(dec!(100), dec!(1));
        assert_eq!(bids.top().unwrap().price, dec!(100));

        let mut asks = OrderBookSide::new(Side::Ask);
        asks.set_level(dec!(102), dec!(2));
        asks.set_level(dec!(101), dec!(1));
        assert_eq!(asks.top().unwrap().price, dec!(101));
    }

    #[test]
    fn crossed_book_is_detected() {
        let mut book = OrderBook::new(Symbol::new("BTC/USD"));
        book.bids.set_level(dec!(101), dec!(1));
        book.asks.set_level(dec!(100), dec!(1));
        assert!(book.is_crossed());
    }

    #[test]
    fn non_crossed_book_top_ask_greater_than_top_bid() {
        let mut book = OrderBook::new(Symbol::new("BTC/USD"));
        book.bids.set_level(dec!(99), dec!(1));
        book.asks.set_level(dec!(101), dec!(1));
        assert!(!book.is_crossed());
        assert!(book.best_ask().unwrap().price > book.best_bid().unwrap().price);
    }
}
