//! Order-Book Assembler — maintains, per symbol, a sorted bid/ask ladder
//! from snapshots and deltas; emits normalized order-book snapshots (§4.6).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::domain::{OrderBook, OrderBookUpdate, PriceLevel, Side, Symbol};

/// Depth emitted in each `OrderBookUpdate` (§4.6, overridable per assembler).
pub const DEFAULT_DEPTH: usize = 10;
/// No message for any subscribed symbol in this long → session recycled (§4.6).
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(30);

/// One `(side, price, size)` tuple from a venue delta frame (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct DeltaLevel {
    pub side: Side,
    pub price: rust_decimal::Decimal,
    pub size: rust_decimal::Decimal,
}

/// Outcome of applying a delta, telling the caller whether a resync is due.
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The delta's sequence was not immediately after the last applied one;
    /// the caller must unsubscribe/resubscribe or await a fresh snapshot.
    ResyncRequired,
}

struct BookEntry {
    book: OrderBook,
    last_message_at: Instant,
}

/// Maintains canonical ladders for every subscribed symbol on one session.
pub struct OrderBookAssembler {
    books: HashMap<Symbol, BookEntry>,
    depth: usize,
    stale_threshold: Duration,
}

impl Default for OrderBookAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

impl OrderBookAssembler {
    pub fn new(depth: usize) -> Self {
        Self {
            books: HashMap::new(),
            depth,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Replaces the symbol's entire ladder, records the sequence, and
    /// returns the emitted snapshot update (§4.6).
    pub fn apply_snapshot(
        &mut self,
        symbol: Symbol,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp: i64,
        sequence: u64,
    ) -> OrderBookUpdate {
        let mut book = OrderBook::new(symbol.clone());
        book.bids.replace_all(bids);
        book.asks.replace_all(asks);
        book.timestamp = timestamp;
        book.sequence = sequence;

        let update = self.emit(&book);
        self.books.insert(
            symbol,
            BookEntry {
                book,
                last_message_at: Instant::now(),
            },
        );
        update
    }

    /// Applies one delta frame's levels to the symbol's ladder. Each level
    /// with size zero removes that level; otherwise insert-or-replace
    /// (§4.6). Sequence integrity: if `sequence` is provided, it must be
    /// exactly the last applied sequence + 1 or a resync is required; if
    /// `sequence` is `None`, an internal monotonic counter is used instead.
    pub fn apply_delta(
        &mut self,
        symbol: &Symbol,
        levels: &[DeltaLevel],
        timestamp: i64,
        sequence: Option<u64>,
    ) -> Result<OrderBookUpdate, ApplyOutcome> {
        let entry = self
            .books
            .get_mut(symbol)
            .ok_or(ApplyOutcome::ResyncRequired)?;

        let next_sequence = match sequence {
            Some(seq) => {
                if seq != entry.book.sequence + 1 {
                    return Err(ApplyOutcome::ResyncRequired);
                }
                seq
            }
            None => entry.book.sequence + 1,
        };

        for level in levels {
            match level.side {
                Side::Bid => entry.book.bids.set_level(level.price, level.size),
                Side::Ask => entry.book.asks.set_level(level.price, level.size),
            }
        }

        debug_assert!(entry.book.bids.is_sorted());
        debug_assert!(entry.book.asks.is_sorted());

        entry.book.timestamp = timestamp;
        entry.book.sequence = next_sequence;
        entry.last_message_at = Instant::now();

        Ok(self.emit(&entry.book))
    }

    fn emit(&self, book: &OrderBook) -> OrderBookUpdate {
        let crossed = book.is_crossed();
        if crossed {
            warn!(symbol = %book.symbol, "crossed book detected");
        }
        OrderBookUpdate {
            symbol: book.symbol.clone(),
            bids_top_n: book.bids.top_n(self.depth),
            asks_top_n: book.asks.top_n(self.depth),
            timestamp: book.timestamp,
            sequence: book.sequence,
            crossed,
        }
    }

    /// Drops a symbol's ladder — called on disconnect unless resynchronized
    /// (§3 "destroyed on disconnect unless resynchronized").
    pub fn drop_symbol(&mut self, symbol: &Symbol) {
        self.books.remove(symbol);
    }

    pub fn drop_all(&mut self) {
        self.books.clear();
    }

    /// True if any tracked symbol has gone silent longer than the stale
    /// threshold (§4.6 stale-data watchdog).
    pub fn is_stale(&self, now: Instant) -> bool {
        self.books
            .values()
            .any(|entry| now.duration_since(entry.last_message_at) > self.stale_threshold)
    }

    pub fn book(&self, symbol: &Symbol) -> Option<&OrderBook> {
        self.books.get(symbol).map(|entry| &entry.book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn snapshot_then_deltas_matches_scenario_one() {
        let mut assembler = OrderBookAssembler::new(10);
        let symbol = Symbol::new("BTC/USD");

        assembler.apply_snapshot(
            symbol.clone(),
            vec![
                PriceLevel { price: dec!(100), size: dec!(1) },
                PriceLevel { price: dec!(99), size: dec!(2) },
            ],
            vec![
                PriceLevel { price: dec!(101), size: dec!(1) },
                PriceLevel { price: dec!(102), size: dec!(2) },
            ],
            1_000,
            0,
        );

        assembler
            .apply_delta(
                &symbol,
                &[DeltaLevel { side: Side::Bid, price: dec!(100), size: dec!(0) }],
                1_001,
                Some(1),
            )
            .unwrap();

        let update = assembler
            .apply_delta(
                &symbol,
                &[DeltaLevel { side: Side::Bid, price: dec!(99.5), size: dec!(3) }],
                1_002,
                Some(2),
            )
            .unwrap();

        assert_eq!(
            update.bids_top_n,
            vec![
                PriceLevel { price: dec!(99.5), size: dec!(3) },
                PriceLevel { price: dec!(99), size: dec!(2) },
            ]
        );
        assert_eq!(
            update.asks_top_n,
            vec![
                PriceLevel { price: dec!(101), size: dec!(1) },
                PriceLevel { price: dec!(102), size: dec!(2) },
            ]
        );
        assert_eq!(update.sequence, 2);
    }

    #[test]
    fn out_of_order_sequence_requires_resync() {
        let mut assembler = OrderBookAssembler::new(10);
        let symbol = Symbol::new("BTC/USD");
        assembler.apply_snapshot(symbol.clone(), vec![], vec![], 0, 5);

        let result = assembler.apply_delta(
            &symbol,
            &[DeltaLevel { side: Side::Bid, price: dec!(100), size: dec!(1) }],
            1,
            Some(7),
        );
        assert_eq!(result.unwrap_err(), ApplyOutcome::ResyncRequired);
    }

    #[test]
    fn crossed_book_is_flagged_not_dropped() {
        let mut assembler = OrderBookAssembler::new(10);
        let symbol = Symbol::new("BTC/USD");
        let update = assembler.apply_snapshot(
            symbol,
            vec![PriceLevel { price: dec!(101), size: dec!(1) }],
            vec![PriceLevel { price: dec!(100), size: dec!(1) }],
            0,
            0,
        );
        assert!(update.crossed);
    }

    #[test]
    fn missing_sequence_falls_back_to_internal_monotonic_counter() {
        let mut assembler = OrderBookAssembler::new(10);
        let symbol = Symbol::new("BTC/USD");
        assembler.apply_snapshot(symbol.clone(), vec![], vec![], 0, 0);
        let first = assembler
            .apply_delta(
                &symbol,
                &[DeltaLevel { side: Side::Ask, price: dec!(100), size: dec!(1) }],
                1,
                None,
            )
            .unwrap();
        assert_eq!(first.sequence, 1);
        let second = assembler
            .apply_delta(
                &symbol,
                &[DeltaLevel { side: Side::Ask, price: dec!(101), size: dec!(1) }],
                2,
                None,
            )
            .unwrap();
        assert_eq!(second.sequence, 2);
    }
}
