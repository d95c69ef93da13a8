//! Balance domain model (§3).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-asset balance snapshot.
///
/// Invariant: `available + reserved == total`. Venues sometimes report
/// these inconsistently (rounding, in-flight holds); §3 says to tolerate
/// that within a small epsilon, log, and trust the venue's `total` rather
/// than rederive it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub available: Decimal,
    pub reserved: Decimal,
}

/// How far `available + reserved` may drift from `total` before it's
/// logged as a venue inconsistency rather than silently accepted.
const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 8); // 0.00000001

impl Balance {
    pub fn new(total: Decimal, available: Decimal, reserved: Decimal, asset: &str) -> Self {
        let balance = Self {
            total,
            available,
            reserved,
        };
        balance.check_consistency(asset);
        balance
    }

    fn check_consistency(&self, asset: &str) {
        let drift = (self.available + self.reserved - self.total).abs();
        if drift > TOLERANCE {
            warn!(
                asset,
                total = %self.total,
                available = %self.available,
                reserved = %self.reserved,
                drift = %drift,
                "balance components do not sum to total; trusting venue-reported total"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn consistent_balance_does_not_panic_or_mutate() {
        let balance = Balance::new(dec!(10), dec!(7), dec!(3), "BTC");
        assert_eq!(balance.total, dec!(10));
    }

    #[test]
    fn inconsistent_balance_is_still_constructed_trusting_total() {
        // available + reserved = 9.9999, total = 10: outside venues sometimes
        // report this; we keep `total` as the trusted value regardless.
        let balance = Balance::new(dec!(10), dec!(7), dec!(2.9999), "ETH");
        assert_eq!(balance.total, dec!(10));
    }
}
