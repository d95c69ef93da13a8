//! Canonical trading-pair symbol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A trading pair in canonical "BASE/QUOTE" form (e.g. "BTC/USD").
///
/// Venue-specific aliases ("XBT/USD", "BTC-USD") are accepted only at the
/// Normalizer boundary (§3); everywhere else in the core this is the only
/// representation in play.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Constructs a canonical symbol. Does not validate venue aliasing —
    /// callers that have a venue-specific string must go through the
    /// Normalizer's `symbol_rules` first.
    pub fn new(canonical: impl Into<String>) -> Self {
        Self(canonical.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits "BASE/QUOTE" into its two legs, if the symbol is well-formed.
    pub fn parts(&self) -> Option<(&str, &str)> {
        self.0.split_once('/')
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}
