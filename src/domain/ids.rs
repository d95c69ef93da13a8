//! Newtype identifiers for the two id spaces this system juggles.
//!
//! The teacher's domain types used a bare `String` for `Order::id`; this
//! system has both an internally-originated id and a venue-originated one
//! (§3, §4.7 `internal_id` vs `exchange_id`), and mixing them up at a call
//! site is a real bug class worth a type-level guard against.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(OrderId);
string_id!(ExchangeOrderId);
string_id!(SessionId);
string_id!(RequestId);
string_id!(FillId);

impl OrderId {
    /// Generates a fresh internal id. This is also the wire `client_order_id`
    /// (§3: "client_order_id (alias of internal_id for wire use)").
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl FillId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
