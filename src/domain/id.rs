//! Domain identifier types with proper encapsulation.
//!
//! Every identifier is a string newtype so that a client order id can never be
//! passed where an exchange order id or a trading pair is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "` from a string.")]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[doc = concat!("Get the `", stringify!($name), "` as a string slice.")]
            #[must_use]
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
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Venue-agnostic trading pair, e.g. `BTC-USDT`.
    TradingPair
);

string_id!(
    /// Order identifier chosen by the client at submission time.
    ///
    /// This is the key of the in-flight order table.
    ClientOrderId
);

string_id!(
    /// Order identifier assigned by the venue once the order is accepted.
    ExchangeOrderId
);

string_id!(
    /// Venue trade (fill) identifier. Globally deduplicating per order.
    TradeId
);

string_id!(
    /// Rate limit rule identifier (a logical endpoint or a shared pool).
    RuleId
);

impl ClientOrderId {
    /// Generate a fresh random client order id with the given prefix.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{prefix}{}", &id[..20]))
    }
}

impl TradingPair {
    /// Split the pair into `(base, quote)` on the first `-`.
    #[must_use]
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once('-')
    }
}
