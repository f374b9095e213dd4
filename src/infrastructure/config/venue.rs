//! Venue endpoints, pairs and credentials.

use serde::Deserialize;

use crate::domain::id::TradingPair;

pub const API_KEY_ENV: &str = "VENUELINK_API_KEY";
pub const API_SECRET_ENV: &str = "VENUELINK_API_SECRET";

/// `[venue]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// Venue name used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// REST base URL.
    #[serde(default)]
    pub rest_url: String,
    /// Public market data stream URL.
    #[serde(default)]
    pub ws_public_url: String,
    /// Private account stream URL. Defaults to the public URL.
    #[serde(default)]
    pub ws_private_url: Option<String>,
    /// Trading pairs in canonical `BASE-QUOTE` form.
    #[serde(default)]
    pub pairs: Vec<String>,
    /// Run the authenticated stream and order reconciliation.
    #[serde(default)]
    pub private_stream: bool,
    /// REST request timeout (milliseconds).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Loaded from the environment only.
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

fn default_name() -> String {
    "venue".into()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl VenueConfig {
    #[must_use]
    pub fn trading_pairs(&self) -> Vec<TradingPair> {
        self.pairs.iter().map(|pair| TradingPair::from(pair.as_str())).collect()
    }

    #[must_use]
    pub fn private_url(&self) -> &str {
        self.ws_private_url.as_deref().unwrap_or(&self.ws_public_url)
    }

    /// Read `VENUELINK_API_KEY` / `VENUELINK_API_SECRET`. Both must be set.
    pub(crate) fn load_credentials(&mut self) {
        let key = std::env::var(API_KEY_ENV).ok().filter(|value| !value.is_empty());
        let secret = std::env::var(API_SECRET_ENV).ok().filter(|value| !value.is_empty());
        self.credentials = match (key, secret) {
            (Some(api_key), Some(api_secret)) => Some(Credentials {
                api_key,
                api_secret,
            }),
            _ => None,
        };
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            rest_url: String::new(),
            ws_public_url: String::new(),
            ws_private_url: None,
            pairs: Vec::new(),
            private_stream: false,
            request_timeout_ms: default_request_timeout_ms(),
            credentials: None,
        }
    }
}

/// API key pair for signing requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
