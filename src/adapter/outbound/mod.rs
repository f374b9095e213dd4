//! Outbound adapters (driven side): default network transports.

pub mod auth;
pub mod http;
pub mod websocket;

pub use auth::ApiKeyAuth;
pub use http::HttpTransport;
pub use websocket::{WebSocketConnector, WebSocketHandle};

/// Install the `ring` rustls provider once per process. A provider installed
/// by the host application wins.
pub(crate) fn ensure_crypto_provider() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
