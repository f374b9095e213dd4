//! Request signing port.

use super::transport::RestRequest;

/// Signs authenticated requests before they reach the transport.
///
/// Treated as a pure function: the same request and clock yield the same
/// signed request. Signature algorithms live behind this trait.
pub trait AuthProvider: Send + Sync {
    /// Return the signed request (extra params and/or headers).
    fn sign(&self, request: RestRequest) -> RestRequest;

    /// Payload sent right after connecting the private stream, for venues
    /// that authenticate over the socket instead of with a listen key.
    fn stream_login_payload(&self) -> Option<String> {
        None
    }
}

/// Auth provider for public-only connectors; passes requests through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthProvider for NoAuth {
    fn sign(&self, request: RestRequest) -> RestRequest {
        request
    }
}
