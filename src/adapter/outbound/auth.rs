//! Header-based API key auth.

use crate::infrastructure::config::venue::Credentials;
use crate::port::outbound::{AuthProvider, RestRequest};

/// Adds the API key as a header to authenticated requests.
///
/// Venues that sign payloads implement [`AuthProvider`] themselves; this
/// covers the ones that only want the key.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    header: String,
    credentials: Credentials,
}

impl ApiKeyAuth {
    pub fn new(header: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            header: header.into(),
            credentials,
        }
    }
}

impl AuthProvider for ApiKeyAuth {
    fn sign(&self, request: RestRequest) -> RestRequest {
        request.header(self.header.clone(), self.credentials.api_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_key_header() {
        let auth = ApiKeyAuth::new(
            "X-API-KEY",
            Credentials {
                api_key: "key".into(),
                api_secret: "secret".into(),
            },
        );
        let signed = auth.sign(RestRequest::post("/session", "session").authenticated());
        assert_eq!(signed.headers, vec![("X-API-KEY".to_owned(), "key".to_owned())]);
    }
}
