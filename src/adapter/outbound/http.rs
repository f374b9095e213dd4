//! REST transport over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method};
use tracing::{trace, warn};

use crate::error::TransportError;
use crate::port::outbound::{HttpMethod, RestRequest, RestResponse, RestTransport};

/// Sends [`RestRequest`]s relative to one venue base URL.
pub struct HttpTransport {
    http: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `https://api.example.com`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        super::ensure_crypto_provider();
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "Failed to build HTTP client, using defaults");
                HttpClient::new()
            });
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn map_error(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

const fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl RestTransport for HttpTransport {
    async fn call(&self, request: &RestRequest) -> Result<RestResponse, TransportError> {
        let url = self.url(&request.path);
        trace!(method = request.method.as_str(), url = %url, "REST request");

        let mut builder = self.http.request(method(request.method), &url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| self.map_error(&err))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| self.map_error(&err))?;
        Ok(RestResponse::new(status, body))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}
