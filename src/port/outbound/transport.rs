//! Transport port: REST calls and streaming connections.
//!
//! The core never manages sockets directly. It builds [`RestRequest`]s and
//! hands them to a [`RestTransport`], and it drives streaming sessions through
//! a [`StreamConnector`] that yields boxed [`StreamHandle`]s.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::id::RuleId;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// A REST call, already bound to the rate limit rule that gates it.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub auth_required: bool,
    /// Rule consulted by the rate limiter before the call goes out.
    pub limit_id: RuleId,
    pub weight: u32,
}

impl RestRequest {
    /// Build an unauthenticated request of weight 1.
    pub fn new(method: HttpMethod, path: impl Into<String>, limit_id: impl Into<RuleId>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
            auth_required: false,
            limit_id: limit_id.into(),
            weight: 1,
        }
    }

    pub fn get(path: impl Into<String>, limit_id: impl Into<RuleId>) -> Self {
        Self::new(HttpMethod::Get, path, limit_id)
    }

    pub fn post(path: impl Into<String>, limit_id: impl Into<RuleId>) -> Self {
        Self::new(HttpMethod::Post, path, limit_id)
    }

    pub fn put(path: impl Into<String>, limit_id: impl Into<RuleId>) -> Self {
        Self::new(HttpMethod::Put, path, limit_id)
    }

    pub fn delete(path: impl Into<String>, limit_id: impl Into<RuleId>) -> Self {
        Self::new(HttpMethod::Delete, path, limit_id)
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub const fn authenticated(mut self) -> Self {
        self.auth_required = true;
        self
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// Raw REST response; interpretation belongs to the venue adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

/// Performs REST calls against one venue.
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// Send the request and return whatever status the venue answered.
    ///
    /// Only socket or protocol failures are errors; non-2xx statuses are
    /// returned as responses.
    async fn call(&self, request: &RestRequest) -> Result<RestResponse, TransportError>;
}

/// One frame on a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

impl StreamMessage {
    /// Payload as text, for data frames.
    #[must_use]
    pub fn as_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Self::Text(text) => Some(std::borrow::Cow::Borrowed(text)),
            Self::Binary(bytes) => Some(String::from_utf8_lossy(bytes)),
            Self::Ping(_) | Self::Pong(_) => None,
        }
    }
}

/// An open streaming connection.
#[async_trait]
pub trait StreamHandle: Send {
    async fn send(&mut self, message: StreamMessage) -> Result<(), TransportError>;

    /// Wait for the next frame. [`TransportError::Closed`] signals the end.
    async fn recv(&mut self) -> Result<StreamMessage, TransportError>;

    /// Close the connection, releasing the socket.
    async fn close(&mut self);
}

/// Opens streaming connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamHandle>, TransportError>;
}
