//! Rate-limited, signed REST path shared by every engine of a connector.

use std::sync::Arc;

use tracing::{debug, warn};

use super::limiter::RateLimiter;
use crate::error::{Error, TransportError};
use crate::port::outbound::{AuthProvider, RestRequest, RestResponse, RestTransport};

/// Every outbound REST call goes through here: acquire, sign, send.
#[derive(Clone)]
pub struct RestGateway {
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn RestTransport>,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl RestGateway {
    pub fn new(
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn RestTransport>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Self {
        Self {
            limiter,
            transport,
            auth,
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Send the request and return the raw response, whatever its status.
    ///
    /// # Errors
    ///
    /// Rate limit failures and transport faults.
    pub async fn call(&self, request: RestRequest) -> Result<RestResponse, Error> {
        let permit = self
            .limiter
            .acquire(&request.limit_id, request.weight)
            .await?;
        if !permit.waited().is_zero() {
            debug!(path = %request.path, waited = ?permit.waited(), "request delayed by rate limit");
        }

        let request = match (&self.auth, request.auth_required) {
            (Some(auth), true) => auth.sign(request),
            (None, true) => {
                warn!(path = %request.path, "authenticated request without auth provider");
                request
            }
            _ => request,
        };

        let response = self.transport.call(&request).await?;
        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status = response.status,
            "rest call"
        );
        Ok(response)
    }

    /// Like [`RestGateway::call`], but non-2xx statuses are errors.
    ///
    /// # Errors
    ///
    /// Also returns [`TransportError::Status`] for non-2xx responses.
    pub async fn execute(&self, request: RestRequest) -> Result<RestResponse, Error> {
        let response = self.call(request).await?;
        if !response.is_success() {
            let err = TransportError::Status {
                status: response.status,
                body: response.body,
            };
            if err.is_throttled() {
                warn!(error = %err, "venue reported throttling");
            }
            return Err(err.into());
        }
        Ok(response)
    }
}

impl std::fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestGateway")
            .field("limiter", &self.limiter)
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}
