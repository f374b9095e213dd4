//! Lifecycle of one streaming channel: session acquisition, renewal,
//! heartbeat and reconnection.
//!
//! ```text
//! NoSession -> Acquiring -> Connecting -> Active -> Renewing -> Active ...
//!                   ^                        |
//!                   +------ Reconnecting <---+  (transport failure,
//!                                               renewal failure, expiry)
//! ```
//!
//! Every disconnect drops the session token; the next connection always
//! starts from a freshly acquired one. Subscriptions are re-sent after every
//! connect.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::dedup::EventDeduplicator;
use crate::application::throttle::RestGateway;
use crate::domain::id::{RuleId, TradingPair};
use crate::domain::session::SessionToken;
use crate::error::{AdapterError, Error, Result, TransportError};
use crate::port::outbound::{
    AuthProvider, ExchangeAdapter, StreamChannel, StreamConnector, StreamHandle, StreamMessage,
    VenueEvent,
};

const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub channel: StreamChannel,
    pub backoff: BackoffPolicy,
    /// Failed session acquisitions before the owner is told.
    pub max_acquire_attempts: u32,
    /// Fraction of the token lifetime after which it is renewed.
    pub renew_fraction: f64,
    /// Silence after which a ping is sent.
    pub idle_timeout: Duration,
    /// How long to wait for any data after a ping.
    pub pong_timeout: Duration,
    /// Rule consulted before each outbound frame, if any.
    pub send_limit_id: Option<RuleId>,
    pub event_capacity: usize,
    pub dedup_ttl: Duration,
    pub dedup_max_entries: usize,
}

impl StreamSettings {
    #[must_use]
    pub fn new(channel: StreamChannel) -> Self {
        Self {
            channel,
            backoff: BackoffPolicy::default(),
            max_acquire_attempts: 5,
            renew_fraction: 0.5,
            idle_timeout: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            send_limit_id: None,
            event_capacity: 4096,
            dedup_ttl: Duration::from_secs(60),
            dedup_max_entries: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NoSession,
    Acquiring { attempt: u32 },
    Connecting,
    Active,
    Renewing,
    Reconnecting { attempt: u32 },
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("no_session"),
            Self::Acquiring { attempt } => write!(f, "acquiring({attempt})"),
            Self::Connecting => f.write_str("connecting"),
            Self::Active => f.write_str("active"),
            Self::Renewing => f.write_str("renewing"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting({attempt})"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// What subscribers of [`StreamLifecycleManager::events`] receive.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A connection is up and subscriptions were sent.
    Connected,
    Disconnected { reason: String },
    /// A well-formed, de-duplicated venue event.
    Message(VenueEvent),
    /// Session acquisition keeps failing; retries continue.
    SessionUnavailable { attempts: u32, reason: String },
}

enum ConnectionEnd {
    Shutdown,
    Disconnected(String),
    SessionExpired,
}

struct Shared {
    adapter: Arc<dyn ExchangeAdapter>,
    gateway: RestGateway,
    connector: Arc<dyn StreamConnector>,
    auth: Option<Arc<dyn AuthProvider>>,
    settings: StreamSettings,
    pairs: RwLock<Vec<TradingPair>>,
    state: watch::Sender<LifecycleState>,
    events: RwLock<Option<broadcast::Sender<StreamEvent>>>,
    dedup: EventDeduplicator,
    token: Mutex<Option<SessionToken>>,
    last_received: Mutex<Option<Instant>>,
}

/// Owns one streaming channel and its background task.
pub struct StreamLifecycleManager {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamLifecycleManager {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        gateway: RestGateway,
        connector: Arc<dyn StreamConnector>,
        auth: Option<Arc<dyn AuthProvider>>,
        settings: StreamSettings,
        pairs: Vec<TradingPair>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::NoSession);
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let dedup = EventDeduplicator::new(settings.dedup_ttl, settings.dedup_max_entries);
        Self {
            shared: Arc::new(Shared {
                adapter,
                gateway,
                connector,
                auth,
                settings,
                pairs: RwLock::new(pairs),
                state,
                events: RwLock::new(Some(events)),
                dedup,
                token: Mutex::new(None),
                last_received: Mutex::new(None),
            }),
            shutdown,
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn channel(&self) -> StreamChannel {
        self.shared.settings.channel
    }

    /// Spawn the lifecycle loop. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(run(Arc::clone(&self.shared), shutdown)));
    }

    /// Stop the loop, close the session and the socket, and end every
    /// [`events`](Self::events) stream.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!(channel = %self.channel(), "stream task panicked");
                }
            }
        }
        self.shared.events.write().take();
        self.shared.set_state(LifecycleState::Closed);
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state.subscribe()
    }

    /// True while a connection is up and subscribed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::Active | LifecycleState::Renewing
        )
    }

    #[must_use]
    pub fn last_received_at(&self) -> Option<Instant> {
        *self.shared.last_received.lock()
    }

    /// The token of the current session, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<SessionToken> {
        self.shared.token.lock().clone()
    }

    #[must_use]
    pub fn pairs(&self) -> Vec<TradingPair> {
        self.shared.pairs.read().clone()
    }

    /// Replace the subscribed pairs; they take effect on the next connect.
    pub fn set_pairs(&self, pairs: Vec<TradingPair>) {
        *self.shared.pairs.write() = pairs;
    }

    /// Lazy, infinite sequence of stream events. Ends after [`stop`](Self::stop).
    #[must_use]
    pub fn events(&self) -> BoxStream<'static, StreamEvent> {
        let Some(rx) = self.shared.events.read().as_ref().map(broadcast::Sender::subscribe) else {
            return stream::empty().boxed();
        };
        let channel = self.channel();
        stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "stream subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

impl Drop for StreamLifecycleManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for StreamLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLifecycleManager")
            .field("channel", &self.channel())
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn set_state(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(channel = %self.settings.channel, from = %previous, to = %next, "stream state");
        }
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(tx) = self.events.read().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn needs_session(&self) -> bool {
        self.settings.channel == StreamChannel::Private
            && self.adapter.session_open_request().is_some()
    }

    async fn open_session(&self) -> Result<SessionToken> {
        let request = self
            .adapter
            .session_open_request()
            .ok_or(AdapterError::Unsupported("session open"))?;
        let response = self.gateway.execute(request).await?;
        Ok(self.adapter.parse_session_token(&response)?)
    }

    async fn renew_session(&self, token: &SessionToken) -> Result<SessionToken> {
        let request = self
            .adapter
            .session_renew_request(token)
            .ok_or(AdapterError::Unsupported("session renew"))?;
        let response = self.gateway.execute(request).await?;
        Ok(self.adapter.parse_renewed_token(token, &response)?)
    }

    /// Best effort: runs during shutdown, so it never waits on the rate
    /// limiter longer than [`SESSION_CLOSE_TIMEOUT`].
    async fn close_session(&self, token: &SessionToken) {
        let Some(request) = self.adapter.session_close_request(token) else {
            return;
        };
        match tokio::time::timeout(SESSION_CLOSE_TIMEOUT, self.gateway.execute(request)).await {
            Ok(Ok(_)) => info!(channel = %self.settings.channel, "session closed"),
            Ok(Err(err)) => warn!(channel = %self.settings.channel, error = %err, "session close failed"),
            Err(_) => warn!(channel = %self.settings.channel, "session close timed out"),
        }
    }

    async fn send(&self, handle: &mut dyn StreamHandle, message: StreamMessage) -> Result<()> {
        if let Some(rule) = &self.settings.send_limit_id {
            let _permit = self.gateway.limiter().acquire(rule, 1).await?;
        }
        handle.send(message).await?;
        Ok(())
    }

    /// Acquire a token, retrying with backoff until it works or shutdown.
    async fn acquire_session(&self, shutdown: &mut watch::Receiver<bool>) -> Option<SessionToken> {
        let mut backoff = Backoff::new(BackoffPolicy {
            max_consecutive_failures: u32::MAX,
            ..self.settings.backoff.clone()
        });
        let max_attempts = self.settings.max_acquire_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.set_state(LifecycleState::Acquiring { attempt });
            let result = tokio::select! {
                result = self.open_session() => result,
                _ = shutdown.changed() => return None,
            };
            match result {
                Ok(token) => {
                    info!(channel = %self.settings.channel, attempt, "session acquired");
                    return Some(token);
                }
                Err(err) => {
                    warn!(channel = %self.settings.channel, attempt, error = %err, "session acquisition failed");
                    if attempt % max_attempts == 0 {
                        let unavailable = Error::SessionUnavailable {
                            attempts: attempt,
                            reason: err.to_string(),
                        };
                        error!(channel = %self.settings.channel, error = %unavailable, "still retrying");
                        self.emit(StreamEvent::SessionUnavailable {
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }
                    if !sleep_or_shutdown(backoff.next_delay(), shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Send the login payload and subscriptions on a fresh connection.
    async fn prepare(&self, handle: &mut dyn StreamHandle) -> Result<()> {
        if self.settings.channel == StreamChannel::Private {
            if let Some(login) = self.auth.as_ref().and_then(|auth| auth.stream_login_payload()) {
                self.send(handle, StreamMessage::Text(login)).await?;
            }
        }
        let pairs = self.pairs.read().clone();
        let requests = self
            .adapter
            .build_subscribe_requests(self.settings.channel, &pairs);
        let count = requests.len();
        for payload in requests {
            self.send(handle, StreamMessage::Text(payload)).await?;
        }
        debug!(channel = %self.settings.channel, pairs = pairs.len(), requests = count, "subscribed");
        Ok(())
    }

    /// Pump one live connection until it ends.
    async fn drive(
        &self,
        handle: &mut dyn StreamHandle,
        token: &mut Option<SessionToken>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionEnd {
        let channel = self.settings.channel;
        let mut last_seen = Instant::now();
        let mut ping_sent: Option<Instant> = None;

        loop {
            let liveness_deadline = match ping_sent {
                Some(sent) => sent + self.settings.pong_timeout,
                None => last_seen + self.settings.idle_timeout,
            };
            let renew_deadline = token
                .as_ref()
                .map(|t| t.renew_at(self.settings.renew_fraction));

            tokio::select! {
                _ = shutdown.changed() => return ConnectionEnd::Shutdown,

                _ = sleep_until(renew_deadline.unwrap_or(liveness_deadline)), if renew_deadline.is_some() => {
                    let Some(current) = token.clone() else { continue };
                    if current.is_expired() {
                        return ConnectionEnd::SessionExpired;
                    }
                    self.set_state(LifecycleState::Renewing);
                    let renewed = tokio::select! {
                        renewed = self.renew_session(&current) => renewed,
                        _ = shutdown.changed() => return ConnectionEnd::Shutdown,
                    };
                    match renewed {
                        Ok(renewed) => {
                            info!(channel = %channel, "session renewed");
                            *self.token.lock() = Some(renewed.clone());
                            *token = Some(renewed);
                            self.set_state(LifecycleState::Active);
                        }
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "session renewal failed, reacquiring");
                            return ConnectionEnd::Disconnected(format!("renewal failed: {err}"));
                        }
                    }
                }

                _ = sleep_until(liveness_deadline) => {
                    if ping_sent.is_some() {
                        warn!(channel = %channel, "heartbeat timed out");
                        return ConnectionEnd::Disconnected("heartbeat timeout".into());
                    }
                    let ping = self
                        .adapter
                        .ping_payload()
                        .map_or_else(|| StreamMessage::Ping(Vec::new()), StreamMessage::Text);
                    trace!(channel = %channel, "idle, sending ping");
                    let sent = tokio::select! {
                        sent = self.send(handle, ping) => sent,
                        _ = shutdown.changed() => return ConnectionEnd::Shutdown,
                    };
                    if let Err(err) = sent {
                        return ConnectionEnd::Disconnected(format!("ping failed: {err}"));
                    }
                    ping_sent = Some(Instant::now());
                }

                received = handle.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(TransportError::Closed) => {
                            return ConnectionEnd::Disconnected("closed by peer".into());
                        }
                        Err(err) => return ConnectionEnd::Disconnected(err.to_string()),
                    };
                    last_seen = Instant::now();
                    ping_sent = None;
                    *self.last_received.lock() = Some(last_seen);

                    let Some(text) = message.as_text() else {
                        // Protocol pings are answered by the transport.
                        continue;
                    };
                    let events = match self.adapter.parse_message(channel, &text) {
                        Ok(events) => events,
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "malformed message dropped");
                            continue;
                        }
                    };
                    for event in events {
                        match event {
                            VenueEvent::SessionExpired => {
                                warn!(channel = %channel, error = %Error::SessionExpired, "venue expired the session");
                                return ConnectionEnd::SessionExpired;
                            }
                            VenueEvent::Pong => {}
                            event if self.dedup.is_duplicate(&event) => {
                                trace!(channel = %channel, "duplicate event dropped");
                            }
                            event => self.emit(StreamEvent::Message(event)),
                        }
                    }
                }
            }
        }
    }
}

/// Sleep unless shutdown is signalled first. Returns false on shutdown.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let channel = shared.settings.channel;
    let mut backoff = Backoff::new(shared.settings.backoff.clone());
    info!(channel = %channel, venue = shared.adapter.name(), "stream lifecycle started");

    while !*shutdown.borrow() {
        // Never carry a token across connections.
        shared.token.lock().take();

        let mut token = if shared.needs_session() {
            match shared.acquire_session(&mut shutdown).await {
                Some(token) => Some(token),
                None => break,
            }
        } else {
            None
        };
        *shared.token.lock() = token.clone();

        shared.set_state(LifecycleState::Connecting);
        let url = shared.adapter.stream_url(channel, token.as_ref());
        let connected = tokio::select! {
            result = shared.connector.connect(&url) => result,
            _ = shutdown.changed() => break,
        };

        let end = match connected {
            Ok(mut handle) => {
                let prepared = tokio::select! {
                    prepared = shared.prepare(handle.as_mut()) => Some(prepared),
                    _ = shutdown.changed() => None,
                };
                let end = match prepared {
                    None => ConnectionEnd::Shutdown,
                    Some(Ok(())) => {
                        backoff.reset();
                        shared.set_state(LifecycleState::Active);
                        info!(channel = %channel, "stream connected");
                        shared.emit(StreamEvent::Connected);
                        shared.drive(handle.as_mut(), &mut token, &mut shutdown).await
                    }
                    Some(Err(err)) => {
                        ConnectionEnd::Disconnected(format!("subscribe failed: {err}"))
                    }
                };
                handle.close().await;
                end
            }
            Err(err) => ConnectionEnd::Disconnected(format!("connect failed: {err}")),
        };

        match end {
            ConnectionEnd::Shutdown => {
                if let Some(token) = token.take() {
                    shared.close_session(&token).await;
                }
                break;
            }
            ConnectionEnd::SessionExpired => {
                shared.token.lock().take();
                shared.set_state(LifecycleState::NoSession);
                shared.emit(StreamEvent::Disconnected {
                    reason: "session expired".into(),
                });
            }
            ConnectionEnd::Disconnected(reason) => {
                shared.token.lock().take();
                backoff.record_failure();
                let attempt = backoff.failures();
                shared.set_state(LifecycleState::Reconnecting { attempt });
                warn!(channel = %channel, reason = %reason, attempt, "stream disconnected");
                shared.emit(StreamEvent::Disconnected { reason });
                let delay = backoff.next_delay();
                info!(channel = %channel, delay_ms = delay.as_millis() as u64, attempt, "reconnecting after delay");
                if !sleep_or_shutdown(delay, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    shared.token.lock().take();
    shared.set_state(LifecycleState::Closed);
    info!(channel = %channel, "stream lifecycle stopped");
}
