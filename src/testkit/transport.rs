//! Scripted transports for driving the engines without a network.
//!
//! - [`ScriptedRest`] - Canned REST responses per `METHOD path`, with a
//!   call log. Best for: snapshot fetches, session calls, order polls.
//!
//! - [`ChannelConnector`] - Each connect opens a channel-backed connection
//!   controlled through a [`ChannelStreamControl`]. Best for: lifecycle
//!   tests that push frames, drop connections and count reconnects.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::TransportError;
use crate::port::outbound::{
    HttpMethod, RestRequest, RestResponse, RestTransport, StreamConnector, StreamHandle,
    StreamMessage,
};

// ---------------------------------------------------------------------------
// ScriptedRest
// ---------------------------------------------------------------------------

type Reply = Result<RestResponse, TransportError>;

#[derive(Default)]
struct Route {
    queued: VecDeque<Reply>,
    sticky: Option<Reply>,
}

/// A REST transport answering from per-route scripts.
///
/// Queued replies are used once, in order; after they run out the sticky
/// reply (if any) repeats. Unscripted routes answer `404`.
#[derive(Default)]
pub struct ScriptedRest {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<RestRequest>>,
    latency: Mutex<Option<Duration>>,
}

fn route_key(method: HttpMethod, path: &str) -> String {
    format!("{} {path}", method.as_str())
}

impl ScriptedRest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Answer every call to the route with `reply`.
    pub fn always(&self, method: HttpMethod, path: &str, reply: Reply) {
        self.routes.lock().entry(route_key(method, path)).or_default().sticky = Some(reply);
    }

    /// Answer the next call to the route with `reply`.
    pub fn enqueue(&self, method: HttpMethod, path: &str, reply: Reply) {
        self.routes
            .lock()
            .entry(route_key(method, path))
            .or_default()
            .queued
            .push_back(reply);
    }

    /// Shorthand for a sticky `200` JSON reply.
    pub fn ok_json(&self, method: HttpMethod, path: &str, body: serde_json::Value) {
        self.always(method, path, Ok(RestResponse::new(200, body.to_string())));
    }

    /// Shorthand for a sticky reply with the given status and empty body.
    pub fn status(&self, method: HttpMethod, path: &str, status: u16) {
        self.always(method, path, Ok(RestResponse::new(status, String::new())));
    }

    /// Delay every reply by `latency` (respects paused time).
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<RestRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, method: HttpMethod, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RestTransport for ScriptedRest {
    async fn call(&self, request: &RestRequest) -> Result<RestResponse, TransportError> {
        self.calls.lock().push(request.clone());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut routes = self.routes.lock();
        let Some(route) = routes.get_mut(&route_key(request.method, &request.path)) else {
            return Ok(RestResponse::new(404, "not scripted"));
        };
        if let Some(reply) = route.queued.pop_front() {
            return reply;
        }
        route
            .sticky
            .clone()
            .unwrap_or_else(|| Ok(RestResponse::new(404, "script exhausted")))
    }
}

// ---------------------------------------------------------------------------
// ChannelConnector
// ---------------------------------------------------------------------------

type Inbound = mpsc::UnboundedSender<Result<StreamMessage, TransportError>>;

struct ControlState {
    connections: watch::Sender<u32>,
    live: Mutex<Option<Inbound>>,
    urls: Mutex<Vec<String>>,
    sent: Mutex<Vec<(u32, StreamMessage)>>,
    fail_next: AtomicU32,
    answer_pings: AtomicBool,
    closed: AtomicU32,
}

/// Test-side handle onto connections opened by a [`ChannelConnector`].
#[derive(Clone)]
pub struct ChannelStreamControl {
    state: Arc<ControlState>,
}

/// A [`StreamConnector`] whose connections are fed by the test.
pub struct ChannelConnector {
    state: Arc<ControlState>,
}

impl ChannelConnector {
    pub fn new() -> (Arc<Self>, ChannelStreamControl) {
        let (connections, _) = watch::channel(0);
        let state = Arc::new(ControlState {
            connections,
            live: Mutex::new(None),
            urls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            answer_pings: AtomicBool::new(false),
            closed: AtomicU32::new(0),
        });
        (
            Arc::new(Self {
                state: Arc::clone(&state),
            }),
            ChannelStreamControl { state },
        )
    }
}

impl ChannelStreamControl {
    /// Successful connections so far.
    pub fn connect_count(&self) -> u32 {
        *self.state.connections.borrow()
    }

    /// Every URL a connection was attempted against, in order.
    pub fn urls(&self) -> Vec<String> {
        self.state.urls.lock().clone()
    }

    /// Wait until at least `n` connections have been opened.
    pub async fn wait_for_connections(&self, n: u32) {
        let mut rx = self.state.connections.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Reply to protocol pings with a pong.
    pub fn answer_pings(&self, enabled: bool) {
        self.state.answer_pings.store(enabled, Ordering::SeqCst);
    }

    /// Deliver a text frame on the newest connection. Returns false when no
    /// connection is open.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(Ok(StreamMessage::Text(text.into())))
    }

    /// Deliver a JSON frame on the newest connection.
    pub fn push_json(&self, value: &serde_json::Value) -> bool {
        self.push_text(value.to_string())
    }

    /// Drop the newest connection from the server side.
    pub fn drop_connection(&self) -> bool {
        self.push(Err(TransportError::Closed))
    }

    /// Frames the client sent, tagged with the 1-based connection number.
    pub fn sent(&self) -> Vec<(u32, StreamMessage)> {
        self.state.sent.lock().clone()
    }

    /// Text frames the client sent on connection `n`.
    pub fn sent_text_on(&self, n: u32) -> Vec<String> {
        self.state
            .sent
            .lock()
            .iter()
            .filter(|(conn, _)| *conn == n)
            .filter_map(|(_, message)| match message {
                StreamMessage::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Protocol pings the client sent across all connections.
    pub fn pings_sent(&self) -> usize {
        self.state
            .sent
            .lock()
            .iter()
            .filter(|(_, message)| matches!(message, StreamMessage::Ping(_)))
            .count()
    }

    /// Connections the client closed itself.
    pub fn client_closes(&self) -> u32 {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn push(&self, message: Result<StreamMessage, TransportError>) -> bool {
        self.state
            .live
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok())
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamHandle>, TransportError> {
        self.state.urls.lock().push(url.to_owned());
        let fail = self
            .state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(TransportError::Connect("scripted connect failure".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.live.lock() = Some(tx.clone());
        let mut number = 0;
        self.state.connections.send_modify(|count| {
            *count += 1;
            number = *count;
        });
        Ok(Box::new(ChannelHandle {
            number,
            rx,
            loopback: tx,
            state: Arc::clone(&self.state),
        }))
    }
}

struct ChannelHandle {
    number: u32,
    rx: mpsc::UnboundedReceiver<Result<StreamMessage, TransportError>>,
    loopback: Inbound,
    state: Arc<ControlState>,
}

#[async_trait]
impl StreamHandle for ChannelHandle {
    async fn send(&mut self, message: StreamMessage) -> Result<(), TransportError> {
        if matches!(message, StreamMessage::Ping(_))
            && self.state.answer_pings.load(Ordering::SeqCst)
        {
            let _ = self.loopback.send(Ok(StreamMessage::Pong(Vec::new())));
        }
        self.state.sent.lock().push((self.number, message));
        Ok(())
    }

    async fn recv(&mut self) -> Result<StreamMessage, TransportError> {
        match self.rx.recv().await {
            Some(message) => message,
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.rx.close();
    }
}
