//! One venue connector: the four sync engines wired together.
//!
//! ```text
//!            +--------------+     +---------------------+
//!  public -->| stream (pub) |---->| OrderBookSyncEngine |
//!            +--------------+     +---------------------+
//!            +--------------+     +---------------------+
//!  private ->| stream (prv) |---->|    OrderTracker     |<-- BackupPoller
//!            +--------------+     +---------------------+
//!                   all REST calls: RestGateway -> RateLimiter
//! ```

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::book::{BookSyncSettings, OrderBookSyncEngine};
use crate::application::order::{BackupPoller, OrderTracker, TrackerSettings};
use crate::application::stream::{
    LifecycleState, StreamEvent, StreamLifecycleManager, StreamSettings,
};
use crate::application::symbol::SymbolMap;
use crate::application::throttle::{RateLimitRule, RateLimiter, RestGateway, ThrottleSettings};
use crate::domain::id::TradingPair;
use crate::error::Result;
use crate::port::outbound::{
    AuthProvider, ExchangeAdapter, RestTransport, StreamConnector, VenueEvent,
};

/// Everything a connector needs to know, already validated.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub pairs: Vec<TradingPair>,
    pub rules: Vec<RateLimitRule>,
    pub throttle: ThrottleSettings,
    pub book: BookSyncSettings,
    pub public_stream: StreamSettings,
    /// `None` for market-data-only connectors.
    pub private_stream: Option<StreamSettings>,
    pub tracker: TrackerSettings,
}

/// External collaborators supplied by the caller.
#[derive(Clone)]
pub struct Collaborators {
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub rest: Arc<dyn RestTransport>,
    pub streams: Arc<dyn StreamConnector>,
    pub auth: Option<Arc<dyn AuthProvider>>,
}

/// Readiness of each component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorStatus {
    pub public_stream: LifecycleState,
    pub private_stream: Option<LifecycleState>,
    pub books_synced: bool,
    pub active_orders: usize,
    pub lost_orders: usize,
}

impl ConnectorStatus {
    /// Streams up and every book synced.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let stream_ready = |state: LifecycleState| {
            matches!(state, LifecycleState::Active | LifecycleState::Renewing)
        };
        stream_ready(self.public_stream)
            && self.private_stream.map_or(true, stream_ready)
            && self.books_synced
    }
}

pub struct Connector {
    pairs: Vec<TradingPair>,
    gateway: RestGateway,
    book: OrderBookSyncEngine,
    tracker: Arc<OrderTracker>,
    public: Arc<StreamLifecycleManager>,
    private: Option<Arc<StreamLifecycleManager>>,
    symbols: SymbolMap,
    venue: String,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connector {
    /// Build the engines. Nothing runs until [`Connector::start`].
    ///
    /// # Errors
    ///
    /// Returns a rate limit error when the rule graph is invalid.
    pub fn new(settings: ConnectorSettings, parts: Collaborators) -> Result<Self> {
        let limiter = RateLimiter::new(settings.rules, settings.throttle)?.into_shared();
        let gateway = RestGateway::new(limiter, Arc::clone(&parts.rest), parts.auth.clone());

        let book = OrderBookSyncEngine::new(
            Arc::clone(&parts.adapter),
            gateway.clone(),
            settings.book,
        );
        let tracker = Arc::new(OrderTracker::new(
            Arc::clone(&parts.adapter),
            gateway.clone(),
            settings.tracker,
        ));
        let public = Arc::new(StreamLifecycleManager::new(
            Arc::clone(&parts.adapter),
            gateway.clone(),
            Arc::clone(&parts.streams),
            None,
            settings.public_stream,
            settings.pairs.clone(),
        ));
        let private = settings.private_stream.map(|stream| {
            Arc::new(StreamLifecycleManager::new(
                Arc::clone(&parts.adapter),
                gateway.clone(),
                Arc::clone(&parts.streams),
                parts.auth.clone(),
                stream,
                settings.pairs.clone(),
            ))
        });
        let symbols = SymbolMap::new(Arc::clone(&parts.adapter), gateway.clone());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            pairs: settings.pairs,
            venue: parts.adapter.name().to_owned(),
            gateway,
            book,
            tracker,
            public,
            private,
            symbols,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start streams, book sync and the backup poll.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        info!(venue = %self.venue, pairs = self.pairs.len(), "connector starting");

        // Subscribe before starting so the first connect is observed.
        let public_events = self.public.events();
        let book = self.book.clone();
        tasks.push(tokio::spawn(async move {
            let mut events = public_events;
            let mut connected_before = false;
            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Message(event) => book.handle_event(event),
                    StreamEvent::Connected => {
                        // Sequence continuity does not survive a reconnect.
                        if connected_before {
                            book.resubscribe_all();
                        }
                        connected_before = true;
                    }
                    StreamEvent::Disconnected { .. } | StreamEvent::SessionUnavailable { .. } => {}
                }
            }
        }));

        if let Some(private) = &self.private {
            let private_events = private.events();
            let tracker = Arc::clone(&self.tracker);
            tasks.push(tokio::spawn(async move {
                let mut events = private_events;
                while let Some(event) = events.next().await {
                    match event {
                        StreamEvent::Message(VenueEvent::Order(update)) => {
                            tracker.apply_order_update(&update);
                        }
                        StreamEvent::Message(VenueEvent::Trade(trade)) => {
                            tracker.apply_trade_update(&trade);
                        }
                        StreamEvent::SessionUnavailable { attempts, reason } => {
                            error!(attempts, reason = %reason, "private stream unavailable, orders rely on polling");
                        }
                        StreamEvent::Disconnected { reason } => {
                            warn!(reason = %reason, "private stream disconnected");
                        }
                        StreamEvent::Message(_) | StreamEvent::Connected => {}
                    }
                }
            }));
        }

        self.book.start(self.pairs.iter().cloned());
        self.public.start();
        if let Some(private) = &self.private {
            private.start();
        }

        let poller = BackupPoller::new(Arc::clone(&self.tracker), self.private.clone());
        tasks.push(tokio::spawn(poller.run(self.shutdown.subscribe())));
    }

    /// Cancel and join every task. Sessions are closed and sockets released.
    pub async fn stop(&self) {
        info!(venue = %self.venue, "connector stopping");
        let _ = self.shutdown.send(true);
        self.public.stop().await;
        if let Some(private) = &self.private {
            private.stop().await;
        }
        self.book.stop().await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!(venue = %self.venue, "connector task panicked");
                }
            }
        }
        info!(venue = %self.venue, "connector stopped");
    }

    #[must_use]
    pub fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            public_stream: self.public.state(),
            private_stream: self.private.as_ref().map(|stream| stream.state()),
            books_synced: self.book.all_synced(),
            active_orders: self.tracker.active_orders().len(),
            lost_orders: self.tracker.lost_orders().len(),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    #[must_use]
    pub fn venue(&self) -> &str {
        &self.venue
    }

    #[must_use]
    pub fn pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    /// The rate-limited REST path, for order submission and other calls.
    #[must_use]
    pub const fn rest(&self) -> &RestGateway {
        &self.gateway
    }

    #[must_use]
    pub const fn book(&self) -> &OrderBookSyncEngine {
        &self.book
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<OrderTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn public_stream(&self) -> &Arc<StreamLifecycleManager> {
        &self.public
    }

    #[must_use]
    pub fn private_stream(&self) -> Option<&Arc<StreamLifecycleManager>> {
        self.private.as_ref()
    }

    #[must_use]
    pub const fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("venue", &self.venue)
            .field("status", &self.status())
            .finish()
    }
}
