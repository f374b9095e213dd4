//! Order book sync engine: one [`PairSync`] per trading pair, fed by the
//! public stream and seeded by rate-limited REST snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::sync::{BookStats, DiffOutcome, GapPolicy, PairSync, SyncPhase};
use crate::application::throttle::RestGateway;
use crate::domain::book::BookSnapshot;
use crate::domain::id::TradingPair;
use crate::domain::trade::PublicTrade;
use crate::domain::update::OrderBookUpdate;
use crate::error::{Error, Result};
use crate::port::outbound::{ExchangeAdapter, VenueEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct BookSyncSettings {
    pub gap_policy: GapPolicy,
    /// Diffs held while no snapshot is applied.
    pub replay_window: usize,
    /// Fixed delay between snapshot attempts.
    pub snapshot_retry_delay: Duration,
    /// Per-pair broadcast buffer.
    pub channel_capacity: usize,
}

impl Default for BookSyncSettings {
    fn default() -> Self {
        Self {
            gap_policy: GapPolicy::Resnapshot,
            replay_window: 1000,
            snapshot_retry_delay: Duration::from_secs(5),
            channel_capacity: 1024,
        }
    }
}

struct PairEntry {
    pair: TradingPair,
    sync: Mutex<PairSync>,
    tx: broadcast::Sender<OrderBookUpdate>,
    snapshot_task: Mutex<Option<JoinHandle<()>>>,
}

impl PairEntry {
    /// Current book as a snapshot update plus a receiver positioned right
    /// after it.
    fn snapshot_and_subscribe(
        &self,
    ) -> (Option<OrderBookUpdate>, broadcast::Receiver<OrderBookUpdate>) {
        let sync = self.sync.lock();
        let rx = self.tx.subscribe();
        (current_update(&sync), rx)
    }

    fn publish(&self, updates: Vec<OrderBookUpdate>) {
        for update in updates {
            // No receivers is fine.
            let _ = self.tx.send(update);
        }
    }
}

fn current_update(sync: &PairSync) -> Option<OrderBookUpdate> {
    if sync.phase() != SyncPhase::Synced {
        return None;
    }
    let book = sync.book();
    let snapshot = book.snapshot(None);
    let sequence = snapshot.sequence_id?;
    let mut update =
        OrderBookUpdate::snapshot(snapshot.pair, sequence, snapshot.bids, snapshot.asks);
    if let Some(at) = snapshot.updated_at {
        update.timestamp = at;
    }
    Some(update)
}

struct Inner {
    adapter: Arc<dyn ExchangeAdapter>,
    gateway: RestGateway,
    settings: BookSyncSettings,
    pairs: RwLock<HashMap<TradingPair, Arc<PairEntry>>>,
    trades: broadcast::Sender<PublicTrade>,
}

/// Keeps a consistent, monotonically advancing book per trading pair.
///
/// Cloning is cheap and shares the same engine.
#[derive(Clone)]
pub struct OrderBookSyncEngine {
    inner: Arc<Inner>,
}

impl OrderBookSyncEngine {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        gateway: RestGateway,
        settings: BookSyncSettings,
    ) -> Self {
        let (trades, _) = broadcast::channel(settings.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                adapter,
                gateway,
                settings,
                pairs: RwLock::new(HashMap::new()),
                trades,
            }),
        }
    }

    /// Start syncing `pair`. Returns false if it was already tracked.
    pub fn track(&self, pair: TradingPair) -> bool {
        let entry = {
            let mut pairs = self.inner.pairs.write();
            if pairs.contains_key(&pair) {
                return false;
            }
            let (tx, _) = broadcast::channel(self.inner.settings.channel_capacity.max(1));
            let entry = Arc::new(PairEntry {
                pair: pair.clone(),
                sync: Mutex::new(PairSync::new(
                    pair.clone(),
                    self.inner.settings.gap_policy,
                    self.inner.settings.replay_window,
                )),
                tx,
                snapshot_task: Mutex::new(None),
            });
            pairs.insert(pair, Arc::clone(&entry));
            entry
        };
        entry.sync.lock().begin_snapshot();
        self.spawn_snapshot(&entry);
        true
    }

    /// Track every pair in `pairs`.
    pub fn start(&self, pairs: impl IntoIterator<Item = TradingPair>) {
        for pair in pairs {
            self.track(pair);
        }
    }

    #[must_use]
    pub fn pairs(&self) -> Vec<TradingPair> {
        let mut pairs: Vec<_> = self.inner.pairs.read().keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Route one public stream event. Private events are ignored.
    pub fn handle_event(&self, event: VenueEvent) {
        match event {
            VenueEvent::BookDiff(update) => self.apply_diff(update),
            VenueEvent::BookSnapshot(update) => self.apply_stream_snapshot(update),
            VenueEvent::PublicTrade(trade) => self.relay_trade(trade),
            _ => {}
        }
    }

    /// Offer a diff; gaps trigger a background re-snapshot.
    pub fn apply_diff(&self, update: OrderBookUpdate) {
        let Some(entry) = self.entry(&update.pair) else {
            trace!(pair = %update.pair, "diff for untracked pair");
            return;
        };

        let mut sync = entry.sync.lock();
        match sync.on_diff(update) {
            DiffOutcome::Applied(applied) => entry.publish(applied),
            DiffOutcome::Buffered | DiffOutcome::Stale => {}
            DiffOutcome::Rejected(err) => {
                warn!(pair = %entry.pair, error = %err, "diff rejected");
            }
            DiffOutcome::Gap { expected, received } => {
                let consecutive = sync.stats().consecutive_gaps;
                drop(sync);
                let err = Error::SequenceGap {
                    pair: entry.pair.clone(),
                    expected,
                    received,
                };
                warn!(error = %err, consecutive, "re-snapshotting order book");
                self.spawn_snapshot(&entry);
            }
        }
    }

    /// Apply a full snapshot pushed over the stream.
    pub fn apply_stream_snapshot(&self, update: OrderBookUpdate) {
        let Some(entry) = self.entry(&update.pair) else {
            return;
        };
        if self.inner.apply_snapshot(&entry, update) {
            if let Some(task) = entry.snapshot_task.lock().take() {
                task.abort();
            }
        }
    }

    /// Relay a public trade. Trades are not sequenced against the book.
    pub fn relay_trade(&self, trade: PublicTrade) {
        let _ = self.inner.trades.send(trade);
    }

    /// Lazy, infinite sequence of applied updates for `pair`.
    ///
    /// Starts with the current book as a snapshot update when synced. A
    /// subscriber that falls behind gets a fresh snapshot instead of the
    /// diffs it missed. `None` if the pair is not tracked.
    #[must_use]
    pub fn subscribe(&self, pair: &TradingPair) -> Option<BoxStream<'static, OrderBookUpdate>> {
        let entry = self.entry(pair)?;
        let (first, rx) = entry.snapshot_and_subscribe();

        struct State {
            first: Option<OrderBookUpdate>,
            rx: broadcast::Receiver<OrderBookUpdate>,
            entry: Arc<PairEntry>,
        }

        let state = State { first, rx, entry };
        let updates = stream::unfold(state, |mut state| async move {
            if let Some(first) = state.first.take() {
                return Some((first, state));
            }
            loop {
                match state.rx.recv().await {
                    Ok(update) => return Some((update, state)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(pair = %state.entry.pair, skipped, "book subscriber lagged, resyncing");
                        let (snapshot, rx) = state.entry.snapshot_and_subscribe();
                        state.rx = rx;
                        if let Some(snapshot) = snapshot {
                            return Some((snapshot, state));
                        }
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Some(updates.boxed())
    }

    /// Lazy, infinite sequence of public trades across all pairs.
    #[must_use]
    pub fn subscribe_trades(&self) -> BoxStream<'static, PublicTrade> {
        let rx = self.inner.trades.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(trade) => return Some((trade, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "trade subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Immutable copy of the synced book, or `None` while not synced.
    #[must_use]
    pub fn book(&self, pair: &TradingPair) -> Option<BookSnapshot> {
        self.book_with_depth(pair, None)
    }

    #[must_use]
    pub fn book_with_depth(&self, pair: &TradingPair, depth: Option<usize>) -> Option<BookSnapshot> {
        let entry = self.entry(pair)?;
        let sync = entry.sync.lock();
        (sync.phase() == SyncPhase::Synced).then(|| sync.book().snapshot(depth))
    }

    #[must_use]
    pub fn phase(&self, pair: &TradingPair) -> Option<SyncPhase> {
        self.entry(pair).map(|entry| entry.sync.lock().phase())
    }

    #[must_use]
    pub fn stats(&self, pair: &TradingPair) -> Option<BookStats> {
        self.entry(pair).map(|entry| entry.sync.lock().stats())
    }

    #[must_use]
    pub fn is_synced(&self, pair: &TradingPair) -> bool {
        self.phase(pair) == Some(SyncPhase::Synced)
    }

    /// True when every tracked pair is synced.
    #[must_use]
    pub fn all_synced(&self) -> bool {
        let pairs = self.inner.pairs.read();
        !pairs.is_empty()
            && pairs
                .values()
                .all(|entry| entry.sync.lock().phase() == SyncPhase::Synced)
    }

    /// Discard `pair`'s book and fetch a fresh snapshot.
    pub fn resubscribe(&self, pair: &TradingPair) -> bool {
        let Some(entry) = self.entry(pair) else {
            return false;
        };
        {
            let mut sync = entry.sync.lock();
            sync.reset();
            sync.begin_snapshot();
        }
        info!(pair = %pair, "order book resubscribed");
        self.spawn_snapshot(&entry);
        true
    }

    /// Re-snapshot every pair, e.g. after the public stream reconnected and
    /// sequence continuity is lost.
    pub fn resubscribe_all(&self) {
        for pair in self.pairs() {
            self.resubscribe(&pair);
        }
    }

    /// Abort and join every snapshot task.
    pub async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .pairs
            .read()
            .values()
            .filter_map(|entry| entry.snapshot_task.lock().take())
            .collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    fn entry(&self, pair: &TradingPair) -> Option<Arc<PairEntry>> {
        self.inner.pairs.read().get(pair).cloned()
    }

    fn spawn_snapshot(&self, entry: &Arc<PairEntry>) {
        let task = tokio::spawn(snapshot_loop(Arc::clone(&self.inner), Arc::clone(entry)));
        if let Some(previous) = entry.snapshot_task.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Inner {
    async fn fetch_snapshot(&self, pair: &TradingPair) -> Result<OrderBookUpdate> {
        let request = self.adapter.snapshot_request(pair);
        let response = self.gateway.execute(request).await?;
        Ok(self.adapter.parse_snapshot(pair, &response)?)
    }

    /// Apply a snapshot and replay; true once the pair is synced. Only books
    /// that survive the replay reach subscribers.
    fn apply_snapshot(&self, entry: &PairEntry, snapshot: OrderBookUpdate) -> bool {
        let mut sync = entry.sync.lock();
        match sync.on_snapshot(snapshot) {
            Ok(outcome) if outcome.stale => true,
            Ok(outcome) => {
                match outcome.gap {
                    None => {
                        entry.publish(outcome.applied);
                        true
                    }
                    Some((expected, received)) => {
                        warn!(
                            pair = %entry.pair,
                            expected,
                            received,
                            "buffered diffs skip ahead of snapshot"
                        );
                        false
                    }
                }
            }
            Err(err) => {
                warn!(pair = %entry.pair, error = %err, "invalid snapshot");
                false
            }
        }
    }
}

async fn snapshot_loop(inner: Arc<Inner>, entry: Arc<PairEntry>) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match inner.fetch_snapshot(&entry.pair).await {
            Ok(snapshot) => {
                let sequence = snapshot.sequence_id;
                if inner.apply_snapshot(&entry, snapshot) {
                    info!(pair = %entry.pair, sequence, attempt, "order book synced");
                    return;
                }
            }
            Err(err) => {
                warn!(pair = %entry.pair, error = %err, attempt, "snapshot fetch failed");
            }
        }
        tokio::time::sleep(inner.settings.snapshot_retry_delay).await;
    }
}

impl std::fmt::Debug for OrderBookSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookSyncEngine")
            .field("venue", &self.inner.adapter.name())
            .field("pairs", &self.pairs())
            .finish()
    }
}
