//! The order reconciliation engine.
//!
//! Three unordered sources feed it: the synchronous REST result of a
//! submission, push events from the private stream, and the backup poll.
//! Every source goes through the same per-order critical section, so updates
//! to one order are serialized while different orders proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::cache::{ClosedOrderCache, OrderSlot};
use super::event::OrderEvent;
use crate::application::throttle::RestGateway;
use crate::domain::id::{ClientOrderId, ExchangeOrderId};
use crate::domain::order::{FillOutcome, InFlightOrder, OrderUpdate, Transition};
use crate::domain::trade::TradeUpdate;
use crate::error::{Error, Result};
use crate::port::outbound::{ExchangeAdapter, OrderStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Consecutive "not found" polls before an order is forced to `Failed`.
    pub not_found_threshold: u32,
    pub closed_order_ttl: Duration,
    pub closed_order_max: usize,
    /// Poll interval while the private stream is not ready.
    pub short_poll_interval: Duration,
    /// Poll interval while the private stream is healthy.
    pub long_poll_interval: Duration,
    /// Stream silence after which the short interval applies again.
    pub stream_silence_threshold: Duration,
    pub event_capacity: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            not_found_threshold: 3,
            closed_order_ttl: Duration::from_secs(30),
            closed_order_max: 1000,
            short_poll_interval: Duration::from_secs(5),
            long_poll_interval: Duration::from_secs(120),
            stream_silence_threshold: Duration::from_secs(60),
            event_capacity: 1024,
        }
    }
}

/// Outcome of one backup poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polled: usize,
    pub found: usize,
    pub not_found: usize,
    /// Orders forced to `Failed` in this pass.
    pub failed: usize,
    /// Polls that errored (transport, rate limit, unreadable body).
    pub errors: usize,
}

pub struct OrderTracker {
    adapter: Arc<dyn ExchangeAdapter>,
    gateway: RestGateway,
    settings: TrackerSettings,
    active: DashMap<ClientOrderId, OrderSlot>,
    lost: DashMap<ClientOrderId, OrderSlot>,
    closed: Mutex<ClosedOrderCache>,
    by_exchange_id: DashMap<ExchangeOrderId, ClientOrderId>,
    not_found: DashMap<ClientOrderId, u32>,
    events: broadcast::Sender<OrderEvent>,
}

impl OrderTracker {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        gateway: RestGateway,
        settings: TrackerSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let closed = ClosedOrderCache::new(settings.closed_order_ttl, settings.closed_order_max);
        Self {
            adapter,
            gateway,
            settings,
            active: DashMap::new(),
            lost: DashMap::new(),
            closed: Mutex::new(closed),
            by_exchange_id: DashMap::new(),
            not_found: DashMap::new(),
            events,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    /// Register a newly submitted order. Returns false if the client order
    /// id is already known.
    pub fn start_tracking(&self, order: InFlightOrder) -> bool {
        let id = order.client_order_id().clone();
        if self.lost.contains_key(&id) {
            return false;
        }
        let exchange_id = order.exchange_order_id().cloned();
        let inserted = match self.active.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(order)));
                true
            }
        };
        if inserted {
            if let Some(exchange_id) = exchange_id {
                self.by_exchange_id.insert(exchange_id, id.clone());
            }
            debug!(client_order_id = %id, "tracking order");
        }
        inserted
    }

    /// Stop tracking an order. It stays in the recently-closed cache so late
    /// events are still absorbed.
    pub fn stop_tracking(&self, id: &ClientOrderId) -> Option<InFlightOrder> {
        let (_, slot) = self.active.remove(id)?;
        self.not_found.remove(id);
        let order = slot.lock().clone();
        self.with_closed(|closed| closed.insert(id.clone(), slot));
        debug!(client_order_id = %id, state = %order.state(), "stopped tracking order");
        Some(order)
    }

    /// Current copy of an order: active, lost, or recently closed.
    #[must_use]
    pub fn fetch_order(&self, id: &ClientOrderId) -> Option<InFlightOrder> {
        self.slot(id).map(|slot| slot.lock().clone())
    }

    #[must_use]
    pub fn fetch_by_exchange_id(&self, id: &ExchangeOrderId) -> Option<InFlightOrder> {
        let client_id = self.by_exchange_id.get(id)?.value().clone();
        self.fetch_order(&client_id)
    }

    /// Copies of every non-terminal tracked order.
    #[must_use]
    pub fn active_orders(&self) -> Vec<InFlightOrder> {
        // Never lock a slot while holding a map shard.
        let slots: Vec<OrderSlot> = self.active.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut orders: Vec<InFlightOrder> = slots
            .iter()
            .map(|slot| slot.lock().clone())
            .filter(|order| !order.is_terminal())
            .collect();
        orders.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        orders
    }

    /// Orders forced to `Failed` after repeated not-found polls that may still
    /// receive fills.
    #[must_use]
    pub fn lost_orders(&self) -> Vec<InFlightOrder> {
        let slots: Vec<OrderSlot> = self.lost.iter().map(|entry| Arc::clone(entry.value())).collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.with_closed(|closed| closed.len())
    }

    /// Exchange order ids currently resolvable through
    /// [`fetch_by_exchange_id`](Self::fetch_by_exchange_id).
    #[must_use]
    pub fn exchange_id_count(&self) -> usize {
        self.with_closed(|closed| closed.len());
        self.by_exchange_id.len()
    }

    /// Consecutive not-found count for an order.
    #[must_use]
    pub fn not_found_count(&self, id: &ClientOrderId) -> u32 {
        self.not_found.get(id).map_or(0, |count| *count)
    }

    /// Apply a state report. Unknown orders are ignored and yield `None`.
    pub fn apply_order_update(&self, update: &OrderUpdate) -> Option<Transition> {
        let Some(slot) = self.slot(&update.client_order_id) else {
            debug!(client_order_id = %update.client_order_id, "update for unknown order ignored");
            return None;
        };

        let (transition, events, order) = {
            let mut order = slot.lock();
            let had_exchange_id = order.exchange_order_id().is_some();
            let transition = match order.apply_order_update(update) {
                Ok(transition) => transition,
                Err(err) => {
                    warn!(error = %err, "order update rejected");
                    return None;
                }
            };
            if !had_exchange_id {
                if let Some(exchange_id) = order.exchange_order_id() {
                    self.by_exchange_id
                        .insert(exchange_id.clone(), update.client_order_id.clone());
                }
            }
            let events = OrderEvent::for_transition(transition, &order);
            (transition, events, order.clone())
        };

        match transition {
            Transition::Moved { from, to } => {
                info!(client_order_id = %update.client_order_id, %from, %to, "order state changed");
            }
            Transition::Illegal { from, to } => {
                debug!(client_order_id = %update.client_order_id, %from, %to, "illegal transition ignored");
            }
            Transition::Unchanged => {}
        }

        self.publish(events);
        self.settle(&order);
        Some(transition)
    }

    /// Apply a fill. Duplicates are detected per order by trade id.
    pub fn apply_trade_update(&self, trade: &TradeUpdate) -> Option<FillOutcome> {
        let Some(slot) = self.slot(&trade.client_order_id) else {
            debug!(client_order_id = %trade.client_order_id, trade_id = %trade.trade_id, "fill for unknown order ignored");
            return None;
        };

        let (outcome, events, order) = {
            let mut order = slot.lock();
            let had_exchange_id = order.exchange_order_id().is_some();
            let outcome = match order.apply_trade(trade) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(error = %err, "fill rejected");
                    return None;
                }
            };
            if !had_exchange_id {
                if let Some(exchange_id) = order.exchange_order_id() {
                    self.by_exchange_id
                        .insert(exchange_id.clone(), trade.client_order_id.clone());
                }
            }
            let mut events = Vec::new();
            if let FillOutcome::Applied { transition } = outcome {
                events.push(OrderEvent::Filled {
                    order: order.clone(),
                    trade: trade.clone(),
                });
                events.extend(OrderEvent::for_transition(transition, &order));
            }
            (outcome, events, order.clone())
        };

        match outcome {
            FillOutcome::Duplicate => {
                debug!(client_order_id = %trade.client_order_id, trade_id = %trade.trade_id, "duplicate fill ignored");
            }
            FillOutcome::Applied { .. } => {
                info!(
                    client_order_id = %trade.client_order_id,
                    trade_id = %trade.trade_id,
                    amount = %trade.fill_base_amount,
                    filled = %order.filled_amount(),
                    state = %order.state(),
                    "fill applied"
                );
            }
        }

        self.publish(events);
        self.settle(&order);
        Some(outcome)
    }

    /// Count one "not found" answer. Once the count reaches the threshold the
    /// order is forced to `Failed` and an error-level event is emitted.
    ///
    /// Returns the current miss count, or `None` for orders that are unknown
    /// or already terminal.
    pub fn process_order_not_found(&self, id: &ClientOrderId) -> Option<u32> {
        let slot = self.active.get(id).map(|entry| Arc::clone(entry.value()))?;
        let mut order = slot.lock();
        // A fill may have completed the order since the poll was sent.
        if order.is_terminal() || !self.active.contains_key(id) {
            self.not_found.remove(id);
            return None;
        }
        let misses = {
            let mut count = self.not_found.entry(id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if misses < self.settings.not_found_threshold {
            debug!(client_order_id = %id, misses, "order not found, will retry");
            return Some(misses);
        }

        let err = Error::OrderNotFoundPersistent {
            client_order_id: id.clone(),
            misses,
        };
        let transition = order.force_fail(err.to_string());
        let mut events = vec![OrderEvent::NotFoundPersistent {
            client_order_id: id.clone(),
            misses,
        }];
        events.extend(OrderEvent::for_transition(transition, &order));
        self.not_found.remove(id);
        if self.active.remove(id).is_some() {
            self.lost.insert(id.clone(), Arc::clone(&slot));
        }
        drop(order);

        error!(error = %err, "order marked failed");
        self.publish(events);
        Some(misses)
    }

    /// Reconcile every non-terminal order against the venue's REST view.
    pub async fn backup_poll(&self) -> PollReport {
        let mut report = PollReport::default();
        for order in self.active_orders() {
            report.polled += 1;
            match self.poll_one(&order).await {
                Ok(OrderStatus::Found { update, trades }) => {
                    report.found += 1;
                    self.not_found.remove(order.client_order_id());
                    for trade in &trades {
                        self.apply_trade_update(trade);
                    }
                    self.apply_order_update(&update);
                }
                Ok(OrderStatus::NotFound) => {
                    report.not_found += 1;
                    let misses = self.process_order_not_found(order.client_order_id());
                    if misses.is_some_and(|m| m >= self.settings.not_found_threshold) {
                        report.failed += 1;
                    }
                }
                Err(err) => {
                    report.errors += 1;
                    warn!(client_order_id = %order.client_order_id(), error = %err, "order status poll failed");
                }
            }
        }
        if report.polled > 0 {
            debug!(
                polled = report.polled,
                found = report.found,
                not_found = report.not_found,
                failed = report.failed,
                errors = report.errors,
                "backup poll finished"
            );
        }
        report
    }

    /// Rehydrate the active table from persisted orders. Terminal orders are
    /// skipped. Returns how many orders were registered.
    pub fn restore(&self, orders: Vec<InFlightOrder>) -> usize {
        let mut restored = 0;
        for order in orders {
            if order.is_terminal() {
                continue;
            }
            if self.start_tracking(order) {
                restored += 1;
            }
        }
        info!(restored, "order tracker restored");
        restored
    }

    /// Serializable copy of the active table, for crash recovery.
    #[must_use]
    pub fn snapshot_orders(&self) -> Vec<InFlightOrder> {
        self.active_orders()
    }

    /// Backup poll interval for the given private stream health.
    #[must_use]
    pub const fn poll_interval(&self, stream_healthy: bool) -> Duration {
        if stream_healthy {
            self.settings.long_poll_interval
        } else {
            self.settings.short_poll_interval
        }
    }

    async fn poll_one(&self, order: &InFlightOrder) -> Result<OrderStatus> {
        let request = self.adapter.order_status_request(order);
        let response = self.gateway.call(request).await?;
        Ok(self.adapter.parse_order_status(order, &response)?)
    }

    fn slot(&self, id: &ClientOrderId) -> Option<OrderSlot> {
        if let Some(entry) = self.active.get(id) {
            return Some(Arc::clone(entry.value()));
        }
        if let Some(entry) = self.lost.get(id) {
            return Some(Arc::clone(entry.value()));
        }
        self.with_closed(|closed| closed.get(id))
    }

    /// Move terminal orders out of the active table; release lost orders
    /// once they are completely filled.
    fn settle(&self, order: &InFlightOrder) {
        let id = order.client_order_id();
        if order.is_terminal() {
            if let Some((_, slot)) = self.active.remove(id) {
                self.not_found.remove(id);
                self.with_closed(|closed| closed.insert(id.clone(), slot));
            }
        }
        if order.filled_amount() >= order.amount() {
            if let Some((_, slot)) = self.lost.remove(id) {
                info!(client_order_id = %id, "lost order completely filled");
                self.with_closed(|closed| closed.insert(id.clone(), slot));
            }
        }
    }

    /// Run `f` against the closed cache, then drop the exchange id index
    /// entries of every order the cache evicted.
    fn with_closed<R>(&self, f: impl FnOnce(&mut ClosedOrderCache) -> R) -> R {
        let (result, evicted) = {
            let mut closed = self.closed.lock();
            let result = f(&mut closed);
            (result, closed.take_evicted())
        };
        for slot in evicted {
            let (client_id, exchange_id) = {
                let order = slot.lock();
                (order.client_order_id().clone(), order.exchange_order_id().cloned())
            };
            let Some(exchange_id) = exchange_id else {
                continue;
            };
            // The client id may have been tracked again since it closed.
            self.by_exchange_id.remove_if(&exchange_id, |_, indexed| {
                *indexed == client_id
                    && !self.active.contains_key(&client_id)
                    && !self.lost.contains_key(&client_id)
            });
        }
        result
    }

    fn publish(&self, events: Vec<OrderEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

impl std::fmt::Debug for OrderTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderTracker")
            .field("active", &self.active.len())
            .field("lost", &self.lost.len())
            .field("exchange_ids", &self.by_exchange_id.len())
            .field("settings", &self.settings)
            .finish()
    }
}
