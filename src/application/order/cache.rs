//! Recently closed orders, kept briefly to absorb late and duplicate events.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::domain::id::ClientOrderId;
use crate::domain::order::InFlightOrder;

pub(crate) type OrderSlot = Arc<Mutex<InFlightOrder>>;

/// Bounded, TTL-expiring map of closed orders. Oldest entries go first.
///
/// Evicted slots are held until [`ClosedOrderCache::take_evicted`] so the
/// owner can drop whatever else it indexes them by.
#[derive(Debug)]
pub(crate) struct ClosedOrderCache {
    ttl: Duration,
    max_size: usize,
    entries: HashMap<ClientOrderId, (Instant, OrderSlot)>,
    order: VecDeque<(Instant, ClientOrderId)>,
    evicted: Vec<OrderSlot>,
}

impl ClosedOrderCache {
    pub(crate) fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size: max_size.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            evicted: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, id: ClientOrderId, slot: OrderSlot) {
        let now = Instant::now();
        self.purge(now);
        self.entries.insert(id.clone(), (now, slot));
        self.order.push_back((now, id));
        while self.entries.len() > self.max_size {
            let Some((at, oldest)) = self.order.pop_front() else {
                break;
            };
            self.remove_if_current(&oldest, at);
        }
    }

    pub(crate) fn get(&mut self, id: &ClientOrderId) -> Option<OrderSlot> {
        self.purge(Instant::now());
        self.entries.get(id).map(|(_, slot)| Arc::clone(slot))
    }

    /// Slots that left the cache since the last call.
    pub(crate) fn take_evicted(&mut self) -> Vec<OrderSlot> {
        std::mem::take(&mut self.evicted)
    }

    pub(crate) fn len(&mut self) -> usize {
        self.purge(Instant::now());
        self.entries.len()
    }

    fn purge(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.order.front() {
            if now.saturating_duration_since(at) < self.ttl {
                break;
            }
            if let Some((at, id)) = self.order.pop_front() {
                self.remove_if_current(&id, at);
            }
        }
    }

    /// Re-inserted ids leave stale queue entries behind; only the entry with
    /// the matching timestamp owns the map slot.
    fn remove_if_current(&mut self, id: &ClientOrderId, at: Instant) {
        if self.entries.get(id).is_some_and(|(inserted, _)| *inserted == at) {
            if let Some((_, slot)) = self.entries.remove(id) {
                self.evicted.push(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use rust_decimal_macros::dec;

    fn slot(id: &str) -> OrderSlot {
        Arc::new(Mutex::new(
            InFlightOrder::limit(id, "BTC-USDT", OrderSide::Buy, dec!(1), dec!(1)).unwrap(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let mut cache = ClosedOrderCache::new(Duration::from_secs(30), 10);
        cache.insert("O1".into(), slot("O1"));
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get(&"O1".into()).is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&"O1".into()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_size_evicts_oldest() {
        let mut cache = ClosedOrderCache::new(Duration::from_secs(30), 2);
        for id in ["O1", "O2", "O3"] {
            cache.insert(id.into(), slot(id));
            tokio::time::advance(Duration::from_millis(1)).await;
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"O1".into()).is_none());
        assert!(cache.get(&"O3".into()).is_some());

        let evicted = cache.take_evicted();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].lock().client_order_id(), &ClientOrderId::from("O1"));
        assert!(cache.take_evicted().is_empty());
    }
}
