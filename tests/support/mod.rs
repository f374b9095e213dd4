#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use venuelink::application::order::OrderEvent;
use venuelink::port::outbound::ExchangeAdapter;
use venuelink::testkit::adapter::JsonVenueAdapter;

pub const WS_BASE: &str = "ws://venue.test";

pub fn json_venue() -> Arc<dyn ExchangeAdapter> {
    Arc::new(JsonVenueAdapter::new(WS_BASE))
}

/// Poll `condition` every 10ms of (possibly paused) time, up to 10s.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Drain every order event currently buffered.
pub fn drain(rx: &mut broadcast::Receiver<OrderEvent>) -> Vec<OrderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Short names of events, for compact assertions.
pub fn names(events: &[OrderEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            OrderEvent::Created(_) => "created",
            OrderEvent::Filled { .. } => "filled",
            OrderEvent::Completed(_) => "completed",
            OrderEvent::Cancelled(_) => "cancelled",
            OrderEvent::Failed { .. } => "failed",
            OrderEvent::Expired(_) => "expired",
            OrderEvent::NotFoundPersistent { .. } => "not_found_persistent",
        })
        .collect()
}
