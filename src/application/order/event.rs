//! Order lifecycle notifications.

use crate::domain::id::ClientOrderId;
use crate::domain::order::{InFlightOrder, OrderState, Transition};
use crate::domain::trade::TradeUpdate;

/// Emitted by the tracker after every effective change. Orders are
/// snapshots taken right after the change.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    /// The venue acknowledged the order.
    Created(InFlightOrder),
    /// A new fill was recorded.
    Filled {
        order: InFlightOrder,
        trade: TradeUpdate,
    },
    /// The order is completely filled.
    Completed(InFlightOrder),
    Cancelled(InFlightOrder),
    Failed {
        order: InFlightOrder,
        reason: Option<String>,
    },
    Expired(InFlightOrder),
    /// Repeated polls could not find the order; it was forced to `Failed`.
    NotFoundPersistent {
        client_order_id: ClientOrderId,
        misses: u32,
    },
}

impl OrderEvent {
    #[must_use]
    pub fn client_order_id(&self) -> &ClientOrderId {
        match self {
            Self::Created(order)
            | Self::Completed(order)
            | Self::Cancelled(order)
            | Self::Expired(order)
            | Self::Filled { order, .. }
            | Self::Failed { order, .. } => order.client_order_id(),
            Self::NotFoundPersistent {
                client_order_id, ..
            } => client_order_id,
        }
    }

    /// Events implied by a state change.
    pub(crate) fn for_transition(transition: Transition, order: &InFlightOrder) -> Vec<Self> {
        let Transition::Moved { from, to } = transition else {
            return Vec::new();
        };
        let mut events = Vec::new();
        if from == OrderState::Pending && !to.is_terminal() && to != OrderState::PendingCancel {
            events.push(Self::Created(order.clone()));
        }
        match to {
            OrderState::Filled => events.push(Self::Completed(order.clone())),
            OrderState::Cancelled => events.push(Self::Cancelled(order.clone())),
            OrderState::Expired => events.push(Self::Expired(order.clone())),
            OrderState::Failed => events.push(Self::Failed {
                order: order.clone(),
                reason: order.failure_reason().map(str::to_owned),
            }),
            OrderState::Pending
            | OrderState::Open
            | OrderState::PartiallyFilled
            | OrderState::PendingCancel => {}
        }
        events
    }
}
