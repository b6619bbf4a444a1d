use crate::core::ClosePolicy;
use crate::storage::Record;
use crate::store::Change;
use shared::models::{Order, OrderLine, OrderStatus};
use shared::{EventPayload, SessionEventType};

/// A session's orders, in creation order
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: Vec<Order>,
}

impl OrderBook {
    pub(crate) fn from_orders(mut orders: Vec<Order>) -> Self {
        orders.sort_by_key(|o| o.created_at);
        Self { orders }
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == order_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// The participant's open (pending) order
    pub fn cart_for(&self, participant_id: &str) -> Option<&Order> {
        self.orders
            .iter()
            .find(|o| o.participant_id == participant_id && o.is_cart())
    }

    pub fn find_line(&self, line_id: &str) -> Option<(&Order, &OrderLine)> {
        self.orders
            .iter()
            .find_map(|o| o.line(line_id).map(|line| (o, line)))
    }

    /// Replace or append an order version
    pub(in crate::orders) fn upsert(&mut self, order: Order) {
        match self.orders.iter_mut().find(|o| o.id == order.id) {
            Some(slot) => *slot = order,
            None => self.orders.push(order),
        }
    }
}

/// Order changes forced by closing a session
#[derive(Debug, Default)]
pub(crate) struct OrderCascade {
    /// (new version, previous status)
    cancelled: Vec<(Order, OrderStatus)>,
}

impl OrderCascade {
    pub(crate) fn change(&self) -> Change {
        self.cancelled
            .iter()
            .fold(Change::new(), |change, (order, previous)| {
                change
                    .record(Record::Order(order.clone()))
                    .event(
                        SessionEventType::OrderStatusChanged,
                        EventPayload::Order {
                            order: order.clone(),
                            previous_status: Some(*previous),
                        },
                    )
            })
    }

    pub(crate) fn apply(self, book: &mut OrderBook) {
        for (order, _) in self.cancelled {
            book.upsert(order);
        }
    }
}

/// Pending carts to cancel when the session closes (none when preserved)
pub(crate) fn cascade_on_close(book: &OrderBook, policy: ClosePolicy, now: i64) -> OrderCascade {
    if policy == ClosePolicy::PreserveForBilling {
        return OrderCascade::default();
    }
    let cancelled = book
        .iter()
        .filter(|o| o.status == OrderStatus::Pending)
        .map(|o| {
            let order = Order {
                status: OrderStatus::Cancelled,
                cancel_reason: Some("session closed".to_string()),
                updated_at: now,
                ..o.clone()
            };
            (order, o.status)
        })
        .collect();
    OrderCascade { cancelled }
}
