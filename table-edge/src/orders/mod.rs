//! Cart/Order Aggregator - 购物车与订单聚合
//!
//! 订单及订单行的唯一写入方。金额在同一次提交中随订单行一起重算，
//! 外部读者不会看到行与总额不一致的订单。
//!
//! Single writer for orders and their lines. Every mutation:
//!
//! ```text
//! mutate(order)
//!     ├─ 1. Validate input (quantity, note) without locking
//!     ├─ 2. [add_line only] Catalog lookup outside the session lock
//!     ├─ 3. Lock the session, (re)validate session / participant / status
//!     ├─ 4. Clone the order, change its lines
//!     ├─ 5. money::refresh_totals on the clone
//!     └─ 6. SessionStore::commit -> apply -> publish
//! ```
//!
//! A reader therefore never sees a line without its matching totals.
//!
//! # State machine
//!
//! `pending → confirmed → preparing → ready → delivered`, forward only
//! (stages may be skipped); `cancelled` from any non-terminal state.

mod book;
pub mod catalog;
pub mod money;

pub use book::OrderBook;
pub(crate) use book::cascade_on_close;
pub use catalog::{CatalogError, CatalogItem, CatalogLookup, CustomizationOption, InMemoryCatalog};

use crate::core::{SessionError, SessionPolicy, SessionResult};
use crate::storage::Record;
use crate::store::{Change, SessionAggregate, SessionHandle, SessionStore};
use rust_decimal::Decimal;
use shared::models::{GroupSummary, Order, OrderLine, OrderStatus, ParticipantShare};
use shared::util::{new_id, now_millis};
use shared::{EventPayload, SessionEventType};
use std::sync::Arc;

pub struct OrderAggregator {
    store: Arc<SessionStore>,
    catalog: Arc<dyn CatalogLookup>,
    policy: SessionPolicy,
}

impl std::fmt::Debug for OrderAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderAggregator")
            .field("catalog", &"<CatalogLookup>")
            .field("policy", &self.policy)
            .finish()
    }
}

impl OrderAggregator {
    pub fn new(store: Arc<SessionStore>, catalog: Arc<dyn CatalogLookup>) -> Self {
        let policy = store.policy().clone();
        Self {
            store,
            catalog,
            policy,
        }
    }

    // ========== Cart ==========

    /// The participant's pending order, created if missing
    pub fn get_or_create_cart(&self, session_id: &str, participant_id: &str) -> SessionResult<Order> {
        let handle = self.store.handle(session_id)?;
        let mut agg = handle.lock();
        agg.ensure_active()?;
        agg.present_participant(participant_id)?;

        if let Some(cart) = agg.orders().cart_for(participant_id) {
            return Ok(cart.clone());
        }

        let now = now_millis();
        let order = Order {
            id: new_id(),
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            status: OrderStatus::Pending,
            note: None,
            lines: Vec::new(),
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let change = Change::new().record(Record::Order(order.clone()));
        let cart = order.clone();
        self.store
            .commit(&mut agg, change, move |agg| agg.orders.upsert(cart))?;
        self.store.index_entity(&order.id, session_id);

        tracing::debug!(session_id, participant_id, order_id = %order.id, "Cart created");
        Ok(order)
    }

    /// Add a catalog item to a pending order
    ///
    /// The price is read from the catalog and frozen on the line.
    pub async fn add_line(
        &self,
        order_id: &str,
        item_id: &str,
        quantity: i32,
        note: Option<String>,
        customizations: &[String],
    ) -> SessionResult<OrderLine> {
        self.validate_quantity(quantity, false)?;
        let note = self.validate_note(note)?;
        let (session_id, handle) = self.locate_order(order_id)?;

        // Fail fast before the catalog round trip
        {
            let agg = handle.lock();
            editable_order(&agg, order_id)?;
        }

        let item = catalog::fetch_with_retry(
            self.catalog.as_ref(),
            item_id,
            self.policy.catalog_max_attempts,
            self.policy.catalog_backoff,
        )
        .await?;
        if !item.is_available {
            tracing::warn!(item_id, "Item unavailable");
            return Err(SessionError::ItemUnavailable(item_id.to_string()));
        }
        let selected = catalog::select_customizations(&item, customizations)?;

        let mut agg = handle.lock();
        // State may have moved while the lock was released
        let mut order = editable_order(&agg, order_id)?.clone();
        let line = OrderLine {
            id: new_id(),
            order_id: order_id.to_string(),
            item_id: item.id.clone(),
            name: item.name.clone(),
            quantity,
            unit_price: item.price,
            line_total: money::line_total(quantity, item.price, &selected),
            customizations: selected,
            note,
        };
        order.lines.push(line.clone());
        self.commit_edit(&mut agg, order)?;
        self.store.index_entity(&line.id, &session_id);

        tracing::info!(
            order_id,
            line_id = %line.id,
            item_id,
            quantity,
            "Line added"
        );
        Ok(line)
    }

    /// Set a line's quantity; 0 removes the line
    pub fn update_quantity(&self, line_id: &str, quantity: i32) -> SessionResult<Order> {
        self.validate_quantity(quantity, true)?;
        let handle = self.locate_line(line_id)?;
        let mut agg = handle.lock();

        let order_id = line_owner(&agg, line_id)?;
        let mut order = editable_order(&agg, &order_id)?.clone();
        if quantity == 0 {
            order.lines.retain(|l| l.id != line_id);
        } else if let Some(line) = order.lines.iter_mut().find(|l| l.id == line_id) {
            line.quantity = quantity;
        }
        let order = self.commit_edit(&mut agg, order)?;

        tracing::info!(order_id = %order.id, line_id, quantity, "Line quantity updated");
        Ok(order)
    }

    pub fn remove_line(&self, line_id: &str) -> SessionResult<Order> {
        let handle = self.locate_line(line_id)?;
        let mut agg = handle.lock();

        let order_id = line_owner(&agg, line_id)?;
        let mut order = editable_order(&agg, &order_id)?.clone();
        order.lines.retain(|l| l.id != line_id);
        let order = self.commit_edit(&mut agg, order)?;

        tracing::info!(order_id = %order.id, line_id, "Line removed");
        Ok(order)
    }

    // ========== Status ==========

    /// `pending → confirmed`; needs at least one line
    pub fn confirm(&self, order_id: &str) -> SessionResult<Order> {
        self.advance_status(order_id, OrderStatus::Confirmed)
    }

    /// Move an order forward (or cancel it)
    pub fn advance_status(&self, order_id: &str, target: OrderStatus) -> SessionResult<Order> {
        if target == OrderStatus::Cancelled {
            return self.cancel(order_id, None);
        }
        let (_, handle) = self.locate_order(order_id)?;
        let mut agg = handle.lock();
        let current = agg
            .orders()
            .get(order_id)
            .ok_or_else(|| SessionError::OrderNotFound(order_id.to_string()))?
            .clone();

        if !current.status.can_transition_to(target) {
            tracing::warn!(order_id, from = %current.status, to = %target, "Rejected order transition");
            return Err(SessionError::order_transition(current.status, target));
        }
        if current.status == OrderStatus::Pending {
            agg.ensure_active()?;
            if current.lines.is_empty() {
                return Err(SessionError::EmptyOrder(order_id.to_string()));
            }
        }

        let previous = current.status;
        let order = Order {
            status: target,
            updated_at: now_millis(),
            ..current
        };
        // Leaving pending is the confirmation, even when stages are skipped
        let event_type = if previous == OrderStatus::Pending {
            SessionEventType::OrderConfirmed
        } else {
            SessionEventType::OrderStatusChanged
        };
        self.commit_status(&mut agg, order.clone(), event_type, previous)?;

        tracing::info!(order_id, from = %previous, to = %target, "Order status changed");
        Ok(order)
    }

    /// Cancel from any non-terminal state
    pub fn cancel(&self, order_id: &str, reason: Option<String>) -> SessionResult<Order> {
        let (_, handle) = self.locate_order(order_id)?;
        let mut agg = handle.lock();
        let current = agg
            .orders()
            .get(order_id)
            .ok_or_else(|| SessionError::OrderNotFound(order_id.to_string()))?
            .clone();

        if current.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal {
                order_id: order_id.to_string(),
                status: current.status,
            });
        }

        let previous = current.status;
        let order = Order {
            status: OrderStatus::Cancelled,
            cancel_reason: reason,
            updated_at: now_millis(),
            ..current
        };
        self.commit_status(
            &mut agg,
            order.clone(),
            SessionEventType::OrderStatusChanged,
            previous,
        )?;

        tracing::info!(order_id, from = %previous, reason = ?order.cancel_reason, "Order cancelled");
        Ok(order)
    }

    // ========== Queries ==========

    pub fn order(&self, order_id: &str) -> SessionResult<Order> {
        let (_, handle) = self.locate_order(order_id)?;
        let agg = handle.lock();
        agg.orders()
            .get(order_id)
            .cloned()
            .ok_or_else(|| SessionError::OrderNotFound(order_id.to_string()))
    }

    /// The order that currently holds a line
    pub fn order_for_line(&self, line_id: &str) -> SessionResult<Order> {
        let handle = self.locate_line(line_id)?;
        let agg = handle.lock();
        agg.orders()
            .find_line(line_id)
            .map(|(order, _)| order.clone())
            .ok_or_else(|| SessionError::LineNotFound(line_id.to_string()))
    }

    pub fn orders_for_session(&self, session_id: &str) -> SessionResult<Vec<Order>> {
        let handle = self.store.handle(session_id)?;
        let agg = handle.lock();
        Ok(agg.orders().iter().cloned().collect())
    }

    /// Per-participant owed amounts and the session grand total
    ///
    /// Cancelled orders are not owed and are left out.
    pub fn group_summary(&self, session_id: &str) -> SessionResult<GroupSummary> {
        let handle = self.store.handle(session_id)?;
        let agg = handle.lock();
        Ok(summarize(&agg))
    }

    // ========== Internals ==========

    fn validate_quantity(&self, quantity: i32, allow_zero: bool) -> SessionResult<()> {
        let min = if allow_zero { 0 } else { 1 };
        if quantity < min || quantity > self.policy.max_line_quantity {
            return Err(SessionError::QuantityOutOfRange {
                quantity,
                max: self.policy.max_line_quantity,
            });
        }
        Ok(())
    }

    fn validate_note(&self, note: Option<String>) -> SessionResult<Option<String>> {
        let Some(note) = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        let len = note.chars().count();
        if len > self.policy.max_note_chars {
            return Err(SessionError::NoteTooLong {
                len,
                max: self.policy.max_note_chars,
            });
        }
        Ok(Some(note))
    }

    fn locate_order(&self, order_id: &str) -> SessionResult<(String, SessionHandle)> {
        let session_id = self
            .store
            .session_for_entity(order_id)?
            .ok_or_else(|| SessionError::OrderNotFound(order_id.to_string()))?;
        let handle = self.store.handle(&session_id)?;
        Ok((session_id, handle))
    }

    fn locate_line(&self, line_id: &str) -> SessionResult<SessionHandle> {
        let session_id = self
            .store
            .session_for_entity(line_id)?
            .ok_or_else(|| SessionError::LineNotFound(line_id.to_string()))?;
        self.store.handle(&session_id)
    }

    /// Recompute totals on an edited cart and commit it
    fn commit_edit(&self, agg: &mut SessionAggregate, mut order: Order) -> SessionResult<Order> {
        money::refresh_totals(&mut order, self.policy.tax_rate_percent);
        order.updated_at = now_millis();
        let change = Change::new()
            .record(Record::Order(order.clone()))
            .event(
                SessionEventType::OrderUpdated,
                EventPayload::Order {
                    order: order.clone(),
                    previous_status: None,
                },
            );
        let applied = order.clone();
        self.store
            .commit(agg, change, move |agg| agg.orders.upsert(applied))?;
        Ok(order)
    }

    fn commit_status(
        &self,
        agg: &mut SessionAggregate,
        order: Order,
        event_type: SessionEventType,
        previous: OrderStatus,
    ) -> SessionResult<()> {
        let change = Change::new()
            .record(Record::Order(order.clone()))
            .event(
                event_type,
                EventPayload::Order {
                    order: order.clone(),
                    previous_status: Some(previous),
                },
            );
        self.store
            .commit(agg, change, move |agg| agg.orders.upsert(order))
    }
}

/// A pending order in an active session whose owner is still seated
fn editable_order<'a>(agg: &'a SessionAggregate, order_id: &str) -> SessionResult<&'a Order> {
    agg.ensure_active()?;
    let order = agg
        .orders()
        .get(order_id)
        .ok_or_else(|| SessionError::OrderNotFound(order_id.to_string()))?;
    if order.status != OrderStatus::Pending {
        return Err(SessionError::OrderNotPending {
            order_id: order_id.to_string(),
            status: order.status,
        });
    }
    agg.present_participant(&order.participant_id)?;
    Ok(order)
}

fn line_owner(agg: &SessionAggregate, line_id: &str) -> SessionResult<String> {
    agg.orders()
        .find_line(line_id)
        .map(|(order, _)| order.id.clone())
        .ok_or_else(|| SessionError::LineNotFound(line_id.to_string()))
}

fn summarize(agg: &SessionAggregate) -> GroupSummary {
    let participants: Vec<ParticipantShare> = agg
        .participants()
        .iter()
        .map(|p| {
            let owed: Vec<&Order> = agg
                .orders()
                .iter()
                .filter(|o| o.participant_id == p.id && o.status != OrderStatus::Cancelled)
                .collect();
            ParticipantShare {
                participant_id: p.id.clone(),
                display_name: p.display_name.clone(),
                order_count: owed.len(),
                subtotal: owed.iter().map(|o| o.subtotal).sum(),
                tax: owed.iter().map(|o| o.tax).sum(),
                owed: owed.iter().map(|o| o.total).sum(),
            }
        })
        .collect();

    GroupSummary {
        session_id: agg.session().id.clone(),
        subtotal: participants.iter().map(|s| s.subtotal).sum(),
        tax: participants.iter().map(|s| s.tax).sum(),
        grand_total: participants.iter().map(|s| s.owed).sum(),
        participants,
    }
}
