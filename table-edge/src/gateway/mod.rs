//! Session Gateway - 命令入口
//!
//! Boundary between devices and the core. Translates a [`SessionCommand`]
//! into calls on the store, aggregator and call coordinator and answers with
//! a [`CommandResponse`]. Events reach devices through the fanout hub, not
//! through the response.
//!
//! # Command Flow
//!
//! ```text
//! execute(cmd)
//!     ├─ 1. Idempotency check (command_id)
//!     ├─ 2. Role check
//!     ├─ 3. Dispatch to the owning component
//!     ├─ 4. State error? retry once against fresh state
//!     └─ 5. Record and return the response
//! ```
//!
//! # 幂等缓存
//!
//! 每个 `command_id` 的响应都会记录下来。超过 `command_cache_capacity`
//! 时，先清理超过 `command_cache_ttl` 的记录，再按时间淘汰最旧的。
//! 仍在执行中的命令不会被淘汰。

mod permission;

use crate::calls::CallCoordinator;
use crate::core::{SessionError, SessionResult};
use crate::fanout::{Subscription, Topic};
use crate::orders::OrderAggregator;
use crate::storage::StorageResult;
use crate::store::SessionStore;
use dashmap::DashMap;
use shared::models::OrderStatus;
use shared::{ActorRole, CommandPayload, CommandResponse, ResponseData, SessionCommand, SessionEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Response slot for one command id
#[derive(Debug)]
struct Processed {
    response: OnceCell<CommandResponse>,
    recorded_at: Instant,
}

impl Processed {
    fn new() -> Self {
        Self {
            response: OnceCell::new(),
            recorded_at: Instant::now(),
        }
    }
}

pub struct SessionGateway {
    store: Arc<SessionStore>,
    orders: Arc<OrderAggregator>,
    calls: Arc<CallCoordinator>,
    /// command_id -> recorded response
    processed: DashMap<String, Arc<Processed>>,
    cache_capacity: usize,
    cache_ttl: Duration,
}

impl std::fmt::Debug for SessionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGateway")
            .field("processed", &self.processed.len())
            .finish()
    }
}

impl SessionGateway {
    pub fn new(
        store: Arc<SessionStore>,
        orders: Arc<OrderAggregator>,
        calls: Arc<CallCoordinator>,
    ) -> Self {
        let policy = store.policy();
        let cache_capacity = policy.command_cache_capacity.max(1);
        let cache_ttl = policy.command_cache_ttl;
        Self {
            store,
            orders,
            calls,
            processed: DashMap::new(),
            cache_capacity,
            cache_ttl,
        }
    }

    /// Execute a command exactly once per `command_id`
    ///
    /// A redelivered command gets the recorded response with
    /// `duplicate = true`. Concurrent deliveries of the same id wait for the
    /// first one instead of running twice.
    pub async fn execute(&self, cmd: SessionCommand) -> CommandResponse {
        let slot = self
            .processed
            .entry(cmd.command_id.clone())
            .or_insert_with(|| Arc::new(Processed::new()))
            .value()
            .clone();

        let executed = AtomicBool::new(false);
        let response = slot
            .response
            .get_or_init(|| async {
                executed.store(true, Ordering::Relaxed);
                self.execute_once(&cmd).await
            })
            .await;

        if executed.load(Ordering::Relaxed) {
            self.trim_processed();
            response.clone()
        } else {
            tracing::debug!(command_id = %cmd.command_id, "Duplicate command, returning recorded response");
            CommandResponse::duplicate(response)
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.store.hub().subscribe(topic)
    }

    /// Committed events after `after_sequence`, for reconnecting devices
    pub fn replay(&self, session_id: &str, after_sequence: u64) -> StorageResult<Vec<SessionEvent>> {
        self.store.hub().replay(session_id, after_sequence)
    }

    /// Committed events at a location from `since_timestamp` on, for a
    /// location subscriber that lagged
    pub fn replay_location(
        &self,
        location_id: &str,
        since_timestamp: i64,
    ) -> StorageResult<Vec<SessionEvent>> {
        self.store.hub().replay_location(location_id, since_timestamp)
    }

    /// Number of recorded command responses
    pub fn recorded_commands(&self) -> usize {
        self.processed.len()
    }

    /// Keep the response cache within its capacity
    fn trim_processed(&self) {
        if self.processed.len() <= self.cache_capacity {
            return;
        }
        let before = self.processed.len();
        let ttl = self.cache_ttl;
        self.processed.retain(|_, slot| {
            !(slot.response.initialized() && slot.recorded_at.elapsed() > ttl)
        });

        let excess = self.processed.len().saturating_sub(self.cache_capacity);
        if excess > 0 {
            let mut finished: Vec<(Instant, String)> = self
                .processed
                .iter()
                .filter(|entry| entry.value().response.initialized())
                .map(|entry| (entry.value().recorded_at, entry.key().clone()))
                .collect();
            finished.sort();
            for (_, command_id) in finished.into_iter().take(excess) {
                self.processed.remove(&command_id);
            }
        }
        tracing::debug!(
            before,
            after = self.processed.len(),
            "Command response cache trimmed"
        );
    }

    async fn execute_once(&self, cmd: &SessionCommand) -> CommandResponse {
        let mut result = self.dispatch(cmd).await;
        if let Err(e) = &result
            && e.kind().is_retryable_state()
        {
            tracing::debug!(command_id = %cmd.command_id, error = %e, "State error, retrying once");
            result = self.dispatch(cmd).await;
        }

        match result {
            Ok(data) => CommandResponse::success(cmd.command_id.clone(), data),
            Err(e) => {
                tracing::warn!(
                    command_id = %cmd.command_id,
                    actor_id = %cmd.actor.id,
                    code = %e.code(),
                    error = %e,
                    "Command rejected"
                );
                CommandResponse::error(cmd.command_id.clone(), e.into())
            }
        }
    }

    async fn dispatch(&self, cmd: &SessionCommand) -> SessionResult<ResponseData> {
        let actor = &cmd.actor;
        match &cmd.payload {
            // ========== Session ==========
            CommandPayload::CheckIn {
                table_id,
                user_id,
                display_name,
            } => {
                // First check-in creates the session, later ones join it
                let session = match self.store.open_session(table_id) {
                    Ok(session) => session,
                    Err(SessionError::TableOccupied { session }) => *session,
                    Err(e) => return Err(e),
                };
                let participant =
                    self.store
                        .join(&session.id, user_id.clone(), display_name.as_deref())?;
                Ok(ResponseData::CheckedIn {
                    session,
                    participant,
                })
            }
            CommandPayload::OpenSession { table_id } => Ok(ResponseData::Session {
                session: self.store.open_session(table_id)?,
            }),
            CommandPayload::JoinSession {
                session_id,
                user_id,
                display_name,
            } => Ok(ResponseData::Participant {
                participant: self.store.join(
                    session_id,
                    user_id.clone(),
                    display_name.as_deref(),
                )?,
            }),
            CommandPayload::Rename {
                participant_id,
                display_name,
            } => {
                permission::require_self_or_floor_staff(actor, participant_id, "rename")?;
                Ok(ResponseData::Participant {
                    participant: self.store.rename(participant_id, display_name)?,
                })
            }
            CommandPayload::Leave { participant_id } => {
                permission::require_self_or_floor_staff(actor, participant_id, "leave")?;
                Ok(ResponseData::Participant {
                    participant: self.store.leave(participant_id)?,
                })
            }
            CommandPayload::CloseSession { session_id } => {
                permission::require_staff(actor, "close sessions")?;
                Ok(ResponseData::Session {
                    session: self.store.close_session(session_id)?,
                })
            }

            // ========== Cart / Orders ==========
            CommandPayload::AddItem {
                session_id,
                participant_id,
                item_id,
                quantity,
                note,
                customizations,
            } => {
                permission::require_self_or_floor_staff(actor, participant_id, "edit this cart")?;
                let cart = self.orders.get_or_create_cart(session_id, participant_id)?;
                let line = self
                    .orders
                    .add_line(&cart.id, item_id, *quantity, note.clone(), customizations)
                    .await?;
                let order = self.orders.order(&cart.id)?;
                Ok(ResponseData::Line { order, line })
            }
            CommandPayload::UpdateQuantity { line_id, quantity } => {
                let owner = self.orders.order_for_line(line_id)?.participant_id;
                permission::require_self_or_floor_staff(actor, &owner, "edit this cart")?;
                Ok(ResponseData::Order {
                    order: self.orders.update_quantity(line_id, *quantity)?,
                })
            }
            CommandPayload::RemoveLine { line_id } => {
                let owner = self.orders.order_for_line(line_id)?.participant_id;
                permission::require_self_or_floor_staff(actor, &owner, "edit this cart")?;
                Ok(ResponseData::Order {
                    order: self.orders.remove_line(line_id)?,
                })
            }
            CommandPayload::ConfirmOrder { order_id } => {
                let owner = self.orders.order(order_id)?.participant_id;
                permission::require_self_or_floor_staff(actor, &owner, "confirm this order")?;
                Ok(ResponseData::Order {
                    order: self.orders.confirm(order_id)?,
                })
            }
            CommandPayload::AdvanceOrder { order_id, target } => {
                permission::require_order_transition(actor, *target)?;
                Ok(ResponseData::Order {
                    order: self.orders.advance_status(order_id, *target)?,
                })
            }
            CommandPayload::CancelOrder { order_id, reason } => {
                let order = self.orders.order(order_id)?;
                permission::require_self_or_floor_staff(actor, &order.participant_id, "cancel this order")?;
                if actor.role == ActorRole::Diner && order.status != OrderStatus::Pending {
                    return Err(SessionError::PermissionDenied(
                        "diners can only cancel pending orders".to_string(),
                    ));
                }
                Ok(ResponseData::Order {
                    order: self.orders.cancel(order_id, reason.clone())?,
                })
            }
            CommandPayload::GroupSummary { session_id } => {
                if actor.role == ActorRole::Diner {
                    let participant = self.store.participant(&actor.id)?;
                    if participant.session_id != *session_id {
                        return Err(SessionError::ParticipantNotInSession {
                            participant_id: actor.id.clone(),
                            session_id: session_id.clone(),
                        });
                    }
                }
                Ok(ResponseData::Summary {
                    summary: self.orders.group_summary(session_id)?,
                })
            }

            // ========== Waiter calls ==========
            CommandPayload::CallWaiter {
                session_id,
                table_id,
                participant_id,
                kind,
                message,
            } => {
                permission::require_self_or_floor_staff(actor, participant_id, "call a waiter")?;
                Ok(ResponseData::WaiterCall {
                    call: self.calls.create(
                        session_id,
                        table_id,
                        participant_id,
                        *kind,
                        message.clone(),
                    )?,
                })
            }
            CommandPayload::AcknowledgeCall {
                call_id,
                eta_minutes,
            } => {
                permission::require_floor_staff(actor, "acknowledge calls")?;
                Ok(ResponseData::WaiterCall {
                    call: self.calls.acknowledge(call_id, &actor.id, *eta_minutes)?,
                })
            }
            CommandPayload::StartCall { call_id } => {
                permission::require_floor_staff(actor, "start calls")?;
                Ok(ResponseData::WaiterCall {
                    call: self.calls.start(call_id, &actor.id)?,
                })
            }
            CommandPayload::ResolveCall {
                call_id,
                resolution_note,
                satisfaction_score,
            } => {
                permission::require_floor_staff(actor, "resolve calls")?;
                Ok(ResponseData::WaiterCall {
                    call: self.calls.resolve(
                        call_id,
                        &actor.id,
                        resolution_note.clone(),
                        *satisfaction_score,
                    )?,
                })
            }
            CommandPayload::CancelCall { call_id, reason } => {
                let owner = self.calls.call(call_id)?.participant_id;
                permission::require_self_or_floor_staff(actor, &owner, "cancel this call")?;
                Ok(ResponseData::WaiterCall {
                    call: self.calls.cancel(call_id, reason.clone())?,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreState;
    use crate::orders::{CatalogItem, InMemoryCatalog};
    use rust_decimal::Decimal;
    use shared::models::{CallKind, DiningTable};
    use shared::{Actor, ConflictState, ErrorCode};

    fn state() -> CoreState {
        state_with(Default::default())
    }

    fn state_with(policy: crate::core::SessionPolicy) -> CoreState {
        let catalog = InMemoryCatalog::with_items([CatalogItem::new(
            "a",
            "Burger",
            Decimal::new(1000, 2),
        )]);
        let state = CoreState::in_memory(policy, Arc::new(catalog)).unwrap();
        state
            .store
            .register_table(DiningTable::new("t5", "loc", 5, 4))
            .unwrap();
        state
    }

    fn check_in(table_id: &str, name: &str) -> SessionCommand {
        SessionCommand::new(
            Actor::diner(""),
            CommandPayload::CheckIn {
                table_id: table_id.to_string(),
                user_id: None,
                display_name: Some(name.to_string()),
            },
        )
    }

    fn checked_in(resp: &CommandResponse) -> (String, String) {
        match &resp.data {
            Some(ResponseData::CheckedIn {
                session,
                participant,
            }) => (session.id.clone(), participant.id.clone()),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_check_in_opens_then_joins() {
        let state = state();
        let first = state.gateway.execute(check_in("t5", "Ana")).await;
        let second = state.gateway.execute(check_in("t5", "Bob")).await;
        let (s1, _) = checked_in(&first);
        let (s2, _) = checked_in(&second);
        assert_eq!(s1, s2);
        assert_eq!(state.store.participants(&s1).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_redelivered_command_runs_once() {
        let state = state();
        let cmd = check_in("t5", "Ana");
        let first = state.gateway.execute(cmd.clone()).await;
        let again = state.gateway.execute(cmd).await;

        assert!(first.success && !first.duplicate);
        assert!(again.duplicate);
        assert_eq!(again.data, first.data);
        let (session_id, _) = checked_in(&first);
        assert_eq!(state.store.participants(&session_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_response_cache_is_bounded() {
        let state = state_with(crate::core::SessionPolicy {
            command_cache_capacity: 2,
            ..Default::default()
        });
        let mut commands = Vec::new();
        for name in ["Ana", "Bob", "Cid", "Dee", "Eve"] {
            let cmd = check_in("t5", name);
            assert!(state.gateway.execute(cmd.clone()).await.success);
            assert!(state.gateway.recorded_commands() <= 2);
            commands.push(cmd);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // The newest response is still recorded, the oldest is gone
        let newest = commands.pop().unwrap();
        assert!(state.gateway.execute(newest).await.duplicate);
        let oldest = commands.remove(0);
        let rerun = state.gateway.execute(oldest).await;
        assert!(!rerun.duplicate);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_existing_session() {
        let state = state();
        let open = |role| {
            SessionCommand::new(
                Actor::staff("w1", role),
                CommandPayload::OpenSession {
                    table_id: "t5".to_string(),
                },
            )
        };
        let first = state.gateway.execute(open(ActorRole::Waiter)).await;
        let second = state.gateway.execute(open(ActorRole::Waiter)).await;

        assert_eq!(second.error_code(), Some(ErrorCode::TableOccupied));
        let Some(ResponseData::Session { session }) = first.data else {
            panic!("expected session");
        };
        assert_eq!(
            second.error.unwrap().conflict,
            Some(ConflictState::ActiveSession { session })
        );
    }

    #[tokio::test]
    async fn test_roles_are_enforced() {
        let state = state();
        let (session_id, ana) = checked_in(&state.gateway.execute(check_in("t5", "Ana")).await);
        let (_, bob) = checked_in(&state.gateway.execute(check_in("t5", "Bob")).await);

        // Bob cannot fill Ana's cart
        let resp = state
            .gateway
            .execute(SessionCommand::new(
                Actor::diner(bob.clone()),
                CommandPayload::AddItem {
                    session_id: session_id.clone(),
                    participant_id: ana.clone(),
                    item_id: "a".to_string(),
                    quantity: 1,
                    note: None,
                    customizations: vec![],
                },
            ))
            .await;
        assert_eq!(resp.error_code(), Some(ErrorCode::PermissionDenied));

        // Diners cannot close the session
        let resp = state
            .gateway
            .execute(SessionCommand::new(
                Actor::diner(ana.clone()),
                CommandPayload::CloseSession {
                    session_id: session_id.clone(),
                },
            ))
            .await;
        assert_eq!(resp.error_code(), Some(ErrorCode::PermissionDenied));

        // Kitchen cannot acknowledge calls
        let call = state
            .gateway
            .execute(SessionCommand::new(
                Actor::diner(ana.clone()),
                CommandPayload::CallWaiter {
                    session_id: session_id.clone(),
                    table_id: "t5".to_string(),
                    participant_id: ana,
                    kind: CallKind::Assistance,
                    message: None,
                },
            ))
            .await;
        let Some(ResponseData::WaiterCall { call }) = call.data else {
            panic!("expected call");
        };
        let resp = state
            .gateway
            .execute(SessionCommand::new(
                Actor::staff("k1", ActorRole::Kitchen),
                CommandPayload::AcknowledgeCall {
                    call_id: call.id,
                    eta_minutes: None,
                },
            ))
            .await;
        assert_eq!(resp.error_code(), Some(ErrorCode::PermissionDenied));
    }

    #[tokio::test]
    async fn test_add_item_returns_order_with_totals() {
        let state = state();
        let (session_id, ana) = checked_in(&state.gateway.execute(check_in("t5", "Ana")).await);
        let resp = state
            .gateway
            .execute(SessionCommand::new(
                Actor::diner(ana.clone()),
                CommandPayload::AddItem {
                    session_id,
                    participant_id: ana,
                    item_id: "a".to_string(),
                    quantity: 2,
                    note: None,
                    customizations: vec![],
                },
            ))
            .await;
        let Some(ResponseData::Line { order, line }) = resp.data else {
            panic!("expected line, got {:?}", resp.error);
        };
        assert_eq!(line.quantity, 2);
        assert_eq!(order.total, Decimal::new(2200, 2));
    }
}
