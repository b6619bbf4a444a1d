//! Role checks for gateway commands
//!
//! | Action | Diner | Kitchen | Waiter / Manager |
//! |--------|-------|---------|------------------|
//! | own participant / cart / call | yes | - | yes |
//! | close session | no | yes | yes |
//! | advance order | no | preparing, ready | any |
//! | handle waiter call | no | no | yes |

use crate::core::{SessionError, SessionResult};
use shared::models::OrderStatus;
use shared::{Actor, ActorRole};

fn denied(actor: &Actor, action: &str) -> SessionError {
    tracing::warn!(actor_id = %actor.id, role = ?actor.role, action, "Permission denied");
    SessionError::PermissionDenied(format!("{:?} cannot {action}", actor.role))
}

pub fn require_staff(actor: &Actor, action: &str) -> SessionResult<()> {
    if actor.role.is_staff() {
        Ok(())
    } else {
        Err(denied(actor, action))
    }
}

/// Waiters and managers
pub fn require_floor_staff(actor: &Actor, action: &str) -> SessionResult<()> {
    match actor.role {
        ActorRole::Waiter | ActorRole::Manager => Ok(()),
        _ => Err(denied(actor, action)),
    }
}

/// Diners may only act as themselves; floor staff may act for anyone
pub fn require_self_or_floor_staff(
    actor: &Actor,
    participant_id: &str,
    action: &str,
) -> SessionResult<()> {
    match actor.role {
        ActorRole::Waiter | ActorRole::Manager => Ok(()),
        ActorRole::Diner if actor.id == participant_id => Ok(()),
        _ => Err(denied(actor, action)),
    }
}

pub fn require_order_transition(actor: &Actor, target: OrderStatus) -> SessionResult<()> {
    let allowed = match actor.role {
        ActorRole::Diner => false,
        ActorRole::Kitchen => matches!(target, OrderStatus::Preparing | OrderStatus::Ready),
        ActorRole::Waiter | ActorRole::Manager => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(denied(actor, &format!("move orders to {target}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kitchen_transitions() {
        let kitchen = Actor::staff("k1", ActorRole::Kitchen);
        assert!(require_order_transition(&kitchen, OrderStatus::Preparing).is_ok());
        assert!(require_order_transition(&kitchen, OrderStatus::Ready).is_ok());
        assert!(require_order_transition(&kitchen, OrderStatus::Delivered).is_err());
        assert!(require_order_transition(&Actor::diner("p1"), OrderStatus::Confirmed).is_err());
    }

    #[test]
    fn test_diner_acts_only_as_self() {
        let diner = Actor::diner("p1");
        assert!(require_self_or_floor_staff(&diner, "p1", "edit").is_ok());
        assert!(matches!(
            require_self_or_floor_staff(&diner, "p2", "edit"),
            Err(SessionError::PermissionDenied(_))
        ));
        let waiter = Actor::staff("w1", ActorRole::Waiter);
        assert!(require_self_or_floor_staff(&waiter, "p2", "edit").is_ok());
        assert!(require_floor_staff(&Actor::staff("k1", ActorRole::Kitchen), "ack").is_err());
    }
}
