//! Gateway command envelope and responses
//!
//! Every external request reaches the core as a [`SessionCommand`]; the
//! gateway answers with a [`CommandResponse`]. `command_id` makes retries
//! from flaky devices idempotent.

use crate::error::{ErrorCode, ErrorKind};
use crate::models::{
    CallKind, GroupSummary, Order, OrderLine, OrderStatus, Participant, Session, WaiterCall,
};
use serde::{Deserialize, Serialize};

/// Who is issuing a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Diner,
    Waiter,
    Kitchen,
    Manager,
}

impl ActorRole {
    pub fn is_staff(&self) -> bool {
        !matches!(self, ActorRole::Diner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Participant id for diners, staff id otherwise
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn diner(participant_id: impl Into<String>) -> Self {
        Self {
            id: participant_id.into(),
            role: ActorRole::Diner,
        }
    }

    pub fn staff(staff_id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: staff_id.into(),
            role,
        }
    }
}

/// Command envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommand {
    pub command_id: String,
    pub actor: Actor,
    /// Client timestamp (Unix milliseconds), informational only
    pub timestamp: i64,
    pub payload: CommandPayload,
}

impl SessionCommand {
    pub fn new(actor: Actor, payload: CommandPayload) -> Self {
        Self {
            command_id: uuid::Uuid::new_v4().to_string(),
            actor,
            timestamp: crate::util::now_millis(),
            payload,
        }
    }
}

/// Command payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPayload {
    // ========== Session ==========
    /// Open the table's session if free, otherwise join the active one
    CheckIn {
        table_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    OpenSession {
        table_id: String,
    },
    JoinSession {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    Rename {
        participant_id: String,
        display_name: String,
    },
    Leave {
        participant_id: String,
    },
    CloseSession {
        session_id: String,
    },

    // ========== Cart / Orders ==========
    /// Adds to the participant's cart, creating it when needed
    AddItem {
        session_id: String,
        participant_id: String,
        item_id: String,
        quantity: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        #[serde(default)]
        customizations: Vec<String>,
    },
    UpdateQuantity {
        line_id: String,
        quantity: i32,
    },
    RemoveLine {
        line_id: String,
    },
    ConfirmOrder {
        order_id: String,
    },
    AdvanceOrder {
        order_id: String,
        target: OrderStatus,
    },
    CancelOrder {
        order_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    GroupSummary {
        session_id: String,
    },

    // ========== Waiter calls ==========
    CallWaiter {
        session_id: String,
        table_id: String,
        participant_id: String,
        kind: CallKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    AcknowledgeCall {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_minutes: Option<u32>,
    },
    StartCall {
        call_id: String,
    },
    ResolveCall {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution_note: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        satisfaction_score: Option<u8>,
    },
    CancelCall {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Successful command result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    Session { session: Session },
    /// Result of a check-in: the session plus the new participant
    CheckedIn {
        session: Session,
        participant: Participant,
    },
    Participant { participant: Participant },
    Order { order: Order },
    Line { order: Order, line: OrderLine },
    Summary { summary: GroupSummary },
    WaiterCall { call: WaiterCall },
    Empty,
}

/// Existing state a conflict refers to, so the caller can show it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictState {
    ActiveSession {
        session: Session,
    },
    ActiveCall {
        call: WaiterCall,
    },
    Name {
        requested: String,
        suggestion: String,
    },
}

/// Command error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictState>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: code.kind(),
            message: message.into(),
            conflict: None,
        }
    }

    pub fn with_conflict(mut self, conflict: ConflictState) -> Self {
        self.conflict = Some(conflict);
        self
    }
}

/// Command response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub success: bool,
    /// Set when the command id was already processed; the body is the
    /// original response.
    #[serde(default)]
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandResponse {
    pub fn success(command_id: String, data: ResponseData) -> Self {
        Self {
            command_id,
            success: true,
            duplicate: false,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(command_id: String, error: CommandError) -> Self {
        Self {
            command_id,
            success: false,
            duplicate: false,
            data: None,
            error: Some(error),
        }
    }

    /// Replay of a previously recorded response
    pub fn duplicate(original: &CommandResponse) -> Self {
        Self {
            duplicate: true,
            ..original.clone()
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}
