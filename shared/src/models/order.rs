//! Order Models
//!
//! Money is carried as [`Decimal`] (serialized as string) so totals survive
//! the wire without float drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status
///
/// ```text
/// pending → confirmed → preparing → ready → delivered
///    └──────────┴───────────┴─────────┴──→ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// The participant's open cart
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Position along the forward path; `None` for `Cancelled`
    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Preparing => Some(2),
            OrderStatus::Ready => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Monotonic forward moves (stages may be skipped) plus cancellation
    /// from any non-terminal state.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), target.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customization chosen for a line, price modifier snapshotted at add time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedCustomization {
    pub id: String,
    pub name: String,
    pub price_modifier: Decimal,
}

/// One catalog item entry within an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: String,
    pub order_id: String,
    pub item_id: String,
    /// Item name snapshot
    pub name: String,
    pub quantity: i32,
    /// Catalog price at add time; never refreshed
    pub unit_price: Decimal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customizations: Vec<SelectedCustomization>,
    /// Always derived from quantity, unit price and modifiers
    pub line_total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One participant's cart or ticket within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub session_id: String,
    pub participant_id: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Order {
    pub fn line(&self, line_id: &str) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn is_cart(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

/// Per-participant share of a session bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantShare {
    pub participant_id: String,
    pub display_name: String,
    pub order_count: usize,
    pub subtotal: Decimal,
    pub tax: Decimal,
    /// Amount owed by this participant
    pub owed: Decimal,
}

/// Read-side projection of everything ordered at a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub session_id: String,
    pub participants: Vec<ParticipantShare>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
}
