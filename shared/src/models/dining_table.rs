//! Dining Table Model

use serde::{Deserialize, Serialize};

/// Physical table slot at a location
///
/// Owned by the location's management collaborator; only `capacity` and
/// `is_active` change after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiningTable {
    pub id: String,
    pub location_id: String,
    /// Number shown on the table card
    pub number: u32,
    pub capacity: u32,
    pub is_active: bool,
}

impl DiningTable {
    pub fn new(id: impl Into<String>, location_id: impl Into<String>, number: u32, capacity: u32) -> Self {
        Self {
            id: id.into(),
            location_id: location_id.into(),
            number,
            capacity,
            is_active: true,
        }
    }
}

/// Update dining table payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiningTableUpdate {
    pub capacity: Option<u32>,
    pub is_active: Option<bool>,
}
