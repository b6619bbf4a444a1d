#![allow(dead_code)]

use rust_decimal::Decimal;
use shared::models::DiningTable;
use std::sync::Arc;
use table_edge::{CatalogItem, CoreState, InMemoryCatalog, SessionPolicy};

pub const LOCATION: &str = "loc-1";

/// Burger 10.00, Soda 2.50 (+0.50 lemon), Salad 7.35
pub fn menu() -> Arc<InMemoryCatalog> {
    Arc::new(InMemoryCatalog::with_items([
        CatalogItem::new("burger", "Burger", Decimal::new(1000, 2)),
        CatalogItem::new("soda", "Soda", Decimal::new(250, 2)).with_option(
            "lemon",
            "Lemon",
            Decimal::new(50, 2),
        ),
        CatalogItem::new("salad", "Salad", Decimal::new(735, 2)),
    ]))
}

/// In-memory core with tables 1..=10 registered at [`LOCATION`]
pub fn core_with(policy: SessionPolicy) -> CoreState {
    let state = CoreState::in_memory(policy, menu()).unwrap();
    for number in 1..=10 {
        state
            .store
            .register_table(DiningTable::new(format!("t{number}"), LOCATION, number, 4))
            .unwrap();
    }
    state
}

pub fn core() -> CoreState {
    core_with(SessionPolicy::default())
}
