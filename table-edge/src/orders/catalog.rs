//! Catalog collaborator
//!
//! The core only reads prices and availability. Prices are snapshotted onto
//! the line when it is added and never refreshed.

use crate::core::{SessionError, SessionResult};
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::models::SelectedCustomization;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomizationOption {
    pub id: String,
    pub name: String,
    pub price_modifier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub is_available: bool,
    #[serde(default)]
    pub customization_options: Vec<CustomizationOption>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Decimal) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            is_available: true,
            customization_options: Vec::new(),
        }
    }

    pub fn with_option(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        price_modifier: Decimal,
    ) -> Self {
        self.customization_options.push(CustomizationOption {
            id: id.into(),
            name: name.into(),
            price_modifier,
        });
        self
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog item not found: {0}")]
    NotFound(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Read-only price / availability lookup
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn get_item(&self, item_id: &str) -> Result<CatalogItem, CatalogError>;
}

/// DashMap-backed catalog for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: DashMap<String, CatalogItem>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let catalog = Self::new();
        for item in items {
            catalog.upsert(item);
        }
        catalog
    }

    pub fn upsert(&self, item: CatalogItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn set_available(&self, item_id: &str, is_available: bool) -> bool {
        match self.items.get_mut(item_id) {
            Some(mut item) => {
                item.is_available = is_available;
                true
            }
            None => false,
        }
    }

    pub fn set_price(&self, item_id: &str, price: Decimal) -> bool {
        match self.items.get_mut(item_id) {
            Some(mut item) => {
                item.price = price;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, item_id: &str) -> Option<CatalogItem> {
        self.items.remove(item_id).map(|(_, item)| item)
    }
}

#[async_trait]
impl CatalogLookup for InMemoryCatalog {
    async fn get_item(&self, item_id: &str) -> Result<CatalogItem, CatalogError> {
        self.items
            .get(item_id)
            .map(|item| item.value().clone())
            .ok_or_else(|| CatalogError::NotFound(item_id.to_string()))
    }
}

/// Look up an item, retrying `Unavailable` with exponential backoff
///
/// `NotFound` is final and maps to `ItemNotFound`; exhausting the attempts
/// maps to `CollaboratorUnavailable`.
pub(crate) async fn fetch_with_retry(
    catalog: &dyn CatalogLookup,
    item_id: &str,
    max_attempts: u32,
    base_backoff: Duration,
) -> SessionResult<CatalogItem> {
    let attempts = max_attempts.max(1);
    let mut backoff = base_backoff;
    for attempt in 1..=attempts {
        match catalog.get_item(item_id).await {
            Ok(item) => return Ok(item),
            Err(CatalogError::NotFound(_)) => {
                return Err(SessionError::ItemNotFound(item_id.to_string()));
            }
            Err(CatalogError::Unavailable(reason)) => {
                tracing::warn!(item_id, attempt, attempts, reason = %reason, "Catalog lookup failed");
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }
    Err(SessionError::CollaboratorUnavailable(format!(
        "catalog lookup for {item_id} failed after {attempts} attempts"
    )))
}

/// Resolve requested customization ids against the item's options
pub(crate) fn select_customizations(
    item: &CatalogItem,
    requested: &[String],
) -> SessionResult<Vec<SelectedCustomization>> {
    requested
        .iter()
        .map(|id| {
            item.customization_options
                .iter()
                .find(|o| o.id == *id)
                .map(|o| SelectedCustomization {
                    id: o.id.clone(),
                    name: o.name.clone(),
                    price_modifier: o.price_modifier,
                })
                .ok_or_else(|| SessionError::InvalidCustomization {
                    item_id: item.id.clone(),
                    customization_id: id.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyCatalog {
        inner: InMemoryCatalog,
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CatalogLookup for FlakyCatalog {
        async fn get_item(&self, item_id: &str) -> Result<CatalogItem, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(CatalogError::Unavailable("timeout".to_string()));
            }
            self.inner.get_item(item_id).await
        }
    }

    fn flaky(failures: u32) -> FlakyCatalog {
        FlakyCatalog {
            inner: InMemoryCatalog::with_items([CatalogItem::new("a", "Burger", Decimal::TEN)]),
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let catalog = flaky(2);
        let item = fetch_with_retry(&catalog, "a", 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(item.name, "Burger");
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let catalog = flaky(5);
        let err = fetch_with_retry(&catalog, "a", 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CollaboratorUnavailable(_)));
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let catalog = flaky(0);
        let err = fetch_with_retry(&catalog, "missing", 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ItemNotFound(_)));
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_select_customizations() {
        let item = CatalogItem::new("a", "Burger", Decimal::TEN)
            .with_option("cheese", "Cheese", Decimal::ONE);
        let selected = select_customizations(&item, &["cheese".to_string()]).unwrap();
        assert_eq!(selected[0].price_modifier, Decimal::ONE);

        let err = select_customizations(&item, &["bacon".to_string()]).unwrap_err();
        assert!(matches!(err, SessionError::InvalidCustomization { .. }));
    }
}
