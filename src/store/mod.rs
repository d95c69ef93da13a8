//! External Order Store — the durable order/fill key-value store treated as
//! an external collaborator (§1, §6, §4.12).
//!
//! Durability semantics are out of scope (§1); this module defines the
//! trait boundary plus two implementations: [`InMemoryOrderStore`] (the
//! facade's default, and what tests use) and [`SqliteOrderStore`] (a
//! reference backing store generalized from the teacher's
//! `storage::SqliteStorage`, for integration tests that want a real store
//! without inventing a new dependency).

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryOrderStore;
pub use sqlite::{SqliteOrderStore, SqliteOrderStoreConfig};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ExchangeOrderId, Order, OrderId};

/// Store-layer errors, distinct from `CoreError` since this is an external
/// collaborator's boundary (§1), not a core session error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("decimal parse error: {0}")]
    Decimal(String),
}

/// The four operations the Execution Reconciler and Adapter Facade need
/// from the durable order/fill store (§6): `add`, `update`, `get_by_id`,
/// `get_all`, `get_client_order_id_by_exchange`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn add(&self, order: &Order) -> Result<(), StoreError>;
    async fn update(&self, order: &Order) -> Result<(), StoreError>;
    async fn get_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;
    async fn get_all(&self) -> Result<Vec<Order>, StoreError>;
    /// Resolves a venue-assigned id back to our client_order_id, used by
    /// Execution Reconciler lookup strategy 2 (§4.8).
    async fn get_client_order_id_by_exchange(
        &self,
        exchange_id: &ExchangeOrderId,
    ) -> Result<Option<OrderId>, StoreError>;
}
