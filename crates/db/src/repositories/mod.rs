use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use ordersync_core::domain::chat::ConversationId;
use ordersync_core::domain::order::{CheckoutOrder, HistoryEntry, OrderAmendment, OrderId};
use ordersync_core::domain::product::{Product, ProductUid};
use ordersync_core::domain::status::OrderStatus;

pub mod memory;
pub mod order;
pub mod product;
pub mod snapshot;
pub mod watermark;

pub use memory::{
    InMemoryOrderRepository, InMemoryProductRepository, InMemorySnapshotRepository,
    InMemoryWatermarkRepository,
};
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;
pub use snapshot::{OrderSnapshot, SqlSnapshotRepository};
pub use watermark::SqlWatermarkRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("order `{0}` not found")]
    OrderNotFound(OrderId),
}

/// Position in the discovery order, `(created_at, id)` of the last order seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryCursor {
    pub created_at: DateTime<Utc>,
    pub id: OrderId,
}

impl DiscoveryCursor {
    pub fn after(order: &CheckoutOrder) -> Self {
        Self { created_at: order.created_at, id: order.id }
    }

    fn precedes(&self, order: &CheckoutOrder) -> bool {
        (self.created_at, self.id.0) < (order.created_at, order.id.0)
    }
}

/// Relational store for checkout orders and their line items.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Orders without an external id, oldest first, starting past `after`.
    async fn list_unsynced(
        &self,
        after: Option<&DiscoveryCursor>,
        limit: u32,
    ) -> Result<Vec<CheckoutOrder>, RepositoryError>;

    async fn find_by_id(&self, id: OrderId) -> Result<Option<CheckoutOrder>, RepositoryError>;

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CheckoutOrder>, RepositoryError>;

    /// Inserts or replaces an order together with its line items.
    async fn save(&self, order: CheckoutOrder) -> Result<(), RepositoryError>;

    /// Stamps the external id when none is set yet. Returns `false` when the
    /// order already carried one, in which case nothing is written.
    async fn set_external_id(
        &self,
        id: OrderId,
        external_id: &str,
        tracking_reference: Option<&str>,
    ) -> Result<bool, RepositoryError>;

    async fn set_deal_id(&self, id: OrderId, deal_id: &str) -> Result<(), RepositoryError>;

    async fn clear_tracking_reference(&self, id: OrderId) -> Result<(), RepositoryError>;

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), RepositoryError>;

    /// Persists resolved CRM product ids keyed by line item id.
    async fn update_line_item_external_ids(
        &self,
        id: OrderId,
        resolved: &[(i64, String)],
    ) -> Result<(), RepositoryError>;

    async fn mark_sync_incomplete(&self, id: OrderId, note: &str) -> Result<(), RepositoryError>;

    /// Replaces items, aggregates and appends the history row atomically.
    async fn apply_amendment(&self, amendment: OrderAmendment) -> Result<(), RepositoryError>;

    async fn list_history(&self, id: OrderId) -> Result<Vec<HistoryEntry>, RepositoryError>;
}

/// Mapping of internal product UIDs to CRM product ids.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_uid(&self, uid: &ProductUid) -> Result<Option<Product>, RepositoryError>;

    async fn save(&self, product: Product) -> Result<(), RepositoryError>;

    /// Returns the CRM ids of every mapped UID in `uids`; unmapped UIDs are
    /// absent from the result.
    async fn resolve_external_ids(
        &self,
        uids: &[ProductUid],
    ) -> Result<HashMap<ProductUid, String>, RepositoryError>;
}

/// Append-only versions of amended orders.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Stores the order as the next version and returns that version.
    async fn append_version(&self, order: &CheckoutOrder) -> Result<u32, RepositoryError>;

    async fn list_versions(&self, id: OrderId) -> Result<Vec<OrderSnapshot>, RepositoryError>;
}

/// Per-conversation timestamp of the last relayed chat message.
#[async_trait]
pub trait WatermarkRepository: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<ConversationId, DateTime<Utc>>, RepositoryError>;

    async fn save(
        &self,
        conversation: &ConversationId,
        last_message_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
