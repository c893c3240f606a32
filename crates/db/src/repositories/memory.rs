use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use ordersync_core::domain::chat::ConversationId;
use ordersync_core::domain::order::{CheckoutOrder, HistoryEntry, OrderAmendment, OrderId};
use ordersync_core::domain::product::{Product, ProductUid};
use ordersync_core::domain::status::OrderStatus;

use super::{
    DiscoveryCursor, OrderRepository, OrderSnapshot, ProductRepository, RepositoryError,
    SnapshotRepository, WatermarkRepository,
};

#[derive(Default)]
struct OrderStore {
    orders: HashMap<i64, CheckoutOrder>,
    history: Vec<HistoryEntry>,
    last_item_id: i64,
}

impl OrderStore {
    fn order_mut(&mut self, id: OrderId) -> Result<&mut CheckoutOrder, RepositoryError> {
        self.orders.get_mut(&id.0).ok_or(RepositoryError::OrderNotFound(id))
    }

    /// New lines and repeats of an id already on the order get a fresh id.
    fn assign_item_ids(&mut self, order: &mut CheckoutOrder) {
        for item in &mut order.items {
            if item.id > 0 {
                self.last_item_id = self.last_item_id.max(item.id);
            }
        }
        let mut kept = HashSet::new();
        for item in &mut order.items {
            if item.id <= 0 || !kept.insert(item.id) {
                self.last_item_id += 1;
                item.id = self.last_item_id;
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    store: RwLock<OrderStore>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn list_unsynced(
        &self,
        after: Option<&DiscoveryCursor>,
        limit: u32,
    ) -> Result<Vec<CheckoutOrder>, RepositoryError> {
        let store = self.store.read().await;
        let mut pending: Vec<CheckoutOrder> = store
            .orders
            .values()
            .filter(|order| !order.is_synced())
            .filter(|order| after.map_or(true, |cursor| cursor.precedes(order)))
            .cloned()
            .collect();
        pending.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then(left.id.cmp(&right.id))
        });
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<CheckoutOrder>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.orders.get(&id.0).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CheckoutOrder>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .orders
            .values()
            .filter(|order| order.external_id.as_deref() == Some(external_id))
            .min_by_key(|order| order.id)
            .cloned())
    }

    async fn save(&self, mut order: CheckoutOrder) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        store.assign_item_ids(&mut order);
        store.orders.insert(order.id.0, order);
        Ok(())
    }

    async fn set_external_id(
        &self,
        id: OrderId,
        external_id: &str,
        tracking_reference: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut store = self.store.write().await;
        let order = store.order_mut(id)?;
        if order.is_synced() {
            return Ok(false);
        }
        order.external_id = Some(external_id.to_string());
        order.tracking_reference = tracking_reference.map(str::to_string);
        Ok(true)
    }

    async fn set_deal_id(&self, id: OrderId, deal_id: &str) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        store.order_mut(id)?.deal_id = Some(deal_id.to_string());
        Ok(())
    }

    async fn clear_tracking_reference(&self, id: OrderId) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        store.order_mut(id)?.tracking_reference = None;
        Ok(())
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        store.order_mut(id)?.status = status;
        Ok(())
    }

    async fn update_line_item_external_ids(
        &self,
        id: OrderId,
        resolved: &[(i64, String)],
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let order = store.order_mut(id)?;
        for (item_id, external_id) in resolved {
            if let Some(item) = order.items.iter_mut().find(|item| item.id == *item_id) {
                item.external_product_id = external_id.clone();
            }
        }
        Ok(())
    }

    async fn mark_sync_incomplete(&self, id: OrderId, note: &str) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        store.order_mut(id)?.sync_note = Some(note.to_string());
        Ok(())
    }

    async fn apply_amendment(&self, amendment: OrderAmendment) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let mut updated = store.order_mut(amendment.order_id)?.clone();
        updated.items = amendment.items;
        updated.totals = amendment.totals;
        store.assign_item_ids(&mut updated);
        store.orders.insert(updated.id.0, updated);
        store.history.push(amendment.history);
        Ok(())
    }

    async fn list_history(&self, id: OrderId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.history.iter().filter(|entry| entry.order_id == id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<ProductUid, Product>>,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_uid(&self, uid: &ProductUid) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.get(uid).cloned())
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        products.insert(product.uid.clone(), product);
        Ok(())
    }

    async fn resolve_external_ids(
        &self,
        uids: &[ProductUid],
    ) -> Result<HashMap<ProductUid, String>, RepositoryError> {
        let products = self.products.read().await;
        Ok(uids
            .iter()
            .filter_map(|uid| products.get(uid))
            .filter(|product| product.is_mapped())
            .filter_map(|product| {
                product.external_id.clone().map(|external_id| (product.uid.clone(), external_id))
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemorySnapshotRepository {
    snapshots: RwLock<Vec<OrderSnapshot>>,
}

#[async_trait::async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn append_version(&self, order: &CheckoutOrder) -> Result<u32, RepositoryError> {
        let payload = serde_json::to_value(order)
            .map_err(|error| RepositoryError::Decode(format!("order snapshot: {error}")))?;
        let mut snapshots = self.snapshots.write().await;
        let version = snapshots
            .iter()
            .filter(|snapshot| snapshot.order_id == order.id)
            .map(|snapshot| snapshot.version)
            .max()
            .unwrap_or(0)
            + 1;
        snapshots.push(OrderSnapshot {
            order_id: order.id,
            version,
            payload,
            created_at: Utc::now(),
        });
        Ok(version)
    }

    async fn list_versions(&self, id: OrderId) -> Result<Vec<OrderSnapshot>, RepositoryError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.iter().filter(|snapshot| snapshot.order_id == id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryWatermarkRepository {
    watermarks: RwLock<HashMap<ConversationId, DateTime<Utc>>>,
}

#[async_trait::async_trait]
impl WatermarkRepository for InMemoryWatermarkRepository {
    async fn load_all(&self) -> Result<HashMap<ConversationId, DateTime<Utc>>, RepositoryError> {
        let watermarks = self.watermarks.read().await;
        Ok(watermarks.clone())
    }

    async fn save(
        &self,
        conversation: &ConversationId,
        last_message_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut watermarks = self.watermarks.write().await;
        watermarks.insert(conversation.clone(), last_message_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use ordersync_core::domain::order::{
        CheckoutOrder, HistoryEntry, LineItem, OrderAmendment, OrderId, OrderTotals,
    };
    use ordersync_core::domain::product::{Product, ProductUid};
    use ordersync_core::domain::status::OrderStatus;

    use crate::repositories::{
        InMemoryOrderRepository, InMemoryProductRepository, InMemorySnapshotRepository,
        OrderRepository, ProductRepository, SnapshotRepository,
    };

    fn order(id: i64, minutes_ago: i64) -> CheckoutOrder {
        CheckoutOrder {
            id: OrderId(id),
            client_ref: format!("client-{id}"),
            items: vec![LineItem {
                uid: "uid-1".to_string(),
                quantity: 1,
                price: Decimal::new(1_000, 2),
                total: Decimal::new(1_000, 2),
                ..LineItem::default()
            }],
            client: None,
            totals: OrderTotals::default(),
            currency: "PLN".to_string(),
            status: OrderStatus::New,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            external_id: None,
            deal_id: None,
            tracking_reference: None,
            source: "shop".to_string(),
            comment: String::new(),
            sync_note: None,
        }
    }

    #[tokio::test]
    async fn in_memory_order_repo_round_trip_assigns_item_ids() {
        let repo = InMemoryOrderRepository::default();
        repo.save(order(1, 0)).await.expect("save order");

        let found = repo.find_by_id(OrderId(1)).await.expect("find").expect("present");
        assert_eq!(found.items[0].id, 1);
    }

    #[tokio::test]
    async fn in_memory_discovery_matches_sql_semantics() {
        let repo = InMemoryOrderRepository::default();
        repo.save(order(1, 5)).await.expect("save 1");
        repo.save(order(2, 10)).await.expect("save 2");
        repo.save(order(3, 20)).await.expect("save 3");
        assert!(repo.set_external_id(OrderId(3), "ext-3", None).await.expect("stamp"));
        assert!(!repo.set_external_id(OrderId(3), "ext-other", None).await.expect("restamp"));

        let ids: Vec<i64> =
            repo.list_unsynced(None, 10).await.expect("list").iter().map(|order| order.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(
            repo.find_by_external_id("ext-3").await.expect("find").map(|order| order.id),
            Some(OrderId(3))
        );
    }

    #[tokio::test]
    async fn in_memory_amendment_appends_history() {
        let repo = InMemoryOrderRepository::default();
        repo.save(order(1, 0)).await.expect("save");

        repo.apply_amendment(OrderAmendment {
            order_id: OrderId(1),
            items: vec![],
            totals: OrderTotals { total: Decimal::new(500, 2), ..OrderTotals::default() },
            history: HistoryEntry {
                order_id: OrderId(1),
                event: "crm_amendment".to_string(),
                message: "emptied".to_string(),
                created_at: Utc::now(),
            },
        })
        .await
        .expect("apply");

        let found = repo.find_by_id(OrderId(1)).await.expect("find").expect("present");
        assert!(found.items.is_empty());
        assert_eq!(found.totals.total, Decimal::new(500, 2));
        assert_eq!(repo.list_history(OrderId(1)).await.expect("history").len(), 1);
        assert!(repo.apply_amendment(OrderAmendment {
            order_id: OrderId(2),
            items: vec![],
            totals: OrderTotals::default(),
            history: HistoryEntry {
                order_id: OrderId(2),
                event: "crm_amendment".to_string(),
                message: String::new(),
                created_at: Utc::now(),
            },
        })
        .await
        .is_err());
    }

    #[tokio::test]
    async fn in_memory_product_and_snapshot_repos() {
        let products = InMemoryProductRepository::default();
        products
            .save(Product {
                uid: ProductUid("uid-1".to_string()),
                name: "Mug".to_string(),
                external_id: Some("crm-1".to_string()),
            })
            .await
            .expect("save product");
        let resolved = products
            .resolve_external_ids(&[ProductUid("uid-1".to_string()), ProductUid("uid-2".to_string())])
            .await
            .expect("resolve");
        assert_eq!(resolved.len(), 1);

        let snapshots = InMemorySnapshotRepository::default();
        assert_eq!(snapshots.append_version(&order(1, 0)).await.expect("v1"), 1);
        assert_eq!(snapshots.append_version(&order(1, 0)).await.expect("v2"), 2);
        assert_eq!(snapshots.list_versions(OrderId(1)).await.expect("list").len(), 2);
    }
}
