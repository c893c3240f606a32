//! CRM amendment callbacks applied to local orders.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ordersync_core::config::{CrmConfig, SyncConfig};
use ordersync_core::domain::order::{
    CheckoutOrder, HistoryEntry, LineItem, OrderAmendment, OrderId, OrderTotals,
};
use ordersync_core::domain::status::OrderStatus;
use ordersync_core::finance::{recalc_with_discount, round_money, tax_rate};
use ordersync_db::repositories::{OrderRepository, SnapshotRepository};

use crate::errors::SyncError;

pub const AMENDMENT_EVENT: &str = "crm_amendment";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmendedItem {
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    /// Discount amount on the line; `total` wins when the two disagree.
    #[serde(default)]
    pub discount: Decimal,
    /// Line value after the CRM-side discount.
    pub total: Decimal,
}

impl AmendedItem {
    fn full_value(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    /// Difference between the reported discount and the one implied by
    /// `total`. `None` when no discount was reported or the two agree.
    fn discount_mismatch(&self) -> Option<Decimal> {
        if self.discount.is_zero() {
            return None;
        }
        let implied = self.full_value() - self.total;
        let mismatch = self.discount - implied;
        (mismatch.abs() > Decimal::new(1, 2)).then_some(mismatch)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmendmentEvent {
    pub external_id: String,
    #[serde(default)]
    pub items: Vec<AmendedItem>,
    #[serde(default)]
    pub currency: Option<String>,
    pub grand_total: Decimal,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WebhookSettings {
    pub shipping_product_id: String,
    pub lookup_attempts: u32,
    pub lookup_delay: Duration,
}

impl WebhookSettings {
    pub fn from_config(crm: &CrmConfig, sync: &SyncConfig) -> Self {
        Self {
            shipping_product_id: crm.shipping_product_id.clone(),
            lookup_attempts: sync.webhook_lookup_attempts.max(1),
            lookup_delay: sync.webhook_lookup_delay(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The callback echoed our own push; only the tracking marker was cleared.
    EchoCleared { order_id: OrderId },
    /// `version` is `None` when the snapshot could not be written.
    Applied { order_id: OrderId, version: Option<u32> },
}

pub struct WebhookHandler {
    orders: Arc<dyn OrderRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    settings: WebhookSettings,
}

impl WebhookHandler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        settings: WebhookSettings,
    ) -> Self {
        Self { orders, snapshots, settings }
    }

    pub async fn handle(&self, event: AmendmentEvent) -> Result<WebhookOutcome, SyncError> {
        let external_id = event.external_id.trim();
        if external_id.is_empty() {
            return Err(SyncError::Validation("amendment has no external id".to_string()));
        }

        let order = self.lookup(external_id).await?;

        if order.has_tracking_reference() {
            self.orders.clear_tracking_reference(order.id).await?;
            info!(
                event_name = "webhook.echo_cleared",
                order_id = %order.id,
                external_id,
                "ignoring crm echo of our own push"
            );
            return Ok(WebhookOutcome::EchoCleared { order_id: order.id });
        }

        if let Some(currency) = event.currency.as_deref().map(str::trim).filter(|code| !code.is_empty()) {
            if !currency.eq_ignore_ascii_case(order.currency.trim()) {
                return Err(SyncError::Validation(format!(
                    "amendment currency `{currency}` does not match order currency `{}`",
                    order.currency
                )));
            }
        }

        if let Some(name) = event.status.as_deref().filter(|name| !name.trim().is_empty()) {
            match OrderStatus::from_display_name(name) {
                Some(status) => self.orders.set_status(order.id, status).await?,
                None => warn!(
                    event_name = "webhook.unknown_status",
                    order_id = %order.id,
                    status = name,
                    "crm sent an unknown status name; keeping current status"
                ),
            }
        }

        let amendment = reconcile(&order, &event, &self.settings.shipping_product_id, Utc::now());
        if !amendment.is_balanced() {
            warn!(
                event_name = "webhook.amendment.unbalanced",
                order_id = %order.id,
                external_id,
                delta = %amendment.balance_delta(),
                "amended order totals do not add up; applying crm values as sent"
            );
        }
        self.orders.apply_amendment(amendment).await?;

        let version = self.append_snapshot(order.id).await;
        info!(
            event_name = "webhook.applied",
            order_id = %order.id,
            external_id,
            version,
            "crm amendment applied"
        );
        Ok(WebhookOutcome::Applied { order_id: order.id, version })
    }

    /// The callback can arrive before the push stored the external id, so a
    /// miss is retried a few times before giving up.
    async fn lookup(&self, external_id: &str) -> Result<CheckoutOrder, SyncError> {
        let attempts = self.settings.lookup_attempts.max(1);
        for attempt in 1..=attempts {
            match self.orders.find_by_external_id(external_id).await {
                Ok(Some(order)) => return Ok(order),
                Ok(None) => debug!(
                    event_name = "webhook.lookup_miss",
                    external_id,
                    attempt,
                    "order not visible yet"
                ),
                Err(lookup_error) => warn!(
                    event_name = "webhook.lookup_failed",
                    external_id,
                    attempt,
                    error = %lookup_error,
                    "order lookup failed"
                ),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.lookup_delay).await;
            }
        }

        Err(SyncError::NotFound(format!("order with external id `{external_id}`")))
    }

    async fn append_snapshot(&self, order_id: OrderId) -> Option<u32> {
        let order = match self.orders.find_by_id(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return None,
            Err(load_error) => {
                warn!(order_id = %order_id, error = %load_error, "could not reload amended order");
                return None;
            }
        };

        match self.snapshots.append_version(&order).await {
            Ok(version) => Some(version),
            Err(snapshot_error) => {
                warn!(
                    event_name = "webhook.snapshot_failed",
                    order_id = %order_id,
                    error = %snapshot_error,
                    "order snapshot not written"
                );
                None
            }
        }
    }
}

/// Rebuilds items and aggregates from a CRM amendment.
///
/// The tax rate is the one implied by the new grand total; when that is not
/// computable or negative the rate stored on the order is kept. The stored
/// coupon is carved out of the discount so the order stays balanced.
pub fn reconcile(
    order: &CheckoutOrder,
    event: &AmendmentEvent,
    shipping_product_id: &str,
    now: DateTime<Utc>,
) -> OrderAmendment {
    let stored = &order.totals;
    let stored_rate = tax_rate(stored.total, stored.tax_value, stored.shipping_value);

    let (shipping_lines, product_lines): (Vec<&AmendedItem>, Vec<&AmendedItem>) =
        event.items.iter().partition(|item| item.product_id.trim() == shipping_product_id);

    for item in &product_lines {
        if let Some(mismatch) = item.discount_mismatch() {
            warn!(
                event_name = "webhook.item_discount_mismatch",
                order_id = %order.id,
                product_id = %item.product_id,
                reported = %item.discount,
                mismatch = %mismatch,
                "line discount disagrees with its total; using the total"
            );
        }
    }

    let shipping: Decimal = shipping_lines.iter().map(|item| item.total).sum();
    let full: Decimal = product_lines.iter().map(|item| item.full_value()).sum();
    let reported: Decimal = product_lines.iter().map(|item| item.total).sum();
    let discount_total = (full - reported).max(Decimal::ZERO);
    let net_items = full - discount_total;

    let implied_rate = (net_items > Decimal::ZERO)
        .then(|| (event.grand_total - (full + shipping - discount_total)) / net_items)
        .filter(|rate| !rate.is_sign_negative());
    let rate = implied_rate.unwrap_or(stored_rate / Decimal::ONE_HUNDRED);
    let tax_value = round_money(net_items * rate);

    let coupon_value = stored.coupon_value.min(discount_total);
    let discount_value = discount_total - coupon_value;

    // A stored line is matched by product id and claimed by one amended line only.
    let mut claimed = HashSet::new();
    let mut items: Vec<LineItem> = product_lines
        .iter()
        .map(|amended| {
            let existing = order.items.iter().find(|item| {
                !item.is_shipping
                    && item.external_product_id == amended.product_id
                    && !claimed.contains(&item.id)
            });
            if let Some(item) = existing {
                claimed.insert(item.id);
            }
            LineItem {
                id: existing.map_or(0, |item| item.id),
                uid: existing.map(|item| item.uid.clone()).unwrap_or_default(),
                external_product_id: amended.product_id.clone(),
                name: if amended.name.trim().is_empty() {
                    existing.map(|item| item.name.clone()).unwrap_or_default()
                } else {
                    amended.name.clone()
                },
                quantity: amended.quantity,
                price: amended.price,
                tax: existing.map_or(Decimal::ZERO, |item| item.tax),
                total: amended.full_value(),
                ..LineItem::default()
            }
        })
        .collect();

    if shipping > Decimal::ZERO {
        let existing = order.shipping_item();
        items.push(LineItem {
            id: existing.map_or(0, |item| item.id),
            uid: existing.map(|item| item.uid.clone()).unwrap_or_default(),
            external_product_id: shipping_product_id.to_string(),
            name: existing.map(|item| item.name.clone()).unwrap_or_else(|| stored.shipping_title.clone()),
            quantity: 1,
            price: shipping,
            total: shipping,
            is_shipping: true,
            ..LineItem::default()
        });
    }

    let discount_percent = recalc_with_discount(&mut items, net_items + shipping, shipping);

    let totals = OrderTotals {
        total: round_money(event.grand_total),
        sub_total: round_money(full),
        tax_value,
        tax_title: stored.tax_title.clone(),
        shipping_value: round_money(shipping),
        shipping_title: stored.shipping_title.clone(),
        discount_value: round_money(discount_value),
        discount_percent,
        coupon_value,
        coupon_title: stored.coupon_title.clone(),
    };

    OrderAmendment {
        order_id: order.id,
        history: HistoryEntry {
            order_id: order.id,
            event: AMENDMENT_EVENT.to_string(),
            message: format!(
                "CRM record {} amended: {} items, grand total {}",
                event.external_id.trim(),
                items.len(),
                totals.total
            ),
            created_at: now,
        },
        items,
        totals,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use ordersync_core::domain::order::{
        CheckoutOrder, HistoryEntry, LineItem, OrderAmendment, OrderId, OrderTotals,
    };
    use ordersync_core::domain::status::OrderStatus;
    use ordersync_db::repositories::{
        DiscoveryCursor, InMemoryOrderRepository, InMemorySnapshotRepository, OrderRepository,
        RepositoryError, SnapshotRepository, SqlOrderRepository, SqlSnapshotRepository,
    };
    use ordersync_db::{connect_with_settings, migrations};

    use super::{reconcile, AmendedItem, AmendmentEvent, WebhookHandler, WebhookOutcome, WebhookSettings};
    use crate::errors::SyncError;
    use crate::testing::{line, order};

    /// Hides orders from external-id lookups for the first `misses` calls.
    struct LaggingOrders {
        inner: InMemoryOrderRepository,
        misses: AtomicU32,
        lookups: AtomicU32,
    }

    impl LaggingOrders {
        fn new(misses: u32) -> Self {
            Self {
                inner: InMemoryOrderRepository::default(),
                misses: AtomicU32::new(misses),
                lookups: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderRepository for LaggingOrders {
        async fn list_unsynced(
            &self,
            after: Option<&DiscoveryCursor>,
            limit: u32,
        ) -> Result<Vec<CheckoutOrder>, RepositoryError> {
            self.inner.list_unsynced(after, limit).await
        }

        async fn find_by_id(&self, id: OrderId) -> Result<Option<CheckoutOrder>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_external_id(
            &self,
            external_id: &str,
        ) -> Result<Option<CheckoutOrder>, RepositoryError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let remaining = self.misses.load(Ordering::SeqCst);
            if remaining > 0 {
                self.misses.store(remaining - 1, Ordering::SeqCst);
                return Ok(None);
            }
            self.inner.find_by_external_id(external_id).await
        }

        async fn save(&self, order: CheckoutOrder) -> Result<(), RepositoryError> {
            self.inner.save(order).await
        }

        async fn set_external_id(
            &self,
            id: OrderId,
            external_id: &str,
            tracking_reference: Option<&str>,
        ) -> Result<bool, RepositoryError> {
            self.inner.set_external_id(id, external_id, tracking_reference).await
        }

        async fn set_deal_id(&self, id: OrderId, deal_id: &str) -> Result<(), RepositoryError> {
            self.inner.set_deal_id(id, deal_id).await
        }

        async fn clear_tracking_reference(&self, id: OrderId) -> Result<(), RepositoryError> {
            self.inner.clear_tracking_reference(id).await
        }

        async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), RepositoryError> {
            self.inner.set_status(id, status).await
        }

        async fn update_line_item_external_ids(
            &self,
            id: OrderId,
            resolved: &[(i64, String)],
        ) -> Result<(), RepositoryError> {
            self.inner.update_line_item_external_ids(id, resolved).await
        }

        async fn mark_sync_incomplete(&self, id: OrderId, note: &str) -> Result<(), RepositoryError> {
            self.inner.mark_sync_incomplete(id, note).await
        }

        async fn apply_amendment(&self, amendment: OrderAmendment) -> Result<(), RepositoryError> {
            self.inner.apply_amendment(amendment).await
        }

        async fn list_history(&self, id: OrderId) -> Result<Vec<HistoryEntry>, RepositoryError> {
            self.inner.list_history(id).await
        }
    }

    fn settings() -> WebhookSettings {
        WebhookSettings {
            shipping_product_id: "crm-shipping".to_string(),
            lookup_attempts: 5,
            lookup_delay: Duration::from_millis(1),
        }
    }

    /// 100.00 of goods with 23% tax, already pushed as `so-1`.
    fn synced_order() -> CheckoutOrder {
        let mut order = order(
            1,
            vec![line(1, 10_000, 1)],
            OrderTotals {
                total: Decimal::new(12_300, 2),
                sub_total: Decimal::new(10_000, 2),
                tax_value: Decimal::new(2_300, 2),
                ..OrderTotals::default()
            },
        );
        order.external_id = Some("so-1".to_string());
        order
    }

    fn event(grand_total: i64, items: Vec<AmendedItem>) -> AmendmentEvent {
        AmendmentEvent {
            external_id: "so-1".to_string(),
            items,
            currency: Some("PLN".to_string()),
            grand_total: Decimal::new(grand_total, 2),
            status: None,
        }
    }

    fn amended(product_id: &str, price: i64, quantity: u32, total: i64) -> AmendedItem {
        AmendedItem {
            product_id: product_id.to_string(),
            name: String::new(),
            price: Decimal::new(price, 2),
            quantity,
            discount: Decimal::ZERO,
            total: Decimal::new(total, 2),
        }
    }

    #[test]
    fn discount_and_implied_tax_keep_the_order_balanced() {
        let base = synced_order();
        let amendment =
            reconcile(&base, &event(11_070, vec![amended("crm-1", 10_000, 1, 9_000)]), "crm-shipping", Utc::now());

        assert_eq!(amendment.totals.discount_value, Decimal::new(1_000, 2));
        assert_eq!(amendment.totals.tax_value, Decimal::new(2_070, 2));
        assert_eq!(amendment.items[0].total, Decimal::new(10_000, 2));
        assert_eq!(amendment.items[0].net_total, Decimal::new(9_000, 2));
        assert_eq!(amendment.items[0].uid, "uid-1");
        assert_eq!(amendment.history.event, "crm_amendment");

        let mut updated = base;
        updated.items = amendment.items;
        updated.totals = amendment.totals;
        assert!(updated.is_balanced(), "delta {}", updated.balance_delta());
    }

    #[test]
    fn stored_coupon_is_carved_out_of_the_discount() {
        let mut base = synced_order();
        base.totals.coupon_value = Decimal::new(500, 2);

        let amendment =
            reconcile(&base, &event(11_070, vec![amended("crm-1", 10_000, 1, 9_000)]), "crm-shipping", Utc::now());

        assert_eq!(amendment.totals.coupon_value, Decimal::new(500, 2));
        assert_eq!(amendment.totals.discount_value, Decimal::new(500, 2));
        let mut updated = base;
        updated.items = amendment.items;
        updated.totals = amendment.totals;
        assert!(updated.is_balanced());
    }

    #[test]
    fn shipping_line_is_matched_by_product_id_and_negative_rate_falls_back() {
        let base = synced_order();
        let amendment = reconcile(
            &base,
            &event(
                5_000,
                vec![amended("crm-1", 10_000, 1, 10_000), amended("crm-shipping", 1_500, 1, 1_500)],
            ),
            "crm-shipping",
            Utc::now(),
        );

        assert_eq!(amendment.totals.shipping_value, Decimal::new(1_500, 2));
        assert_eq!(amendment.totals.tax_value, Decimal::new(2_300, 2));
        assert_eq!(amendment.items.len(), 2);
        assert!(amendment.items[1].is_shipping);
        assert_eq!(amendment.items[1].net_total, Decimal::new(1_500, 2));
        // the grand total of 50.00 cannot cover 100.00 of goods
        assert!(!amendment.is_balanced());
        assert_eq!(amendment.balance_delta(), Decimal::new(8_800, 2));
    }

    #[test]
    fn reported_line_discount_is_checked_against_the_total() {
        let mut item = amended("crm-1", 10_000, 2, 18_000);
        assert_eq!(item.discount_mismatch(), None);

        item.discount = Decimal::new(2_000, 2);
        assert_eq!(item.discount_mismatch(), None);

        item.discount = Decimal::new(500, 2);
        assert_eq!(item.discount_mismatch(), Some(Decimal::new(-1_500, 2)));
    }

    #[tokio::test]
    async fn amendment_in_another_currency_is_rejected() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders.save(synced_order()).await.expect("save");
        let handler =
            WebhookHandler::new(orders.clone(), Arc::new(InMemorySnapshotRepository::default()), settings());

        let mut foreign = event(11_070, vec![amended("crm-1", 10_000, 1, 9_000)]);
        foreign.currency = Some("EUR".to_string());
        let result = handler.handle(foreign).await;

        assert!(matches!(result, Err(SyncError::Validation(_))));
        let stored = orders.find_by_id(OrderId(1)).await.expect("find").expect("order");
        assert_eq!(stored.totals.total, Decimal::new(12_300, 2));
        assert!(orders.list_history(OrderId(1)).await.expect("history").is_empty());

        let mut lowercase = event(11_070, vec![amended("crm-1", 10_000, 1, 9_000)]);
        lowercase.currency = Some("pln".to_string());
        handler.handle(lowercase).await.expect("same currency in lowercase");
    }

    #[tokio::test]
    async fn unbalanced_amendment_is_still_applied() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders.save(synced_order()).await.expect("save");
        let handler =
            WebhookHandler::new(orders.clone(), Arc::new(InMemorySnapshotRepository::default()), settings());

        let outcome = handler
            .handle(event(5_000, vec![amended("crm-1", 10_000, 1, 10_000)]))
            .await
            .expect("handle");

        assert_eq!(outcome, WebhookOutcome::Applied { order_id: OrderId(1), version: Some(1) });
        let stored = orders.find_by_id(OrderId(1)).await.expect("find").expect("order");
        assert_eq!(stored.totals.total, Decimal::new(5_000, 2));
        assert!(!stored.is_balanced());
    }

    #[test]
    fn a_stored_line_is_reused_by_one_amended_line_only() {
        let base = synced_order();
        let amendment = reconcile(
            &base,
            &event(36_900, vec![amended("crm-1", 10_000, 1, 10_000), amended("crm-1", 10_000, 2, 20_000)]),
            "crm-shipping",
            Utc::now(),
        );

        assert_eq!(amendment.items[0].id, 1);
        assert_eq!(amendment.items[1].id, 0);
        assert_eq!(amendment.items[1].quantity, 2);
    }

    #[tokio::test]
    async fn sql_store_accepts_added_and_split_products() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let orders = Arc::new(SqlOrderRepository::new(pool.clone()));
        let mut stored = synced_order();
        stored.items[0].id = 11;
        stored.items[0].external_product_id = "crm-11".to_string();
        stored.items.push(LineItem {
            id: 12,
            name: "Courier".to_string(),
            quantity: 1,
            price: Decimal::new(1_500, 2),
            total: Decimal::new(1_500, 2),
            net_total: Decimal::new(1_500, 2),
            is_shipping: true,
            ..LineItem::default()
        });
        stored.totals.shipping_value = Decimal::new(1_500, 2);
        stored.totals.total = Decimal::new(13_800, 2);
        orders.save(stored).await.expect("save");
        let handler = WebhookHandler::new(
            orders.clone(),
            Arc::new(SqlSnapshotRepository::new(pool.clone())),
            settings(),
        );

        handler
            .handle(event(
                16_260,
                vec![
                    amended("crm-11", 10_000, 1, 10_000),
                    amended("crm-new", 2_000, 1, 2_000),
                    amended("crm-shipping", 1_500, 1, 1_500),
                ],
            ))
            .await
            .expect("added product");
        let added = orders.find_by_id(OrderId(1)).await.expect("find").expect("order");
        let ids: HashSet<i64> = added.items.iter().map(|item| item.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(added.items[0].id, 11);
        assert!(added.items[2].is_shipping);

        handler
            .handle(event(
                36_900,
                vec![amended("crm-11", 10_000, 1, 10_000), amended("crm-11", 10_000, 2, 20_000)],
            ))
            .await
            .expect("split product");
        let split = orders.find_by_id(OrderId(1)).await.expect("find").expect("order");
        assert_eq!(split.items.len(), 2);
        assert_ne!(split.items[0].id, split.items[1].id);
        assert_eq!(split.items[1].quantity, 2);
        assert_eq!(orders.list_history(OrderId(1)).await.expect("history").len(), 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn lookup_succeeds_on_the_fifth_attempt() {
        let orders = Arc::new(LaggingOrders::new(4));
        orders.save(synced_order()).await.expect("save");
        let snapshots = Arc::new(InMemorySnapshotRepository::default());
        let handler = WebhookHandler::new(orders.clone(), snapshots.clone(), settings());

        let outcome = handler
            .handle(event(11_070, vec![amended("crm-1", 10_000, 1, 9_000)]))
            .await
            .expect("handle");

        assert_eq!(outcome, WebhookOutcome::Applied { order_id: OrderId(1), version: Some(1) });
        assert_eq!(orders.lookups.load(Ordering::SeqCst), 5);
        let history = orders.list_history(OrderId(1)).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(snapshots.list_versions(OrderId(1)).await.expect("versions").len(), 1);
    }

    #[tokio::test]
    async fn lookup_gives_up_after_the_configured_attempts() {
        let orders = Arc::new(LaggingOrders::new(5));
        orders.save(synced_order()).await.expect("save");
        let handler =
            WebhookHandler::new(orders.clone(), Arc::new(InMemorySnapshotRepository::default()), settings());

        let result = handler.handle(event(11_070, vec![amended("crm-1", 10_000, 1, 9_000)])).await;

        assert!(matches!(result, Err(SyncError::NotFound(_))));
        assert_eq!(orders.lookups.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn echo_of_own_push_only_clears_the_marker() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        let mut pushed = synced_order();
        pushed.tracking_reference = Some("push-1".to_string());
        orders.save(pushed).await.expect("save");
        let handler =
            WebhookHandler::new(orders.clone(), Arc::new(InMemorySnapshotRepository::default()), settings());

        let outcome = handler
            .handle(event(11_070, vec![amended("crm-1", 10_000, 1, 9_000)]))
            .await
            .expect("handle");

        assert_eq!(outcome, WebhookOutcome::EchoCleared { order_id: OrderId(1) });
        let stored = orders.find_by_id(OrderId(1)).await.expect("find").expect("order");
        assert_eq!(stored.tracking_reference, None);
        assert_eq!(stored.totals.total, Decimal::new(12_300, 2));
        assert!(orders.list_history(OrderId(1)).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn status_names_are_applied_in_either_language() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders.save(synced_order()).await.expect("save");
        let handler =
            WebhookHandler::new(orders.clone(), Arc::new(InMemorySnapshotRepository::default()), settings());

        let mut shipped = event(12_300, vec![amended("crm-1", 10_000, 1, 10_000)]);
        shipped.status = Some("Wysłane".to_string());
        handler.handle(shipped).await.expect("handle");
        let stored = orders.find_by_id(OrderId(1)).await.expect("find").expect("order");
        assert_eq!(stored.status, OrderStatus::Shipped);

        let mut unknown = event(12_300, vec![amended("crm-1", 10_000, 1, 10_000)]);
        unknown.status = Some("Teleported".to_string());
        let outcome = handler.handle(unknown).await.expect("handle");
        assert_eq!(outcome, WebhookOutcome::Applied { order_id: OrderId(1), version: Some(2) });
        let stored = orders.find_by_id(OrderId(1)).await.expect("find").expect("order");
        assert_eq!(stored.status, OrderStatus::Shipped);
    }

    #[test]
    fn events_decode_numbers_and_optional_fields() {
        let event: AmendmentEvent = serde_json::from_value(serde_json::json!({
            "external_id": "so-1",
            "grand_total": 110.7,
            "items": [{ "product_id": "crm-1", "price": 100, "quantity": 1, "total": 90 }]
        }))
        .expect("decode");

        assert_eq!(event.grand_total, Decimal::new(1_107, 1));
        assert_eq!(event.items[0].discount, Decimal::ZERO);
        assert!(event.status.is_none());
    }
}
