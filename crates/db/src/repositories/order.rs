use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use ordersync_core::domain::client::ClientDetails;
use ordersync_core::domain::order::{
    CheckoutOrder, HistoryEntry, LineItem, OrderAmendment, OrderId, OrderTotals,
};
use ordersync_core::domain::status::OrderStatus;
use ordersync_core::finance::{from_minor_units, to_minor_units};

use super::{DiscoveryCursor, OrderRepository, RepositoryError};
use crate::DbPool;

const ORDER_COLUMNS: &str = "
    id,
    client_ref,
    client_json,
    currency,
    status,
    total_minor,
    sub_total_minor,
    tax_value_minor,
    tax_title,
    shipping_value_minor,
    shipping_title,
    discount_value_minor,
    discount_percent,
    coupon_value_minor,
    coupon_title,
    external_id,
    deal_id,
    tracking_reference,
    source,
    comment,
    sync_note,
    created_at";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: SqliteRow) -> Result<CheckoutOrder, RepositoryError> {
        let mut order = order_from_row(row)?;
        order.items = self.load_items(order.id).await?;
        Ok(order)
    }

    async fn load_items(&self, id: OrderId) -> Result<Vec<LineItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                uid,
                external_product_id,
                name,
                quantity,
                price_minor,
                tax_minor,
                total_minor,
                discount_percent,
                net_total_minor,
                is_shipping
             FROM order_line_item
             WHERE order_id = ?
             ORDER BY position ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn ensure_exists(&self, id: OrderId) -> Result<(), RepositoryError> {
        let found = sqlx::query("SELECT 1 FROM checkout_order WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        found.map(|_| ()).ok_or(RepositoryError::OrderNotFound(id))
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn list_unsynced(
        &self,
        after: Option<&DiscoveryCursor>,
        limit: u32,
    ) -> Result<Vec<CheckoutOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS}
             FROM checkout_order
             WHERE (external_id IS NULL OR TRIM(external_id) = '')
               AND (? IS NULL OR created_at > ? OR (created_at = ? AND id > ?))
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        );
        let created_at = after.map(|cursor| cursor.created_at.to_rfc3339());
        let rows = sqlx::query(&sql)
            .bind(created_at.as_deref())
            .bind(created_at.as_deref())
            .bind(created_at.as_deref())
            .bind(after.map(|cursor| cursor.id.0))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<CheckoutOrder>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM checkout_order WHERE id = ?");
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CheckoutOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM checkout_order WHERE external_id = ? ORDER BY id LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(external_id).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, order: CheckoutOrder) -> Result<(), RepositoryError> {
        let client_json = order
            .client
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("client details: {error}")))?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO checkout_order (
                id,
                client_ref,
                client_json,
                currency,
                status,
                total_minor,
                sub_total_minor,
                tax_value_minor,
                tax_title,
                shipping_value_minor,
                shipping_title,
                discount_value_minor,
                discount_percent,
                coupon_value_minor,
                coupon_title,
                external_id,
                deal_id,
                tracking_reference,
                source,
                comment,
                sync_note,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                client_ref = excluded.client_ref,
                client_json = excluded.client_json,
                currency = excluded.currency,
                status = excluded.status,
                total_minor = excluded.total_minor,
                sub_total_minor = excluded.sub_total_minor,
                tax_value_minor = excluded.tax_value_minor,
                tax_title = excluded.tax_title,
                shipping_value_minor = excluded.shipping_value_minor,
                shipping_title = excluded.shipping_title,
                discount_value_minor = excluded.discount_value_minor,
                discount_percent = excluded.discount_percent,
                coupon_value_minor = excluded.coupon_value_minor,
                coupon_title = excluded.coupon_title,
                external_id = excluded.external_id,
                deal_id = excluded.deal_id,
                tracking_reference = excluded.tracking_reference,
                source = excluded.source,
                comment = excluded.comment,
                sync_note = excluded.sync_note,
                updated_at = excluded.updated_at",
        )
        .bind(order.id.0)
        .bind(&order.client_ref)
        .bind(client_json)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(to_minor_units(order.totals.total))
        .bind(to_minor_units(order.totals.sub_total))
        .bind(to_minor_units(order.totals.tax_value))
        .bind(&order.totals.tax_title)
        .bind(to_minor_units(order.totals.shipping_value))
        .bind(&order.totals.shipping_title)
        .bind(to_minor_units(order.totals.discount_value))
        .bind(order.totals.discount_percent.to_string())
        .bind(to_minor_units(order.totals.coupon_value))
        .bind(&order.totals.coupon_title)
        .bind(order.external_id.as_deref())
        .bind(order.deal_id.as_deref())
        .bind(order.tracking_reference.as_deref())
        .bind(&order.source)
        .bind(&order.comment)
        .bind(order.sync_note.as_deref())
        .bind(order.created_at.to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        replace_items(&mut tx, order.id, &order.items).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn set_external_id(
        &self,
        id: OrderId,
        external_id: &str,
        tracking_reference: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE checkout_order
             SET external_id = ?, tracking_reference = ?, updated_at = ?
             WHERE id = ? AND (external_id IS NULL OR TRIM(external_id) = '')",
        )
        .bind(external_id)
        .bind(tracking_reference)
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn set_deal_id(&self, id: OrderId, deal_id: &str) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE checkout_order SET deal_id = ?, updated_at = ? WHERE id = ?")
                .bind(deal_id)
                .bind(Utc::now().to_rfc3339())
                .bind(id.0)
                .execute(&self.pool)
                .await?;
        ensure_updated(result, id)
    }

    async fn clear_tracking_reference(&self, id: OrderId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE checkout_order SET tracking_reference = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        ensure_updated(result, id)
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE checkout_order SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(id.0)
                .execute(&self.pool)
                .await?;
        ensure_updated(result, id)
    }

    async fn update_line_item_external_ids(
        &self,
        id: OrderId,
        resolved: &[(i64, String)],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for (item_id, external_id) in resolved {
            sqlx::query(
                "UPDATE order_line_item SET external_product_id = ? WHERE order_id = ? AND id = ?",
            )
            .bind(external_id)
            .bind(id.0)
            .bind(*item_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_sync_incomplete(&self, id: OrderId, note: &str) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE checkout_order SET sync_note = ?, updated_at = ? WHERE id = ?")
                .bind(note)
                .bind(Utc::now().to_rfc3339())
                .bind(id.0)
                .execute(&self.pool)
                .await?;
        ensure_updated(result, id)
    }

    async fn apply_amendment(&self, amendment: OrderAmendment) -> Result<(), RepositoryError> {
        let id = amendment.order_id;
        let totals = &amendment.totals;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE checkout_order
             SET total_minor = ?,
                 sub_total_minor = ?,
                 tax_value_minor = ?,
                 tax_title = ?,
                 shipping_value_minor = ?,
                 shipping_title = ?,
                 discount_value_minor = ?,
                 discount_percent = ?,
                 coupon_value_minor = ?,
                 coupon_title = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(to_minor_units(totals.total))
        .bind(to_minor_units(totals.sub_total))
        .bind(to_minor_units(totals.tax_value))
        .bind(&totals.tax_title)
        .bind(to_minor_units(totals.shipping_value))
        .bind(&totals.shipping_title)
        .bind(to_minor_units(totals.discount_value))
        .bind(totals.discount_percent.to_string())
        .bind(to_minor_units(totals.coupon_value))
        .bind(&totals.coupon_title)
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        ensure_updated(result, id)?;

        replace_items(&mut tx, id, &amendment.items).await?;

        sqlx::query(
            "INSERT INTO order_history (order_id, event, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(&amendment.history.event)
        .bind(&amendment.history.message)
        .bind(amendment.history.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_history(&self, id: OrderId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT order_id, event, message, created_at
             FROM order_history
             WHERE order_id = ?
             ORDER BY id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryEntry {
                    order_id: OrderId(row.try_get("order_id")?),
                    event: row.try_get("event")?,
                    message: row.try_get("message")?,
                    created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
                })
            })
            .collect()
    }
}

/// Rows keeping a stored id are written before the new ones, so the rowids
/// SQLite hands out for new rows never collide with an id still to be written.
/// A repeated id is written as a new row.
async fn replace_items(
    tx: &mut Transaction<'_, Sqlite>,
    order_id: OrderId,
    items: &[LineItem],
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM order_line_item WHERE order_id = ?")
        .bind(order_id.0)
        .execute(&mut **tx)
        .await?;

    let mut kept = HashSet::new();
    let (with_id, without_id): (Vec<_>, Vec<_>) = items
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let id = (item.id > 0 && kept.insert(item.id)).then_some(item.id);
            (position, id, item)
        })
        .partition(|(_, id, _)| id.is_some());

    for (position, id, item) in with_id.into_iter().chain(without_id) {
        insert_item(tx, order_id, position, id, item).await?;
    }

    Ok(())
}

async fn insert_item(
    tx: &mut Transaction<'_, Sqlite>,
    order_id: OrderId,
    position: usize,
    id: Option<i64>,
    item: &LineItem,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO order_line_item (
            id,
            order_id,
            position,
            uid,
            external_product_id,
            name,
            quantity,
            price_minor,
            tax_minor,
            total_minor,
            discount_percent,
            net_total_minor,
            is_shipping
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(order_id.0)
    .bind(position as i64)
    .bind(&item.uid)
    .bind(&item.external_product_id)
    .bind(&item.name)
    .bind(i64::from(item.quantity))
    .bind(to_minor_units(item.price))
    .bind(to_minor_units(item.tax))
    .bind(to_minor_units(item.total))
    .bind(item.discount_percent.to_string())
    .bind(to_minor_units(item.net_total))
    .bind(item.is_shipping)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn ensure_updated(result: SqliteQueryResult, id: OrderId) -> Result<(), RepositoryError> {
    if result.rows_affected() == 0 {
        return Err(RepositoryError::OrderNotFound(id));
    }
    Ok(())
}

fn order_from_row(row: SqliteRow) -> Result<CheckoutOrder, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OrderStatus::from_str(&status_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let client = row
        .try_get::<Option<String>, _>("client_json")?
        .map(|raw| {
            serde_json::from_str::<ClientDetails>(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid client_json: {error}")))
        })
        .transpose()?;

    Ok(CheckoutOrder {
        id: OrderId(row.try_get("id")?),
        client_ref: row.try_get("client_ref")?,
        items: Vec::new(),
        client,
        totals: OrderTotals {
            total: money(&row, "total_minor")?,
            sub_total: money(&row, "sub_total_minor")?,
            tax_value: money(&row, "tax_value_minor")?,
            tax_title: row.try_get("tax_title")?,
            shipping_value: money(&row, "shipping_value_minor")?,
            shipping_title: row.try_get("shipping_title")?,
            discount_value: money(&row, "discount_value_minor")?,
            discount_percent: parse_decimal("discount_percent", row.try_get("discount_percent")?)?,
            coupon_value: money(&row, "coupon_value_minor")?,
            coupon_title: row.try_get("coupon_title")?,
        },
        currency: row.try_get("currency")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        external_id: row.try_get("external_id")?,
        deal_id: row.try_get("deal_id")?,
        tracking_reference: row.try_get("tracking_reference")?,
        source: row.try_get("source")?,
        comment: row.try_get("comment")?,
        sync_note: row.try_get("sync_note")?,
    })
}

fn item_from_row(row: SqliteRow) -> Result<LineItem, RepositoryError> {
    let quantity = row.try_get::<i64, _>("quantity")?;

    Ok(LineItem {
        id: row.try_get("id")?,
        uid: row.try_get("uid")?,
        external_product_id: row.try_get("external_product_id")?,
        name: row.try_get("name")?,
        quantity: u32::try_from(quantity).map_err(|_| {
            RepositoryError::Decode(format!("invalid value for `quantity`: {quantity}"))
        })?,
        price: money(&row, "price_minor")?,
        tax: money(&row, "tax_minor")?,
        total: money(&row, "total_minor")?,
        discount_percent: parse_decimal("discount_percent", row.try_get("discount_percent")?)?,
        net_total: money(&row, "net_total_minor")?,
        is_shipping: row.try_get("is_shipping")?,
    })
}

fn money(row: &SqliteRow, column: &str) -> Result<Decimal, RepositoryError> {
    Ok(from_minor_units(row.try_get::<i64, _>(column)?))
}

fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value.trim()).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use ordersync_core::domain::client::ClientDetails;
    use ordersync_core::domain::order::{
        CheckoutOrder, HistoryEntry, LineItem, OrderAmendment, OrderId, OrderTotals,
    };
    use ordersync_core::domain::status::OrderStatus;

    use super::SqlOrderRepository;
    use crate::migrations;
    use crate::repositories::{DiscoveryCursor, OrderRepository, RepositoryError};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_order_repo_round_trip_with_items() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let order = sample_order(1, "2026-03-01T10:00:00Z");

        repo.save(order.clone()).await.expect("save order");

        let found = repo.find_by_id(OrderId(1)).await.expect("find order");
        assert_eq!(found, Some(order));
        assert_eq!(repo.find_by_id(OrderId(99)).await.expect("find missing"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn discovery_lists_only_unsynced_orders_oldest_first() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());

        repo.save(sample_order(1, "2026-03-02T10:00:00Z")).await.expect("save 1");
        repo.save(sample_order(2, "2026-03-01T10:00:00Z")).await.expect("save 2");
        let mut synced = sample_order(3, "2026-02-01T10:00:00Z");
        synced.external_id = Some("4200000003".to_string());
        repo.save(synced).await.expect("save 3");

        let pending = repo.list_unsynced(None, 10).await.expect("list unsynced");
        let ids: Vec<i64> = pending.iter().map(|order| order.id.0).collect();
        assert_eq!(ids, vec![2, 1]);

        let limited = repo.list_unsynced(None, 1).await.expect("list limited");
        assert_eq!(limited.len(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn discovery_continues_past_the_cursor() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        repo.save(sample_order(1, "2026-03-01T10:00:00Z")).await.expect("save 1");
        repo.save(sample_order(2, "2026-03-01T10:00:00Z")).await.expect("save 2");
        repo.save(sample_order(3, "2026-03-02T10:00:00Z")).await.expect("save 3");

        let first = repo.list_unsynced(None, 2).await.expect("first page");
        let ids: Vec<i64> = first.iter().map(|order| order.id.0).collect();
        assert_eq!(ids, vec![1, 2]);

        let cursor = DiscoveryCursor::after(&first[1]);
        let rest = repo.list_unsynced(Some(&cursor), 2).await.expect("second page");
        let ids: Vec<i64> = rest.iter().map(|order| order.id.0).collect();
        assert_eq!(ids, vec![3]);

        let past_end = DiscoveryCursor::after(&rest[0]);
        assert!(repo.list_unsynced(Some(&past_end), 2).await.expect("third page").is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn external_id_is_written_once() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        repo.save(sample_order(1, "2026-03-01T10:00:00Z")).await.expect("save order");

        let first =
            repo.set_external_id(OrderId(1), "4200000001", Some("push-1")).await.expect("stamp");
        let second = repo.set_external_id(OrderId(1), "4200000999", None).await.expect("restamp");

        assert!(first);
        assert!(!second);
        let found = repo
            .find_by_external_id("4200000001")
            .await
            .expect("find by external id")
            .expect("order present");
        assert_eq!(found.tracking_reference.as_deref(), Some("push-1"));
        assert!(repo.list_unsynced(None, 10).await.expect("list").is_empty());

        let missing = repo.set_external_id(OrderId(7), "x", None).await;
        assert!(matches!(missing, Err(RepositoryError::OrderNotFound(OrderId(7)))));

        pool.close().await;
    }

    #[tokio::test]
    async fn small_field_updates_persist() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let mut order = sample_order(1, "2026-03-01T10:00:00Z");
        order.tracking_reference = Some("push-1".to_string());
        repo.save(order).await.expect("save order");

        repo.clear_tracking_reference(OrderId(1)).await.expect("clear tracking");
        repo.set_status(OrderId(1), OrderStatus::Shipped).await.expect("set status");
        repo.set_deal_id(OrderId(1), "deal-9").await.expect("set deal");
        repo.mark_sync_incomplete(OrderId(1), "chunk 2 failed").await.expect("mark");
        repo.update_line_item_external_ids(OrderId(1), &[(11, "crm-new".to_string())])
            .await
            .expect("update product ids");

        let found = repo.find_by_id(OrderId(1)).await.expect("find").expect("present");
        assert_eq!(found.tracking_reference, None);
        assert_eq!(found.status, OrderStatus::Shipped);
        assert_eq!(found.deal_id.as_deref(), Some("deal-9"));
        assert_eq!(found.sync_note.as_deref(), Some("chunk 2 failed"));
        assert_eq!(found.items[0].external_product_id, "crm-new");

        let missing = repo.set_status(OrderId(5), OrderStatus::Paid).await;
        assert!(matches!(missing, Err(RepositoryError::OrderNotFound(_))));

        pool.close().await;
    }

    #[tokio::test]
    async fn amendment_replaces_items_and_appends_history() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        repo.save(sample_order(1, "2026-03-01T10:00:00Z")).await.expect("save order");

        let replacement = LineItem {
            id: 0,
            uid: "uid-3".to_string(),
            external_product_id: "crm-3".to_string(),
            name: "Replacement".to_string(),
            quantity: 3,
            price: Decimal::new(1_000, 2),
            total: Decimal::new(3_000, 2),
            net_total: Decimal::new(2_700, 2),
            discount_percent: Decimal::new(10, 0),
            ..LineItem::default()
        };
        let amendment = OrderAmendment {
            order_id: OrderId(1),
            items: vec![replacement],
            totals: OrderTotals {
                total: Decimal::new(3_321, 2),
                tax_value: Decimal::new(621, 2),
                discount_value: Decimal::new(300, 2),
                discount_percent: Decimal::new(10, 0),
                ..OrderTotals::default()
            },
            history: HistoryEntry {
                order_id: OrderId(1),
                event: "crm_amendment".to_string(),
                message: "items replaced from CRM".to_string(),
                created_at: parse_ts("2026-03-02T08:00:00Z"),
            },
        };

        repo.apply_amendment(amendment.clone()).await.expect("apply amendment");

        let found = repo.find_by_id(OrderId(1)).await.expect("find").expect("present");
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.items[0].name, "Replacement");
        assert!(found.items[0].id > 0);
        assert_eq!(found.totals, amendment.totals);
        assert_eq!(repo.list_history(OrderId(1)).await.expect("history"), vec![amendment.history]);

        pool.close().await;
    }

    #[tokio::test]
    async fn amendment_adding_a_line_next_to_shipping_keeps_item_ids_unique() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let stored = sample_order(1, "2026-03-01T10:00:00Z");
        repo.save(stored.clone()).await.expect("save order");

        let added = LineItem {
            id: 0,
            uid: "uid-new".to_string(),
            external_product_id: "crm-new".to_string(),
            name: "Added".to_string(),
            quantity: 1,
            price: Decimal::new(1_000, 2),
            total: Decimal::new(1_000, 2),
            net_total: Decimal::new(1_000, 2),
            ..LineItem::default()
        };
        let items = vec![stored.items[0].clone(), added, stored.items[1].clone()];

        repo.apply_amendment(item_amendment(1, items)).await.expect("apply amendment");

        let found = repo.find_by_id(OrderId(1)).await.expect("find").expect("present");
        let names: Vec<&str> = found.items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, vec!["Ceramic mug", "Added", "Courier"]);
        assert_eq!(found.items[0].id, 11);
        assert_eq!(found.items[2].id, 12);
        assert!(found.items[1].id > 12);

        pool.close().await;
    }

    #[tokio::test]
    async fn amendment_repeating_an_item_id_stores_both_lines() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let stored = sample_order(1, "2026-03-01T10:00:00Z");
        repo.save(stored.clone()).await.expect("save order");

        let mut split = stored.items[0].clone();
        split.quantity = 3;
        let items = vec![stored.items[0].clone(), split];

        repo.apply_amendment(item_amendment(1, items)).await.expect("apply amendment");

        let found = repo.find_by_id(OrderId(1)).await.expect("find").expect("present");
        assert_eq!(found.items.len(), 2);
        assert_eq!(found.items[0].id, 11);
        assert_ne!(found.items[1].id, 11);
        assert_eq!(found.items[1].quantity, 3);

        pool.close().await;
    }

    #[tokio::test]
    async fn amendment_for_missing_order_rolls_back() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());

        let result = repo
            .apply_amendment(OrderAmendment {
                order_id: OrderId(404),
                items: vec![],
                totals: OrderTotals::default(),
                history: HistoryEntry {
                    order_id: OrderId(404),
                    event: "crm_amendment".to_string(),
                    message: String::new(),
                    created_at: Utc::now(),
                },
            })
            .await;

        assert!(matches!(result, Err(RepositoryError::OrderNotFound(OrderId(404)))));
        assert!(repo.list_history(OrderId(404)).await.expect("history").is_empty());

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_order(id: i64, created_at: &str) -> CheckoutOrder {
        let mut shipping = LineItem {
            id: id * 10 + 2,
            name: "Courier".to_string(),
            quantity: 1,
            price: Decimal::new(1_500, 2),
            total: Decimal::new(1_500, 2),
            net_total: Decimal::new(1_500, 2),
            ..LineItem::default()
        };
        shipping.is_shipping = true;

        CheckoutOrder {
            id: OrderId(id),
            client_ref: format!("client-{id}"),
            items: vec![
                LineItem {
                    id: id * 10 + 1,
                    uid: "uid-1".to_string(),
                    external_product_id: String::new(),
                    name: "Ceramic mug".to_string(),
                    quantity: 2,
                    price: Decimal::new(4_999, 2),
                    tax: Decimal::new(935, 2),
                    total: Decimal::new(9_998, 2),
                    discount_percent: Decimal::ZERO,
                    net_total: Decimal::new(9_998, 2),
                    is_shipping: false,
                },
                shipping,
            ],
            client: Some(ClientDetails {
                name: "Jan Kowalski".to_string(),
                email: "jan@example.com".to_string(),
                country: "Polska".to_string(),
                postal_code: "00950".to_string(),
                group_id: Some(1),
                ..ClientDetails::default()
            }),
            totals: OrderTotals {
                total: Decimal::new(11_498, 2),
                sub_total: Decimal::new(9_998, 2),
                tax_value: Decimal::new(1_870, 2),
                tax_title: "VAT 23%".to_string(),
                shipping_value: Decimal::new(1_500, 2),
                shipping_title: "Courier".to_string(),
                ..OrderTotals::default()
            },
            currency: "PLN".to_string(),
            status: OrderStatus::New,
            created_at: parse_ts(created_at),
            external_id: None,
            deal_id: None,
            tracking_reference: None,
            source: "shop".to_string(),
            comment: "leave at the door".to_string(),
            sync_note: None,
        }
    }

    fn item_amendment(order_id: i64, items: Vec<LineItem>) -> OrderAmendment {
        OrderAmendment {
            order_id: OrderId(order_id),
            items,
            totals: OrderTotals::default(),
            history: HistoryEntry {
                order_id: OrderId(order_id),
                event: "crm_amendment".to_string(),
                message: "items replaced from CRM".to_string(),
                created_at: parse_ts("2026-03-02T08:00:00Z"),
            },
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
