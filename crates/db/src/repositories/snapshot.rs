use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use ordersync_core::domain::order::{CheckoutOrder, OrderId};

use super::order::parse_timestamp;
use super::{RepositoryError, SnapshotRepository};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: OrderId,
    pub version: u32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct SqlSnapshotRepository {
    pool: DbPool,
}

impl SqlSnapshotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SnapshotRepository for SqlSnapshotRepository {
    async fn append_version(&self, order: &CheckoutOrder) -> Result<u32, RepositoryError> {
        let payload = serde_json::to_string(order)
            .map_err(|error| RepositoryError::Decode(format!("order snapshot: {error}")))?;

        let version: i64 = sqlx::query(
            "INSERT INTO order_snapshot (order_id, version, payload_json, created_at)
             SELECT ?, COALESCE(MAX(version), 0) + 1, ?, ?
             FROM order_snapshot
             WHERE order_id = ?
             RETURNING version",
        )
        .bind(order.id.0)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .bind(order.id.0)
        .fetch_one(&self.pool)
        .await?
        .try_get("version")?;

        u32::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("invalid snapshot version {version}")))
    }

    async fn list_versions(&self, id: OrderId) -> Result<Vec<OrderSnapshot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT order_id, version, payload_json, created_at
             FROM order_snapshot
             WHERE order_id = ?
             ORDER BY version ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw: String = row.try_get("payload_json")?;
                let version: i64 = row.try_get("version")?;
                Ok(OrderSnapshot {
                    order_id: OrderId(row.try_get("order_id")?),
                    version: u32::try_from(version).map_err(|_| {
                        RepositoryError::Decode(format!("invalid snapshot version {version}"))
                    })?,
                    payload: serde_json::from_str(&raw).map_err(|error| {
                        RepositoryError::Decode(format!("invalid payload_json: {error}"))
                    })?,
                    created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
                })
            })
            .collect()
    }
}
