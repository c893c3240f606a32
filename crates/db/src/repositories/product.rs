use std::collections::HashMap;

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite};

use ordersync_core::domain::product::{Product, ProductUid};

use super::{ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_uid(&self, uid: &ProductUid) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query("SELECT uid, name, external_id FROM product WHERE uid = ?")
            .bind(&uid.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Product {
                uid: ProductUid(row.try_get("uid")?),
                name: row.try_get("name")?,
                external_id: row.try_get("external_id")?,
            })
        })
        .transpose()
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (uid, name, external_id, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(uid) DO UPDATE SET
                name = excluded.name,
                external_id = excluded.external_id,
                updated_at = excluded.updated_at",
        )
        .bind(&product.uid.0)
        .bind(&product.name)
        .bind(product.external_id.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resolve_external_ids(
        &self,
        uids: &[ProductUid],
    ) -> Result<HashMap<ProductUid, String>, RepositoryError> {
        if uids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT uid, external_id FROM product
             WHERE external_id IS NOT NULL AND TRIM(external_id) <> '' AND uid IN (",
        );
        let mut separated = query.separated(", ");
        for uid in uids {
            separated.push_bind(&uid.0);
        }
        separated.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| Ok((ProductUid(row.try_get("uid")?), row.try_get("external_id")?)))
            .collect()
    }
}
