use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::Row;

use ordersync_core::domain::chat::ConversationId;

use super::order::parse_timestamp;
use super::{RepositoryError, WatermarkRepository};
use crate::DbPool;

pub struct SqlWatermarkRepository {
    pool: DbPool,
}

impl SqlWatermarkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WatermarkRepository for SqlWatermarkRepository {
    async fn load_all(&self) -> Result<HashMap<ConversationId, DateTime<Utc>>, RepositoryError> {
        let rows = sqlx::query("SELECT conversation_id, last_message_at FROM chat_watermark")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok((
                    ConversationId(row.try_get("conversation_id")?),
                    parse_timestamp("last_message_at", row.try_get("last_message_at")?)?,
                ))
            })
            .collect()
    }

    async fn save(
        &self,
        conversation: &ConversationId,
        last_message_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_watermark (conversation_id, last_message_at, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET
                last_message_at = excluded.last_message_at,
                updated_at = excluded.updated_at",
        )
        .bind(&conversation.0)
        .bind(last_message_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
