use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    Row,
};

use super::{ConversationRecord, ConversationStore};
use crate::{error::StoreError, Timestamp};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_records (
    id BIGSERIAL PRIMARY KEY,
    sender_id TEXT NOT NULL,
    query TEXT NOT NULL,
    response TEXT NOT NULL,
    conversation_handle TEXT,
    created_at BIGINT NOT NULL
)"#;

const CREATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS conversation_records_sender_idx
    ON conversation_records (sender_id, created_at DESC)"#;

/// PostgreSQL-backed store.
///
/// Records go to the `conversation_records` table; `created_at` holds the
/// record timestamp in milliseconds.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and creates the table if needed.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StoreError::backend)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        sqlx::query(CREATE_INDEX)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}

impl ConversationStore for PgStore {
    async fn latest(&self, sender_id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT sender_id, query, response, conversation_handle, created_at
            FROM conversation_records
            WHERE sender_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(sender_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ConversationRecord {
            sender_id: row.try_get("sender_id").map_err(StoreError::backend)?,
            query: row.try_get("query").map_err(StoreError::backend)?,
            response: row.try_get("response").map_err(StoreError::backend)?,
            conversation_handle: row
                .try_get("conversation_handle")
                .map_err(StoreError::backend)?,
            timestamp: Timestamp::from_millis(
                row.try_get("created_at").map_err(StoreError::backend)?,
            ),
        }))
    }

    async fn append(&self, record: ConversationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_records
                (sender_id, query, response, conversation_handle, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.sender_id)
        .bind(&record.query)
        .bind(&record.response)
        .bind(&record.conversation_handle)
        .bind(record.timestamp.millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }
}
