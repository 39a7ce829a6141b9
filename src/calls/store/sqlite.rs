//! SQLite-backed call store.
//!
//! Atomicity comes from the database: uniqueness of `call_id` is the primary key,
//! and the sequence advance is a single conditional `UPDATE`.

use super::{CallStore, StoreError, StoreResult};
use crate::calls::{Call, CallStatus, Sentiment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Row shape of the `calls` table.
#[derive(Debug, sqlx::FromRow)]
struct CallRow {
    call_id: String,
    status: String,
    last_sequence: i64,
    packet_count: i64,
    transcription: Option<String>,
    sentiment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CallRow> for Call {
    type Error = StoreError;

    fn try_from(row: CallRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<CallStatus>()
            .map_err(|e| StoreError::Corrupt(format!("call {}: {}", row.call_id, e)))?;

        Ok(Call {
            call_id: row.call_id,
            status,
            last_sequence: row.last_sequence,
            packet_count: row.packet_count,
            transcription: row.transcription,
            sentiment: row.sentiment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_CALL: &str = r#"
    SELECT call_id, status, last_sequence, packet_count,
           transcription, sentiment, created_at, updated_at
    FROM calls
    WHERE call_id = ?
"#;

#[derive(Debug, Clone)]
pub struct SqliteCallStore {
    pool: Pool<Sqlite>,
}

impl SqliteCallStore {
    /// Open a pool against `url` and make sure the schema exists.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self::from_pool(pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create the `calls` table if it is missing. Safe to run on every startup.
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                call_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'IN_PROGRESS',
                last_sequence INTEGER NOT NULL DEFAULT 0,
                packet_count INTEGER NOT NULL DEFAULT 0,
                transcription TEXT,
                sentiment TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Call store schema ready");
        Ok(())
    }

    /// Drain and close the pool. Further operations fail with a pool-closed error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CallStore for SqliteCallStore {
    async fn get_or_create(&self, call_id: &str) -> StoreResult<Call> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO calls (call_id, status, last_sequence, packet_count, created_at, updated_at)
            VALUES (?, ?, 0, 0, ?, ?)
            ON CONFLICT(call_id) DO NOTHING
            "#,
        )
        .bind(call_id)
        .bind(CallStatus::InProgress.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, CallRow>(SELECT_CALL)
            .bind(call_id)
            .fetch_one(&self.pool)
            .await?;

        Call::try_from(row)
    }

    async fn advance_sequence(
        &self,
        call_id: &str,
        sequence: i64,
        increment_count: bool,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET last_sequence = ?,
                packet_count = packet_count + ?,
                updated_at = ?
            WHERE call_id = ? AND last_sequence < ?
            "#,
        )
        .bind(sequence)
        .bind(if increment_count { 1i64 } else { 0i64 })
        .bind(Utc::now())
        .bind(call_id)
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, call_id: &str, status: CallStatus) -> StoreResult<()> {
        sqlx::query("UPDATE calls SET status = ?, updated_at = ? WHERE call_id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(call_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_result(
        &self,
        call_id: &str,
        transcription: &str,
        sentiment: Sentiment,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE calls
            SET transcription = ?, sentiment = ?, status = ?, updated_at = ?
            WHERE call_id = ?
            "#,
        )
        .bind(transcription)
        .bind(sentiment.as_str())
        .bind(CallStatus::Completed.as_str())
        .bind(Utc::now())
        .bind(call_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, call_id: &str) -> StoreResult<Option<Call>> {
        let row = sqlx::query_as::<_, CallRow>(SELECT_CALL)
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Call::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_store() -> SqliteCallStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let store = SqliteCallStore::from_pool(pool);
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_or_create_defaults() {
        let store = setup_test_store().await;
        let call = store.get_or_create("X").await.unwrap();

        assert_eq!(call.call_id, "X");
        assert_eq!(call.status, CallStatus::InProgress);
        assert_eq!(call.last_sequence, 0);
        assert_eq!(call.packet_count, 0);
        assert!(call.transcription.is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_does_not_duplicate() {
        let store = setup_test_store().await;
        store.get_or_create("X").await.unwrap();
        store.advance_sequence("X", 1, true).await.unwrap();
        let again = store.get_or_create("X").await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM calls")
            .fetch_one(&store.pool)
            .await
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(again.packet_count, 1);
    }

    #[tokio::test]
    async fn test_increasing_sequences_are_all_counted() {
        let store = setup_test_store().await;
        store.get_or_create("X").await.unwrap();

        for sequence in [1, 2, 3, 5, 9] {
            assert!(store.advance_sequence("X", sequence, true).await.unwrap());
        }

        let call = store.get("X").await.unwrap().unwrap();
        assert_eq!(call.last_sequence, 9);
        assert_eq!(call.packet_count, 5);
    }

    #[tokio::test]
    async fn test_stale_sequence_is_noop() {
        let store = setup_test_store().await;
        store.get_or_create("X").await.unwrap();
        store.advance_sequence("X", 8, true).await.unwrap();

        assert!(!store.advance_sequence("X", 5, true).await.unwrap());
        assert!(!store.advance_sequence("X", 8, true).await.unwrap());

        let call = store.get("X").await.unwrap().unwrap();
        assert_eq!(call.last_sequence, 8);
        assert_eq!(call.packet_count, 1);
    }

    #[tokio::test]
    async fn test_set_status() {
        let store = setup_test_store().await;
        store.get_or_create("X").await.unwrap();
        store.set_status("X", CallStatus::Failed).await.unwrap();

        let call = store.get("X").await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Failed);
        assert!(call.transcription.is_none());
        assert!(call.sentiment.is_none());
    }

    #[tokio::test]
    async fn test_save_result_round_trip() {
        let store = setup_test_store().await;
        store.get_or_create("X").await.unwrap();
        store.set_status("X", CallStatus::ProcessingAi).await.unwrap();
        store.save_result("X", "hello", Sentiment::Positive).await.unwrap();

        let call = store.get("X").await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.transcription.as_deref(), Some("hello"));
        assert_eq!(call.sentiment.as_deref(), Some("positive"));
    }

    #[tokio::test]
    async fn test_get_missing_call() {
        let store = setup_test_store().await;
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_status_is_corrupt() {
        let store = setup_test_store().await;
        store.get_or_create("X").await.unwrap();
        sqlx::query("UPDATE calls SET status = 'EXPLODED' WHERE call_id = 'X'")
            .execute(&store.pool)
            .await
            .unwrap();

        let result = store.get("X").await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_closed_pool_surfaces_database_error() {
        let store = setup_test_store().await;
        store.close().await;

        let result = store.get_or_create("X").await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }
}
