use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqlitePool, prelude::FromRow};
use taskwire_core::{DeferredState, DeferredTaskStore, StorageError};

/// Deferred clarification state persisted in SQLite, one row per token.
#[derive(Clone)]
pub struct SqliteDeferredStore {
    pool: Arc<SqlitePool>,
}

#[derive(Debug, FromRow)]
struct DeferredRow {
    state_json: String,
}

fn db_err(err: sqlx::Error) -> StorageError {
    StorageError::Database(err.to_string())
}

impl SqliteDeferredStore {
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                StorageError::Unavailable(format!("creating {}: {err}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|err| StorageError::Database(format!("invalid sqlite options: {err}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        let store = Self {
            pool: Arc::new(pool),
        };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self {
            pool: Arc::new(pool),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deferred_tasks (
                token TEXT PRIMARY KEY,
                task_name TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                state_json TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deferred_agent
            ON deferred_tasks(agent_id)
            "#,
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Tokens parked for one agent, oldest first.
    pub async fn tokens_for_agent(&self, agent_id: &str) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar::<_, String>(
            "SELECT token FROM deferred_tasks WHERE agent_id = ? ORDER BY created_at ASC",
        )
        .bind(agent_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl DeferredTaskStore for SqliteDeferredStore {
    async fn get(&self, token: &str) -> Result<Option<DeferredState>, StorageError> {
        let row = sqlx::query_as::<_, DeferredRow>(
            "SELECT state_json FROM deferred_tasks WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        row.map(|row| serde_json::from_str(&row.state_json).map_err(StorageError::from))
            .transpose()
    }

    async fn set(&self, token: &str, state: DeferredState) -> Result<(), StorageError> {
        let state_json = serde_json::to_string(&state)?;
        sqlx::query(
            r#"
            INSERT INTO deferred_tasks (token, task_name, agent_id, created_at, state_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(token) DO UPDATE SET
                task_name = excluded.task_name,
                agent_id = excluded.agent_id,
                created_at = excluded.created_at,
                state_json = excluded.state_json
            "#,
        )
        .bind(token)
        .bind(&state.task_name)
        .bind(&state.agent.id)
        .bind(state.created_at.to_rfc3339())
        .bind(state_json)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM deferred_tasks WHERE token = ?")
            .bind(token)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
