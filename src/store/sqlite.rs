//! SQLite 记录存储（sqlx，需要 `async-sqlite` feature）
//!
//! 单表 records(collection, id, body)，body 为 JSON 文本；过滤在取出后进行。

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{ensure_id, merge_patch, Filter, RecordStore, StoreError};

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, collection: &str, mut record: Value) -> Result<String, StoreError> {
        let id = ensure_id(&mut record)?;
        sqlx::query(
            "INSERT OR REPLACE INTO records (collection, id, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(&id)
        .bind(serde_json::to_string(&record)?)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query("SELECT body FROM records WHERE collection = ? ORDER BY rowid")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.get("body");
            let record: Value = serde_json::from_str(&body)?;
            if filter.matches(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool, StoreError> {
        let Some(mut record) = self.load(collection, id).await? else {
            return Ok(false);
        };
        merge_patch(&mut record, patch)?;
        sqlx::query("UPDATE records SET body = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&record)?)
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("opsdesk.db")).await.unwrap();

        let id = store
            .insert("audit_log", json!({"event": "x", "agent_id": "sales"}))
            .await
            .unwrap();
        assert!(store.update("audit_log", &id, json!({"event": "y"})).await.unwrap());

        let rows = store
            .select("audit_log", &Filter::all().eq("agent_id", "sales"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["event"], "y");
        assert!(store.delete("audit_log", &id).await.unwrap());
    }
}
