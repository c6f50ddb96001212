//! 记录存储：核心只通过 insert / select / update / delete 访问外部持久层
//!
//! 记录为 JSON 对象，按 collection 分组，`id` 字段为主键。
//! 默认实现为内存存储；启用 `async-sqlite` feature 后可使用 SQLite。

pub mod audit;
pub mod memory;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use audit::{AuditLog, AUDIT_COLLECTION};
pub use memory::InMemoryRecordStore;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record must be a JSON object")]
    NotAnObject,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "async-sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// 字段相等过滤；无条件时匹配全部记录
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 插入记录，缺少 id 时自动生成；返回记录 id
    async fn insert(&self, collection: &str, record: Value) -> Result<String, StoreError>;

    async fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    /// 按 id 合并字段；返回是否找到记录
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
}

/// 确保记录带有 id，返回该 id
pub(crate) fn ensure_id(record: &mut Value) -> Result<String, StoreError> {
    let obj = record.as_object_mut().ok_or(StoreError::NotAnObject)?;
    match obj.get("id").and_then(Value::as_str) {
        Some(id) => Ok(id.to_string()),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            obj.insert("id".to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

/// 浅合并：patch 中的字段覆盖 target（id 不可修改）
pub(crate) fn merge_patch(target: &mut Value, patch: Value) -> Result<(), StoreError> {
    let Value::Object(fields) = patch else {
        return Err(StoreError::NotAnObject);
    };
    let obj = target.as_object_mut().ok_or(StoreError::NotAnObject)?;
    for (key, value) in fields {
        if key != "id" {
            obj.insert(key, value);
        }
    }
    Ok(())
}
