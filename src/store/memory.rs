//! 内存记录存储（测试与未配置持久层时使用）

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{ensure_id, merge_patch, Filter, RecordStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn has_id(record: &Value, id: &str) -> bool {
    record.get("id").and_then(Value::as_str) == Some(id)
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, collection: &str, mut record: Value) -> Result<String, StoreError> {
        let id = ensure_id(&mut record)?;
        let mut guard = self.collections.write();
        let rows = guard.entry(collection.to_string()).or_default();
        rows.retain(|r| !has_id(r, &id));
        rows.push(record);
        Ok(id)
    }

    async fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool, StoreError> {
        let mut guard = self.collections.write();
        match guard
            .get_mut(collection)
            .and_then(|rows| rows.iter_mut().find(|r| has_id(r, id)))
        {
            Some(record) => {
                merge_patch(record, patch)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut guard = self.collections.write();
        let Some(rows) = guard.get_mut(collection) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| !has_id(r, id));
        Ok(rows.len() != before)
    }
}
