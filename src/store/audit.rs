//! 审计日志：权限请求与动作调度写入 `audit_log` 集合
//!
//! 写入失败只记录 warn，不影响调用方结果。

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::agents::AgentId;
use crate::store::{Filter, RecordStore};

pub const AUDIT_COLLECTION: &str = "audit_log";

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn RecordStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, event: &str, agent: AgentId, detail: Value) {
        let entry = json!({
            "event": event,
            "agent_id": agent,
            "detail": detail,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.store.insert(AUDIT_COLLECTION, entry).await {
            tracing::warn!(event, error = %e, "Audit record not written");
        }
    }

    /// 某 Agent 的审计记录（按写入顺序）
    pub async fn entries_for(&self, agent: AgentId) -> Vec<Value> {
        let filter = Filter::all().eq("agent_id", agent.as_str());
        match self.store.select(AUDIT_COLLECTION, &filter).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Audit records not readable");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;

    #[tokio::test]
    async fn test_records_are_filtered_by_agent() {
        let store = Arc::new(InMemoryRecordStore::new());
        let audit = AuditLog::new(store.clone());
        audit.record("permission_requested", AgentId::Sales, json!({"action": "send_email"})).await;
        audit.record("action_dispatched", AgentId::Finance, json!({})).await;

        let rows = audit.entries_for(AgentId::Sales).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["event"], "permission_requested");
        assert_eq!(store.len(AUDIT_COLLECTION), 2);
    }
}
