//! 审批单管理
//!
//! 审批单创建后为 pending；approve / deny 使其进入终态，重复调用不产生变化。
//! 结果只回调给发起请求的 Agent 注册的回调。审批通过不会自动重放原动作。
//! 已了结的审批单（被拒绝，或批准后已成功重放）只保留最近 retention 条，
//! 超出时按了结顺序淘汰最早的；pending 与待重放的审批单不受影响。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::agents::AgentId;
use crate::permissions::{PermissionPolicy, Priority};
use crate::store::AuditLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub agent_id: AgentId,
    pub action: String,
    pub description: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    /// 原动作参数，供审批后手动重放
    pub metadata: Value,
    pub resolved_at: Option<DateTime<Utc>>,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl PermissionRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// 不会再有后续操作的审批单
    pub fn is_settled(&self) -> bool {
        self.status == RequestStatus::Denied || self.replayed_at.is_some()
    }
}

/// 默认保留的已了结审批单数
pub const DEFAULT_RETENTION: usize = 500;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Permission request not found: {0}")]
    NotFound(String),

    #[error("Permission request {id} is {status:?}, not approved")]
    NotApproved { id: String, status: RequestStatus },

    #[error("Permission request already replayed: {0}")]
    AlreadyReplayed(String),

    #[error("Permission request is being replayed: {0}")]
    ReplayInProgress(String),
}

/// approve / deny 的结果
#[derive(Debug, Clone)]
pub enum Resolution {
    /// 本次调用完成了状态变更
    Resolved(PermissionRequest),
    /// 已处于终态，未做任何改变
    Unchanged(PermissionRequest),
}

impl Resolution {
    pub fn request(&self) -> &PermissionRequest {
        match self {
            Resolution::Resolved(r) | Resolution::Unchanged(r) => r,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

type ResolutionCallback = Arc<dyn Fn(&PermissionRequest) + Send + Sync>;

pub struct PermissionManager {
    policy: PermissionPolicy,
    requests: RwLock<Vec<PermissionRequest>>,
    /// 正在重放的审批单 id
    replaying: Mutex<HashSet<String>>,
    /// 已了结的审批单 id，按了结顺序
    settled: Mutex<VecDeque<String>>,
    callbacks: RwLock<HashMap<AgentId, Vec<ResolutionCallback>>>,
    audit: Option<AuditLog>,
    retention: usize,
}



impl PermissionManager {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            policy,
            requests: RwLock::new(Vec::new()),
            replaying: Mutex::new(HashSet::new()),
            settled: Mutex::new(VecDeque::new()),
            callbacks: RwLock::new(HashMap::new()),
            audit: None,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// 记录一条新了结的审批单，并淘汰超出 retention 的最早记录；调用方持有 requests 写锁
    fn settle(&self, requests: &mut Vec<PermissionRequest>, id: &str) {
        let mut settled = self.settled.lock();
        settled.push_back(id.to_string());
        let mut evicted = HashSet::new();
        while settled.len() > self.retention {
            if let Some(old) = settled.pop_front() {
                evicted.insert(old);
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(pruned = evicted.len(), "Pruning settled permission requests");
            requests.retain(|r| !evicted.contains(&r.id));
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn requires_approval(&self, action: &str, agent: AgentId, metadata: &Value) -> bool {
        self.policy.requires_approval(action, agent, metadata)
    }

    /// 创建 pending 审批单
    pub async fn request(
        &self,
        agent: AgentId,
        action: &str,
        description: impl Into<String>,
        metadata: Value,
    ) -> PermissionRequest {
        let request = PermissionRequest {
            id: format!("perm_{}", Uuid::new_v4()),
            agent_id: agent,
            action: action.to_string(),
            description: description.into(),
            priority: self.policy.priority_for(action, &metadata),
            created_at: Utc::now(),
            status: RequestStatus::Pending,
            metadata,
            resolved_at: None,
            replayed_at: None,
        };
        self.requests.write().push(request.clone());

        tracing::info!(
            agent = %agent,
            action,
            request_id = %request.id,
            priority = ?request.priority,
            "Permission requested"
        );
        if let Some(audit) = &self.audit {
            audit
                .record(
                    "permission_requested",
                    agent,
                    json!({"request_id": request.id, "action": action, "priority": request.priority}),
                )
                .await;
        }
        request
    }

    pub async fn approve(&self, id: &str) -> Result<Resolution, PermissionError> {
        self.resolve(id, RequestStatus::Approved).await
    }

    pub async fn deny(&self, id: &str) -> Result<Resolution, PermissionError> {
        self.resolve(id, RequestStatus::Denied).await
    }

    async fn resolve(&self, id: &str, status: RequestStatus) -> Result<Resolution, PermissionError> {
        let resolution = {
            let mut requests = self.requests.write();
            let request = requests
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| PermissionError::NotFound(id.to_string()))?;
            if request.is_pending() {
                request.status = status;
                request.resolved_at = Some(Utc::now());
                let resolved = Resolution::Resolved(request.clone());
                if resolved.request().is_settled() {
                    self.settle(&mut requests, id);
                }
                resolved
            } else {
                Resolution::Unchanged(request.clone())
            }
        };

        if !resolution.changed() {
            tracing::debug!(request_id = id, "Permission request already resolved");
            return Ok(resolution);
        }
        let request = resolution.request();

        tracing::info!(
            agent = %request.agent_id,
            request_id = id,
            status = ?status,
            "Permission resolved"
        );

        let callbacks: Vec<ResolutionCallback> = self
            .callbacks
            .read()
            .get(&request.agent_id)
            .cloned()
            .unwrap_or_default();
        for callback in &callbacks {
            callback(request);
        }

        if let Some(audit) = &self.audit {
            audit
                .record(
                    "permission_resolved",
                    request.agent_id,
                    json!({"request_id": id, "status": status}),
                )
                .await;
        }
        Ok(resolution)
    }

    /// 注册某 Agent 的审批结果回调
    pub fn on_resolution<F>(&self, agent: AgentId, callback: F)
    where
        F: Fn(&PermissionRequest) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .entry(agent)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn get(&self, id: &str) -> Option<PermissionRequest> {
        self.requests.read().iter().find(|r| r.id == id).cloned()
    }

    /// 某 Agent 仍待审批的请求（创建顺序）
    pub fn pending(&self, agent: AgentId) -> Vec<PermissionRequest> {
        self.requests
            .read()
            .iter()
            .filter(|r| r.agent_id == agent && r.is_pending())
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<PermissionRequest> {
        self.requests.read().clone()
    }

    /// 占用一个待重放的审批单；只允许已批准、未成功重放且当前没有在重放的请求
    pub fn begin_replay(&self, id: &str) -> Result<PermissionRequest, PermissionError> {
        let requests = self.requests.read();
        let request = requests
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| PermissionError::NotFound(id.to_string()))?;
        if request.status != RequestStatus::Approved {
            return Err(PermissionError::NotApproved {
                id: id.to_string(),
                status: request.status,
            });
        }
        if request.replayed_at.is_some() {
            return Err(PermissionError::AlreadyReplayed(id.to_string()));
        }
        if !self.replaying.lock().insert(id.to_string()) {
            return Err(PermissionError::ReplayInProgress(id.to_string()));
        }
        Ok(request.clone())
    }

    /// 结束 begin_replay 的占用；succeeded 为 true 时记下 replayed_at，之后不可再重放
    pub fn finish_replay(&self, id: &str, succeeded: bool) -> Result<PermissionRequest, PermissionError> {
        let mut requests = self.requests.write();
        self.replaying.lock().remove(id);
        let request = requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| PermissionError::NotFound(id.to_string()))?;
        if succeeded {
            request.replayed_at = Some(Utc::now());
        }
        let request = request.clone();
        if succeeded {
            self.settle(&mut requests, id);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> PermissionManager {
        PermissionManager::new(PermissionPolicy::default())
    }

    #[tokio::test]
    async fn test_request_is_pending() {
        let m = manager();
        let req = m
            .request(AgentId::Sales, "send_email", "Email the prospect", json!({"to": "a@b.c"}))
            .await;
        assert!(req.is_pending());
        assert_eq!(req.priority, Priority::Medium);
        assert_eq!(m.pending(AgentId::Sales).len(), 1);
        assert!(m.pending(AgentId::Finance).is_empty());
    }

    #[tokio::test]
    async fn test_terminal_state_is_idempotent() {
        let m = manager();
        let req = m.request(AgentId::Sales, "make_call", "Call", json!({})).await;

        let first = m.approve(&req.id).await.unwrap();
        assert!(first.changed());
        let again = m.deny(&req.id).await.unwrap();
        assert!(!again.changed());
        assert_eq!(again.request().status, RequestStatus::Approved);
        assert_eq!(m.get(&req.id).unwrap().status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_only_requesting_agent_is_notified() {
        let m = manager();
        let sales_calls = Arc::new(AtomicUsize::new(0));
        let finance_calls = Arc::new(AtomicUsize::new(0));
        let s = sales_calls.clone();
        m.on_resolution(AgentId::Sales, move |r| {
            assert_eq!(r.status, RequestStatus::Denied);
            s.fetch_add(1, Ordering::SeqCst);
        });
        let f = finance_calls.clone();
        m.on_resolution(AgentId::Finance, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let req = m.request(AgentId::Sales, "send_sms", "Text", json!({})).await;
        m.deny(&req.id).await.unwrap();
        m.deny(&req.id).await.unwrap();

        assert_eq!(sales_calls.load(Ordering::SeqCst), 1);
        assert_eq!(finance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let m = manager();
        assert!(matches!(m.approve("perm_missing").await, Err(PermissionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_replay_claim_rules() {
        let m = manager();
        let req = m.request(AgentId::Support, "send_message", "Reply", json!({})).await;
        assert!(matches!(m.begin_replay(&req.id), Err(PermissionError::NotApproved { .. })));
        m.approve(&req.id).await.unwrap();

        m.begin_replay(&req.id).unwrap();
        assert!(matches!(m.begin_replay(&req.id), Err(PermissionError::ReplayInProgress(_))));

        // 失败的重放不会用掉审批单
        assert!(m.finish_replay(&req.id, false).unwrap().replayed_at.is_none());
        m.begin_replay(&req.id).unwrap();
        assert!(m.finish_replay(&req.id, true).unwrap().replayed_at.is_some());
        assert!(matches!(m.begin_replay(&req.id), Err(PermissionError::AlreadyReplayed(_))));
    }

    #[tokio::test]
    async fn test_settled_requests_are_capped() {
        let m = manager().with_retention(2);
        let pending = m.request(AgentId::Sales, "send_email", "Keep", json!({})).await;
        let approved = m.request(AgentId::Sales, "make_call", "Replay later", json!({})).await;
        m.approve(&approved.id).await.unwrap();

        let mut denied = Vec::new();
        for i in 0..4 {
            let req = m.request(AgentId::Marketing, "send_sms", format!("Text {i}"), json!({})).await;
            m.deny(&req.id).await.unwrap();
            denied.push(req.id);
        }

        // 只留下最近两条已拒绝的审批单
        assert!(m.get(&denied[0]).is_none());
        assert!(m.get(&denied[1]).is_none());
        assert!(m.get(&denied[2]).is_some());
        assert!(m.get(&denied[3]).is_some());
        // pending 与待重放的不受影响
        assert!(m.get(&pending.id).unwrap().is_pending());
        assert!(m.get(&approved.id).is_some());
        assert_eq!(m.all().len(), 4);

        // 成功重放后也计入已了结
        m.begin_replay(&approved.id).unwrap();
        m.finish_replay(&approved.id, true).unwrap();
        assert_eq!(m.all().len(), 3);
        assert!(m.get(&denied[2]).is_none());
        assert!(m.get(&approved.id).is_some());
    }
}
