//! 动作分发器
//!
//! dispatch 流程：权限门判定 → 需要审批则创建审批单并返回 PendingApproval（不调用网关）；
//! 否则在超时内调用网关，成功返回 Completed，任何失败返回 Failed + 补位载荷。
//! 每次分发输出一条 JSON 审计日志。审批通过后由调用方通过 replay 手动重放；
//! 重放成功后审批单即被用掉，重放失败则保留，可再次重放。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::actions::gateway::{create_gateway_from_config, ActionGateway, GatewayError};
use crate::actions::ActionKind;
use crate::agents::AgentId;
use crate::config::ActionsSection;
use crate::core::AgentError;
use crate::permissions::{PermissionManager, Priority};
use crate::store::AuditLog;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed {
        action: ActionKind,
        data: Value,
    },
    PendingApproval {
        action: ActionKind,
        request_id: String,
        priority: Priority,
    },
    Failed {
        action: ActionKind,
        error: String,
        fallback: Value,
    },
}

impl ActionOutcome {
    pub fn action(&self) -> ActionKind {
        match self {
            ActionOutcome::Completed { action, .. }
            | ActionOutcome::PendingApproval { action, .. }
            | ActionOutcome::Failed { action, .. } => *action,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ActionOutcome::Completed { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ActionOutcome::PendingApproval { .. })
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ActionOutcome::PendingApproval { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Completed { .. } => "completed",
            ActionOutcome::PendingApproval { .. } => "pending_approval",
            ActionOutcome::Failed { .. } => "failed",
        }
    }
}

fn params_preview(params: &Value) -> String {
    let s = params.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

pub struct ActionDispatcher {
    gateway: Arc<dyn ActionGateway>,
    permissions: Arc<PermissionManager>,
    timeout: Duration,
    audit: Option<AuditLog>,
}

impl ActionDispatcher {
    pub fn new(
        gateway: Arc<dyn ActionGateway>,
        permissions: Arc<PermissionManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            permissions,
            timeout,
            audit: None,
        }
    }

    pub fn from_config(cfg: &ActionsSection, permissions: Arc<PermissionManager>) -> Self {
        Self::new(
            create_gateway_from_config(cfg),
            permissions,
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    /// 经权限门分发动作；永不返回 Err
    pub async fn dispatch(&self, agent: AgentId, kind: ActionKind, params: Value) -> ActionOutcome {
        let start = Instant::now();
        let outcome = if self.permissions.requires_approval(kind.name(), agent, &params) {
            let description = kind.describe(&params);
            let request = self
                .permissions
                .request(agent, kind.name(), description, params.clone())
                .await;
            ActionOutcome::PendingApproval {
                action: kind,
                request_id: request.id,
                priority: request.priority,
            }
        } else {
            self.execute(kind, &params).await
        };
        self.audit(agent, &outcome, &params, start, false).await;
        outcome
    }

    /// 按动作名分发；未知动作名返回 UnknownAction
    pub async fn dispatch_named(
        &self,
        agent: AgentId,
        action: &str,
        params: Value,
    ) -> Result<ActionOutcome, AgentError> {
        let kind = ActionKind::from_name(action)
            .ok_or_else(|| AgentError::UnknownAction(action.to_string()))?;
        Ok(self.dispatch(agent, kind, params).await)
    }

    /// 重放已批准的审批单对应的动作（跳过权限门）
    ///
    /// 执行期间审批单被占用，并发的第二次重放返回 ReplayInProgress；
    /// 网关失败时释放占用，返回的 Failed 结果可稍后重试。
    pub async fn replay(&self, request_id: &str) -> Result<ActionOutcome, AgentError> {
        let request = self
            .permissions
            .get(request_id)
            .ok_or_else(|| crate::permissions::PermissionError::NotFound(request_id.to_string()))?;
        let kind = ActionKind::from_name(&request.action)
            .ok_or_else(|| AgentError::UnknownAction(request.action.clone()))?;
        let request = self.permissions.begin_replay(request_id)?;

        tracing::info!(
            agent = %request.agent_id,
            action = %kind,
            request_id,
            "Replaying approved action"
        );
        let start = Instant::now();
        let outcome = self.execute(kind, &request.metadata).await;
        self.permissions
            .finish_replay(request_id, outcome.is_completed())?;
        self.audit(request.agent_id, &outcome, &request.metadata, start, true)
            .await;
        Ok(outcome)
    }

    async fn execute(&self, kind: ActionKind, params: &Value) -> ActionOutcome {
        let result = match timeout(self.timeout, self.gateway.invoke(kind.name(), params)).await {
            Ok(r) => r,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        };
        match result {
            Ok(resp) => ActionOutcome::Completed {
                action: kind,
                data: resp.data.unwrap_or(Value::Null),
            },
            Err(e) => {
                tracing::warn!(action = %kind, error = %e, "Action gateway failed, queued for retry");
                ActionOutcome::Failed {
                    action: kind,
                    error: e.to_string(),
                    fallback: kind.fallback_payload(params),
                }
            }
        }
    }

    async fn audit(
        &self,
        agent: AgentId,
        outcome: &ActionOutcome,
        params: &Value,
        start: Instant,
        replay: bool,
    ) {
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = json!({
            "event": "action_audit",
            "agent": agent,
            "action": outcome.action().name(),
            "outcome": outcome.label(),
            "replay": replay,
            "duration_ms": duration_ms,
            "params_preview": params_preview(params),
        });
        tracing::info!(audit = %audit.to_string(), "action");
        if let Some(log) = &self.audit {
            log.record("action_dispatched", agent, audit).await;
        }
    }

    pub async fn send_message(&self, agent: AgentId, to: &str, body: &str) -> ActionOutcome {
        self.dispatch(agent, ActionKind::SendMessage, json!({"to": to, "body": body}))
            .await
    }

    pub async fn send_email(&self, agent: AgentId, to: &str, subject: &str, body: &str) -> ActionOutcome {
        self.dispatch(
            agent,
            ActionKind::SendEmail,
            json!({"to": to, "subject": subject, "body": body}),
        )
        .await
    }

    pub async fn send_sms(&self, agent: AgentId, to: &str, body: &str) -> ActionOutcome {
        self.dispatch(agent, ActionKind::SendSms, json!({"to": to, "body": body}))
            .await
    }

    pub async fn make_call(&self, agent: AgentId, to: &str, script: &str) -> ActionOutcome {
        self.dispatch(agent, ActionKind::MakeCall, json!({"to": to, "script": script}))
            .await
    }

    pub async fn web_lookup(&self, agent: AgentId, query: &str) -> ActionOutcome {
        self.dispatch(agent, ActionKind::WebLookup, json!({"query": query}))
            .await
    }

    pub async fn run_financial_model(&self, agent: AgentId, model: &str, inputs: Value) -> ActionOutcome {
        self.dispatch(
            agent,
            ActionKind::RunFinancialModel,
            json!({"model": model, "inputs": inputs}),
        )
        .await
    }

    pub async fn financial_transaction(
        &self,
        agent: AgentId,
        amount: f64,
        description: &str,
    ) -> ActionOutcome {
        self.dispatch(
            agent,
            ActionKind::FinancialTransaction,
            json!({"amount": amount, "description": description}),
        )
        .await
    }

    pub async fn update_board(&self, agent: AgentId, board: &str, update: Value) -> ActionOutcome {
        self.dispatch(agent, ActionKind::UpdateBoard, json!({"board": board, "update": update}))
            .await
    }

    pub async fn update_classroom(&self, agent: AgentId, classroom: &str, update: Value) -> ActionOutcome {
        self.dispatch(
            agent,
            ActionKind::UpdateClassroom,
            json!({"classroom": classroom, "update": update}),
        )
        .await
    }
}
