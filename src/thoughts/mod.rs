//! 思考流：每个 Agent 当前一次请求的推理过程（ThoughtStep 序列 + 共享 Plan）
//!
//! 新请求会整体替换该 Agent 的 AgentThought（旧思考直接丢弃）。
//! 变更通过 [`ThoughtStream`] 同步推送给订阅者，另提供 broadcast 通道供异步消费。

pub mod stream;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::planning::{Plan, SharedPlan};

pub use stream::{Subscription, ThoughtStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    Analysis,
    Planning,
    Execution,
    Delegation,
    Synthesis,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtStatus {
    Thinking,
    Complete,
    Failed,
}

/// 单条思考；status 离开 thinking 后不再变化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtStep {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ThoughtType,
    pub content: String,
    pub status: ThoughtStatus,
    pub created_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub result: Option<String>,
}

/// 某个 Agent 的当前推理过程
#[derive(Debug, Clone)]
pub struct AgentThought {
    pub agent_id: AgentId,
    /// 每次请求一个 run_id，用于丢弃被替换请求的后续写入
    pub run_id: String,
    pub thoughts: Vec<ThoughtStep>,
    /// 与编排器持有的是同一个 Plan
    pub plan: Option<SharedPlan>,
    pub is_thinking: bool,
    pub started_at: DateTime<Utc>,
}

impl AgentThought {
    fn new(agent_id: AgentId, run_id: String) -> Self {
        Self {
            agent_id,
            run_id,
            thoughts: Vec::new(),
            plan: None,
            is_thinking: true,
            started_at: Utc::now(),
        }
    }

    pub fn find(&self, thought_id: &str) -> Option<&ThoughtStep> {
        self.thoughts.iter().find(|t| t.id == thought_id)
    }

    pub fn last(&self) -> Option<&ThoughtStep> {
        self.thoughts.last()
    }

    /// 深拷贝为可序列化快照（plan 取当前内容）
    pub fn snapshot(&self) -> AgentThoughtSnapshot {
        AgentThoughtSnapshot {
            agent_id: self.agent_id,
            run_id: self.run_id.clone(),
            thoughts: self.thoughts.clone(),
            plan: self.plan.as_ref().map(|p| p.read().clone()),
            is_thinking: self.is_thinking,
            started_at: self.started_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentThoughtSnapshot {
    pub agent_id: AgentId,
    pub run_id: String,
    pub thoughts: Vec<ThoughtStep>,
    pub plan: Option<Plan>,
    pub is_thinking: bool,
    pub started_at: DateTime<Utc>,
}
