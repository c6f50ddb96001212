//! 计划数据模型与 PlanBuilder
//!
//! Plan 由若干 PlanStep 组成，顺序固定：调研 → 工具步骤 → 委派步骤 → 合成（唯一且总在最后）。
//! 步骤状态只能 pending → running → completed | failed（或 pending → skipped），不可回退。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::agents::AgentId;
use crate::planning::intent::{Category, IntentDescriptor};

/// 调研步骤使用的工具名
pub const RESEARCH_TOOL: &str = "research_analysis";
/// 委派步骤使用的工具名
pub const DELEGATION_TOOL: &str = "delegate_task";
/// 合成步骤使用的工具名
pub const SYNTHESIS_TOOL: &str = "synthesize_deliverable";

/// 编排器与思考流共享同一个 Plan 实例
pub type SharedPlan = Arc<RwLock<Plan>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// 步骤在计划中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Research,
    Tool,
    Delegation,
    Synthesis,
}

/// 步骤输出的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    /// LLM 生成
    Model,
    /// 模板库补位
    Template,
    /// 合成失败时的原样拼接
    Concatenation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableType {
    Report,
    Analysis,
    Document,
    Plan,
    Recommendation,
    Data,
    Code,
}

impl DeliverableType {
    /// 意图类别 → 交付物类型，未列出的类别为 Report
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Analysis => DeliverableType::Analysis,
            Category::Planning => DeliverableType::Plan,
            Category::Creation => DeliverableType::Document,
            Category::Research => DeliverableType::Report,
            Category::Optimization => DeliverableType::Recommendation,
            Category::Financial => DeliverableType::Data,
            Category::Communication => DeliverableType::Document,
            Category::General => DeliverableType::Report,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DeliverableType,
    pub title: String,
    pub content: String,
    pub format: String,
    pub created_at: DateTime<Utc>,
    pub agent_id: AgentId,
}

#[derive(Debug, Error)]
#[error("Step {step_id}: invalid transition {from:?} -> {to:?}")]
pub struct StepTransitionError {
    pub step_id: String,
    pub from: StepStatus,
    pub to: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub kind: StepKind,
    pub description: String,
    pub tool: String,
    pub status: StepStatus,
    pub input: String,
    pub output: Option<String>,
    pub output_source: Option<OutputSource>,
    /// 委派步骤归属协作者，其余归属发起 Agent
    pub agent_id: AgentId,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl PlanStep {
    fn new(kind: StepKind, agent_id: AgentId, tool: &str, description: String, input: &str) -> Self {
        Self {
            id: format!("step_{}", Uuid::new_v4()),
            kind,
            description,
            tool: tool.to_string(),
            status: StepStatus::Pending,
            input: input.to_string(),
            output: None,
            output_source: None,
            agent_id,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    fn transition(&mut self, to: StepStatus) -> Result<(), StepTransitionError> {
        let allowed = matches!(
            (self.status, to),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
        );
        if !allowed {
            return Err(StepTransitionError {
                step_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), StepTransitionError> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(
        &mut self,
        output: String,
        source: OutputSource,
    ) -> Result<(), StepTransitionError> {
        self.transition(StepStatus::Completed)?;
        self.output = Some(output);
        self.output_source = Some(source);
        self.stamp_finish();
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), StepTransitionError> {
        self.transition(StepStatus::Failed)?;
        self.stamp_finish();
        Ok(())
    }

    pub fn skip(&mut self) -> Result<(), StepTransitionError> {
        self.transition(StepStatus::Skipped)
    }

    /// duration = completed_at - started_at
    fn stamp_finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub agent_id: AgentId,
    pub objective: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deliverables: Vec<Deliverable>,
    pub collaborators: BTreeSet<AgentId>,
}

impl Plan {
    pub fn last_step(&self) -> Option<&PlanStep> {
        self.steps.last()
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
    }

    pub fn count_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, PlanStatus::Completed | PlanStatus::Failed)
    }

    pub fn into_shared(self) -> SharedPlan {
        Arc::new(RwLock::new(self))
    }
}

/// 将意图描述转为计划
#[derive(Debug, Default, Clone)]
pub struct PlanBuilder;

impl PlanBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, owner: AgentId, request: &str, intent: &IntentDescriptor) -> Plan {
        let mut steps = Vec::with_capacity(intent.tools_needed.len() + intent.delegate_to.len() + 2);

        steps.push(PlanStep::new(
            StepKind::Research,
            owner,
            RESEARCH_TOOL,
            format!("Research and analyze the request: {}", intent.intent),
            request,
        ));

        for tool in &intent.tools_needed {
            steps.push(PlanStep::new(
                StepKind::Tool,
                owner,
                tool,
                format!("Apply {} to the request", tool.replace('_', " ")),
                request,
            ));
        }

        for delegate in &intent.delegate_to {
            let profile = delegate.profile();
            steps.push(PlanStep::new(
                StepKind::Delegation,
                *delegate,
                DELEGATION_TOOL,
                format!(
                    "Delegate to {} ({}) for a {} perspective",
                    profile.display_name,
                    profile.role,
                    profile.expertise.first().copied().unwrap_or("specialist"),
                ),
                request,
            ));
        }

        steps.push(PlanStep::new(
            StepKind::Synthesis,
            owner,
            SYNTHESIS_TOOL,
            "Synthesize completed step outputs into a deliverable".to_string(),
            request,
        ));

        Plan {
            id: format!("plan_{}", Uuid::new_v4()),
            agent_id: owner,
            objective: request.to_string(),
            steps,
            status: PlanStatus::Planning,
            created_at: Utc::now(),
            completed_at: None,
            deliverables: Vec::new(),
            collaborators: intent.delegate_to.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::intent::{Complexity, IntentSource};

    fn intent(tools: &[&str], delegates: &[AgentId]) -> IntentDescriptor {
        IntentDescriptor {
            intent: "grow revenue".to_string(),
            complexity: Complexity::Moderate,
            tools_needed: tools.iter().map(|t| t.to_string()).collect(),
            requires_collaboration: !delegates.is_empty(),
            delegate_to: delegates.to_vec(),
            category: Category::Financial,
            source: IntentSource::Rules,
        }
    }

    #[test]
    fn test_step_order_is_fixed() {
        let plan = PlanBuilder::new().build(
            AgentId::Finance,
            "grow revenue",
            &intent(&["budget_forecast", "cash_flow_analysis"], &[AgentId::Strategist]),
        );
        let tools: Vec<_> = plan.steps.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(
            tools,
            vec![
                RESEARCH_TOOL,
                "budget_forecast",
                "cash_flow_analysis",
                DELEGATION_TOOL,
                SYNTHESIS_TOOL
            ]
        );
        assert_eq!(plan.status, PlanStatus::Planning);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_delegation_step_owned_by_delegate() {
        let plan = PlanBuilder::new().build(
            AgentId::Marketing,
            "launch",
            &intent(&["campaign_planner"], &[AgentId::Sales, AgentId::Research]),
        );
        let owners: Vec<_> = plan.steps.iter().map(|s| s.agent_id).collect();
        assert_eq!(
            owners,
            vec![
                AgentId::Marketing,
                AgentId::Marketing,
                AgentId::Sales,
                AgentId::Research,
                AgentId::Marketing
            ]
        );
        assert!(plan.collaborators.contains(&AgentId::Sales));
        assert_eq!(plan.collaborators.len(), 2);
    }

    #[test]
    fn test_step_transitions_are_one_way() {
        let mut plan = PlanBuilder::new().build(AgentId::Sales, "x", &intent(&["pipeline_review"], &[]));
        let step = &mut plan.steps[0];
        assert!(step.complete("early".into(), OutputSource::Model).is_err());
        step.start().unwrap();
        assert!(step.start().is_err());
        step.complete("done".into(), OutputSource::Model).unwrap();
        assert!(step.fail().is_err());
        assert!(step.duration_ms.is_some());
        assert_eq!(step.status, StepStatus::Completed);
    }

    #[test]
    fn test_category_to_deliverable_type() {
        assert_eq!(DeliverableType::for_category(Category::Planning), DeliverableType::Plan);
        assert_eq!(DeliverableType::for_category(Category::Financial), DeliverableType::Data);
        assert_eq!(DeliverableType::for_category(Category::General), DeliverableType::Report);
    }
}
