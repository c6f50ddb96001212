//! 交付物合成
//!
//! 汇总已完成（非合成）步骤的输出，调用一次 LLM 生成交付物；失败时按分隔符原样拼接。
//! 没有任何已完成步骤时跳过合成步骤，不产生交付物。

use chrono::Utc;
use uuid::Uuid;

use crate::agents::AgentId;
use crate::llm::Generator;
use crate::planning::intent::IntentDescriptor;
use crate::planning::plan::{
    Deliverable, DeliverableType, OutputSource, SharedPlan, StepKind, StepStatus,
};

/// 默认分隔符
pub const DEFAULT_SEPARATOR: &str = "\n\n---\n\n";

/// 原样拼接
pub fn concatenate_outputs<S: AsRef<str>>(outputs: &[S], separator: &str) -> String {
    outputs
        .iter()
        .map(|o| o.as_ref())
        .collect::<Vec<_>>()
        .join(separator)
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub deliverable: Option<Deliverable>,
    pub source: Option<OutputSource>,
    pub inputs: usize,
}

pub struct DeliverableSynthesizer {
    generator: Generator,
    separator: String,
}

impl DeliverableSynthesizer {
    pub fn new(generator: Generator, separator: impl Into<String>) -> Self {
        Self {
            generator,
            separator: separator.into(),
        }
    }

    /// 执行计划末尾的合成步骤
    pub async fn synthesize(
        &self,
        plan: &SharedPlan,
        owner: AgentId,
        intent: &IntentDescriptor,
        on_change: &(dyn Fn() + Send + Sync),
    ) -> Synthesis {
        let (synthesis_index, outputs, objective) = {
            let mut guard = plan.write();
            let index = guard
                .steps
                .iter()
                .rposition(|s| s.kind == StepKind::Synthesis);
            let outputs: Vec<String> = guard
                .steps
                .iter()
                .filter(|s| s.kind != StepKind::Synthesis && s.status == StepStatus::Completed)
                .filter_map(|s| s.output.clone())
                .collect();

            if let Some(i) = index {
                let step = &mut guard.steps[i];
                let transition = if outputs.is_empty() {
                    step.skip()
                } else {
                    step.start()
                };
                if let Err(e) = transition {
                    tracing::warn!(error = %e, "Synthesis step transition rejected");
                }
            }
            (index, outputs, guard.objective.clone())
        };
        on_change();

        if outputs.is_empty() {
            tracing::warn!(plan_objective = %objective, "No completed steps, skipping synthesis");
            return Synthesis {
                deliverable: None,
                source: None,
                inputs: 0,
            };
        }

        let profile = owner.profile();
        let joined = concatenate_outputs(&outputs, &self.separator);
        let prompt = format!(
            "Combine the following step results into one cohesive {category} deliverable \
             for the request \"{objective}\". Use markdown headings and keep every concrete figure.\n\n\
             {joined}",
            category = intent.category.as_str(),
        );

        let (content, source) = match self.generator.generate(&profile.system_prompt(), &prompt).await {
            Ok(text) => (text, OutputSource::Model),
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis fell back to concatenation");
                (joined, OutputSource::Concatenation)
            }
        };

        let deliverable = Deliverable {
            id: format!("deliverable_{}", Uuid::new_v4()),
            kind: DeliverableType::for_category(intent.category),
            title: deliverable_title(intent, &objective),
            content: content.clone(),
            format: "markdown".to_string(),
            created_at: Utc::now(),
            agent_id: owner,
        };

        {
            let mut guard = plan.write();
            guard.deliverables.push(deliverable.clone());
            if let Some(i) = synthesis_index {
                if let Err(e) = guard.steps[i].complete(content, source) {
                    tracing::warn!(error = %e, "Synthesis step not completed");
                }
            }
        }
        on_change();

        Synthesis {
            deliverable: Some(deliverable),
            source: Some(source),
            inputs: outputs.len(),
        }
    }
}

fn deliverable_title(intent: &IntentDescriptor, objective: &str) -> String {
    let kind = match DeliverableType::for_category(intent.category) {
        DeliverableType::Report => "Report",
        DeliverableType::Analysis => "Analysis",
        DeliverableType::Document => "Document",
        DeliverableType::Plan => "Plan",
        DeliverableType::Recommendation => "Recommendation",
        DeliverableType::Data => "Data",
        DeliverableType::Code => "Code",
    };
    let subject: String = objective.trim().chars().take(60).collect();
    format!("{kind}: {subject}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::llm::MockLlmClient;
    use crate::planning::intent::fallback_intent;
    use crate::planning::plan::PlanBuilder;

    fn synthesizer(mock: MockLlmClient) -> DeliverableSynthesizer {
        DeliverableSynthesizer::new(
            Generator::new(Arc::new(mock), Duration::from_millis(200)),
            DEFAULT_SEPARATOR,
        )
    }

    fn plan_with_outputs(outputs: &[&str]) -> (SharedPlan, IntentDescriptor) {
        let request = "Plan next year's budget";
        let intent = fallback_intent(AgentId::Finance.profile(), request);
        let mut plan = PlanBuilder::new().build(AgentId::Finance, request, &intent);
        for (step, out) in plan.steps.iter_mut().zip(outputs) {
            step.start().unwrap();
            step.complete(out.to_string(), OutputSource::Model).unwrap();
        }
        (plan.into_shared(), intent)
    }

    #[test]
    fn test_concatenation_keeps_order_and_separator() {
        let joined = concatenate_outputs(&["a", "b", "c"], DEFAULT_SEPARATOR);
        let parts: Vec<_> = joined.split(DEFAULT_SEPARATOR).collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failed_synthesis_concatenates_outputs() {
        let (plan, intent) = plan_with_outputs(&["research out", "budget out"]);
        let result = synthesizer(MockLlmClient::failing())
            .synthesize(&plan, AgentId::Finance, &intent, &|| {})
            .await;

        assert_eq!(result.source, Some(OutputSource::Concatenation));
        let deliverable = result.deliverable.unwrap();
        assert_eq!(deliverable.content, format!("research out{DEFAULT_SEPARATOR}budget out"));
        assert_eq!(deliverable.kind, DeliverableType::Plan);
        assert_eq!(deliverable.format, "markdown");

        let guard = plan.read();
        assert_eq!(guard.deliverables.len(), 1);
        assert_eq!(guard.last_step().unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_no_completed_steps_skips_synthesis() {
        let (plan, intent) = plan_with_outputs(&[]);
        let mock = MockLlmClient::echo();
        let result = synthesizer(mock)
            .synthesize(&plan, AgentId::Finance, &intent, &|| {})
            .await;
        assert!(result.deliverable.is_none());
        let guard = plan.read();
        assert!(guard.deliverables.is_empty());
        assert_eq!(guard.last_step().unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_model_synthesis_is_used() {
        let (plan, intent) = plan_with_outputs(&["one"]);
        let result = synthesizer(MockLlmClient::fixed("# Unified plan"))
            .synthesize(&plan, AgentId::Finance, &intent, &|| {})
            .await;
        assert_eq!(result.source, Some(OutputSource::Model));
        assert_eq!(result.inputs, 1);
        assert_eq!(plan.read().deliverables[0].content, "# Unified plan");
    }
}
