//! 步骤执行器
//!
//! 将一个 pending 步骤置为 running，按步骤归属 Agent 的身份拼接指令调用 LLM；
//! 失败（错误 / 超时 / 空回复）时用模板库补位。每个步骤必定到达终态。
//! 计划锁只在状态变更瞬间持有，LLM 调用期间不持锁。

use serde::Serialize;

use crate::agents::AgentId;
use crate::llm::{Generator, LlmError};
use crate::planning::intent::IntentDescriptor;
use crate::planning::plan::{OutputSource, SharedPlan, StepStatus};
use crate::planning::templates;

/// 单步执行所需的上下文
pub struct StepContext<'a> {
    pub owner: AgentId,
    pub request: &'a str,
    pub intent: &'a IntentDescriptor,
}

/// 单步执行结果
#[derive(Debug, Clone, Serialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    pub source: Option<OutputSource>,
    /// LLM 失败原因（走了补位或失败时）
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub output_preview: Option<String>,
}

const OUTPUT_PREVIEW_CHARS: usize = 160;

fn preview(text: &str) -> String {
    if text.chars().count() > OUTPUT_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OUTPUT_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

pub struct StepExecutor {
    generator: Generator,
    template_fallback: bool,
}

impl StepExecutor {
    pub fn new(generator: Generator, template_fallback: bool) -> Self {
        Self {
            generator,
            template_fallback,
        }
    }

    /// 执行 plan.steps[index]；on_change 在每次状态变更后（锁已释放）调用
    pub async fn execute(
        &self,
        plan: &SharedPlan,
        index: usize,
        ctx: &StepContext<'_>,
        on_change: &(dyn Fn() + Send + Sync),
    ) -> Option<StepExecution> {
        let step = {
            let mut guard = plan.write();
            let step = guard.steps.get_mut(index)?;
            if let Err(e) = step.start() {
                tracing::warn!(error = %e, "Step not started");
                return None;
            }
            step.clone()
        };
        on_change();

        let profile = step.agent_id.profile();
        let prompt = format!(
            "Original request (from the {owner} desk): {request}\n\
             Request category: {category}\n\
             Your expertise: {expertise}\n\
             Current step: {description}\n\
             Tool: {tool}\n\n\
             Produce the concrete output of this step in markdown.",
            owner = ctx.owner,
            request = ctx.request,
            category = ctx.intent.category.as_str(),
            expertise = profile.expertise.join(", "),
            description = step.description,
            tool = step.tool,
        );

        let generated: Result<String, LlmError> =
            self.generator.generate(&profile.system_prompt(), &prompt).await;

        let (outcome, error) = match generated {
            Ok(text) => (Some((text, OutputSource::Model)), None),
            Err(e) => {
                tracing::warn!(
                    step_id = %step.id,
                    tool = %step.tool,
                    error = %e,
                    "Step generation failed"
                );
                let fallback = self.template_fallback.then(|| {
                    (
                        templates::render(&step.tool, profile, ctx.request, &step.description),
                        OutputSource::Template,
                    )
                });
                (fallback, Some(e.to_string()))
            }
        };

        let execution = {
            let mut guard = plan.write();
            let current = guard.steps.get_mut(index)?;
            let (result, preview_text, source) = match outcome {
                Some((text, source)) => {
                    let p = preview(&text);
                    (current.complete(text, source), Some(p), Some(source))
                }
                None => (current.fail(), None, None),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Step not finished");
            }
            StepExecution {
                step_id: current.id.clone(),
                status: current.status,
                source,
                error,
                duration_ms: current.duration_ms,
                output_preview: preview_text,
            }
        };
        on_change();

        tracing::debug!(
            step_id = %execution.step_id,
            status = ?execution.status,
            source = ?execution.source,
            "Step finished"
        );
        Some(execution)
    }
}
