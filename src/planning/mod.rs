//! 规划与执行：意图分析 → 计划构建 → 步骤执行 → 交付物合成，由编排器串联

pub mod executor;
pub mod intent;
pub mod orchestrator;
pub mod plan;
pub mod synthesizer;
pub mod templates;

pub use executor::{StepContext, StepExecution, StepExecutor};
pub use intent::{fallback_intent, Category, Complexity, IntentAnalyzer, IntentDescriptor, IntentSource};
pub use orchestrator::{PlanOrchestrator, PlanOutcome, PlanRepository};
pub use plan::{
    Deliverable, DeliverableType, OutputSource, Plan, PlanBuilder, PlanStatus, PlanStep, SharedPlan,
    StepKind, StepStatus, DELEGATION_TOOL, RESEARCH_TOOL, SYNTHESIS_TOOL,
};
pub use synthesizer::{concatenate_outputs, DeliverableSynthesizer, Synthesis, DEFAULT_SEPARATOR};
