//! 计划编排器：start → analyze → plan → (execute step)* → synthesize → respond → done
//!
//! 每个阶段先发出 thinking 思考，阶段结束时置为 complete / failed；
//! 凡是 LLM 失败后走了降级（规则分类、模板输出、拼接、模板回复）的阶段都记为 failed。
//! 步骤严格顺序执行。所有 LLM 失败都在内部降级，process 总是返回完整的 PlanOutcome。
//! 计划、思考流、记忆都通过注入的对象持有，多个编排器实例互不影响。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use crate::agents::AgentId;
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{Generator, LlmClient};
use crate::memory::MemoryStore;
use crate::planning::executor::{StepContext, StepExecutor};
use crate::planning::intent::{IntentAnalyzer, IntentDescriptor, IntentSource};
use crate::planning::plan::{
    Deliverable, OutputSource, Plan, PlanBuilder, PlanStatus, SharedPlan, StepKind, StepStatus,
};
use crate::planning::synthesizer::DeliverableSynthesizer;
use crate::thoughts::{ThoughtStatus, ThoughtStream, ThoughtType};

/// 计划仓库：按 Agent 保存最近 capacity 个计划，超出时淘汰最早的
pub struct PlanRepository {
    plans: RwLock<HashMap<AgentId, VecDeque<SharedPlan>>>,
    capacity: usize,
}

impl PlanRepository {
    pub fn new(capacity: usize) -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, plan: SharedPlan) {
        let agent = plan.read().agent_id;
        let mut plans = self.plans.write();
        let history = plans.entry(agent).or_default();
        history.push_back(plan);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    pub fn latest_for(&self, agent: AgentId) -> Option<SharedPlan> {
        self.plans.read().get(&agent).and_then(|v| v.back().cloned())
    }

    /// 某 Agent 保留的计划，从旧到新
    pub fn list_for(&self, agent: AgentId) -> Vec<SharedPlan> {
        self.plans
            .read()
            .get(&agent)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// 一次请求的处理结果
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub run_id: String,
    pub plan: SharedPlan,
    pub intent: IntentDescriptor,
    pub response: String,
    pub response_source: OutputSource,
}

impl PlanOutcome {
    pub fn snapshot(&self) -> Plan {
        self.plan.read().clone()
    }

    pub fn status(&self) -> PlanStatus {
        self.plan.read().status
    }

    pub fn deliverable(&self) -> Option<Deliverable> {
        self.plan.read().deliverables.first().cloned()
    }
}

/// 绑定到某次 run 的思考流写入
struct Run<'a> {
    stream: &'a ThoughtStream,
    agent: AgentId,
    run_id: String,
}

impl Run<'_> {
    fn begin(&self, kind: ThoughtType, content: impl Into<String>) -> Option<String> {
        self.stream.begin(self.agent, &self.run_id, kind, content)
    }

    fn finish(&self, thought: Option<String>, status: ThoughtStatus, result: impl Into<String>) {
        if let Some(id) = thought {
            self.stream
                .finish(self.agent, &self.run_id, &id, status, Some(result.into()));
        }
    }

    fn progress(&self) {
        self.stream.notify_progress(self.agent, &self.run_id);
    }
}

pub struct PlanOrchestrator {
    analyzer: IntentAnalyzer,
    builder: PlanBuilder,
    executor: StepExecutor,
    synthesizer: DeliverableSynthesizer,
    generator: Generator,
    thoughts: ThoughtStream,
    repository: Arc<PlanRepository>,
    memory: Arc<MemoryStore>,
    history_messages: usize,
}

impl PlanOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, cfg: &AppConfig) -> Self {
        let generator = Generator::new(llm, Duration::from_secs(cfg.llm.timeout_secs));
        Self {
            analyzer: IntentAnalyzer::new(generator.clone()),
            builder: PlanBuilder::new(),
            executor: StepExecutor::new(generator.clone(), cfg.planning.template_fallback),
            synthesizer: DeliverableSynthesizer::new(
                generator.clone(),
                cfg.planning.deliverable_separator.clone(),
            ),
            generator,
            thoughts: ThoughtStream::new(),
            repository: Arc::new(PlanRepository::new(cfg.planning.max_plans_per_agent)),
            memory: Arc::new(MemoryStore::new(
                cfg.app.memory_max_messages,
                cfg.app.memory_max_learnings,
            )),
            history_messages: cfg.planning.history_messages,
        }
    }

    pub fn with_thought_stream(mut self, thoughts: ThoughtStream) -> Self {
        self.thoughts = thoughts;
        self
    }

    pub fn with_repository(mut self, repository: Arc<PlanRepository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn thoughts(&self) -> &ThoughtStream {
        &self.thoughts
    }

    pub fn repository(&self) -> &Arc<PlanRepository> {
        &self.repository
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// 按名称指定 Agent
    pub async fn process_named(&self, agent: &str, request: &str) -> Result<PlanOutcome, AgentError> {
        let agent: AgentId = agent.parse()?;
        Ok(self.process(agent, request).await)
    }

    /// 处理一条请求；替换该 Agent 当前的思考过程
    pub async fn process(&self, agent: AgentId, request: &str) -> PlanOutcome {
        let run = Run {
            stream: &self.thoughts,
            agent,
            run_id: self.thoughts.start(agent),
        };
        tracing::info!(agent = %agent, run_id = %run.run_id, "Processing request");

        // analyze
        let thought = run.begin(ThoughtType::Analysis, format!("Analyzing request: {}", request.trim()));
        let intent = self.analyzer.analyze(agent, request).await;
        let summary = format!(
            "{} request ({:?}), tools: {}",
            intent.category.as_str(),
            intent.complexity,
            intent.tools_needed.join(", ")
        );
        match intent.source {
            IntentSource::Model => run.finish(thought, ThoughtStatus::Complete, summary),
            IntentSource::Rules => run.finish(
                thought,
                ThoughtStatus::Failed,
                format!("Classification fell back to rules: {summary}"),
            ),
        }

        // plan
        let thought = run.begin(ThoughtType::Planning, "Building execution plan");
        let plan = self.builder.build(agent, request, &intent).into_shared();
        let (plan_id, step_count) = {
            let mut guard = plan.write();
            guard.status = PlanStatus::Executing;
            (guard.id.clone(), guard.steps.len())
        };
        self.repository.insert(plan.clone());
        self.thoughts.attach_plan(agent, &run.run_id, plan.clone());
        tracing::info!(agent = %agent, plan_id = %plan_id, steps = step_count, "Plan created");
        run.finish(thought, ThoughtStatus::Complete, format!("{step_count} steps planned"));

        // execute
        let ctx = StepContext {
            owner: agent,
            request,
            intent: &intent,
        };
        let notify = || run.progress();
        for index in 0..step_count {
            let (kind, description) = {
                let guard = plan.read();
                let step = &guard.steps[index];
                (step.kind, step.description.clone())
            };
            if kind == StepKind::Synthesis {
                continue;
            }
            let thought_kind = if kind == StepKind::Delegation {
                ThoughtType::Delegation
            } else {
                ThoughtType::Execution
            };
            let thought = run.begin(thought_kind, description);
            match self.executor.execute(&plan, index, &ctx, &notify).await {
                Some(exec) if exec.source == Some(OutputSource::Model) => {
                    run.finish(thought, ThoughtStatus::Complete, exec.output_preview.unwrap_or_default())
                }
                Some(exec) if exec.status == StepStatus::Completed => run.finish(
                    thought,
                    ThoughtStatus::Failed,
                    format!(
                        "Generation failed ({}), template output used",
                        exec.error.unwrap_or_default()
                    ),
                ),
                Some(exec) => run.finish(
                    thought,
                    ThoughtStatus::Failed,
                    exec.error.unwrap_or_else(|| "Step failed".to_string()),
                ),
                None => run.finish(thought, ThoughtStatus::Failed, "Step could not be started"),
            }
        }

        // synthesize
        let thought = run.begin(ThoughtType::Synthesis, "Synthesizing deliverable");
        let synthesis = self.synthesizer.synthesize(&plan, agent, &intent, &notify).await;
        match &synthesis.deliverable {
            Some(d) if synthesis.source == Some(OutputSource::Model) => run.finish(
                thought,
                ThoughtStatus::Complete,
                format!("{} from {} step outputs", d.title, synthesis.inputs),
            ),
            Some(d) => run.finish(
                thought,
                ThoughtStatus::Failed,
                format!("Generation failed, {} concatenated from {} step outputs", d.title, synthesis.inputs),
            ),
            None => run.finish(thought, ThoughtStatus::Failed, "No completed steps to synthesize"),
        }

        let status = {
            let mut guard = plan.write();
            guard.status = if guard.deliverables.is_empty() {
                PlanStatus::Failed
            } else {
                PlanStatus::Completed
            };
            guard.completed_at = Some(Utc::now());
            guard.status
        };
        run.progress();

        // respond
        let thought = run.begin(ThoughtType::Review, "Preparing response");
        let (response, response_source) = self.respond(agent, request, &plan).await;
        run.finish(
            thought,
            if response_source == OutputSource::Model {
                ThoughtStatus::Complete
            } else {
                ThoughtStatus::Failed
            },
            response.chars().take(160).collect::<String>(),
        );

        self.memory.record_exchange(agent, request, &response);
        self.memory.add_learning(
            agent,
            format!(
                "{}: {} → {}",
                intent.category.as_str(),
                intent.tools_needed.join(", "),
                match status {
                    PlanStatus::Completed => "completed",
                    _ => "failed",
                }
            ),
        );

        self.thoughts.complete(agent, &run.run_id);
        {
            let guard = plan.read();
            tracing::info!(
                agent = %agent,
                plan_id = %plan_id,
                status = ?status,
                completed = guard.count_status(StepStatus::Completed),
                failed = guard.count_status(StepStatus::Failed),
                "Plan finished"
            );
        }

        PlanOutcome {
            run_id: run.run_id,
            plan,
            intent,
            response,
            response_source,
        }
    }

    /// 最终回复：一次带对话历史的 LLM 调用，失败时使用模板
    async fn respond(&self, agent: AgentId, request: &str, plan: &SharedPlan) -> (String, OutputSource) {
        let profile = agent.profile();
        let summary = {
            let guard = plan.read();
            let steps: Vec<String> = guard
                .steps
                .iter()
                .map(|s| format!("- {} [{:?}]", s.description, s.status))
                .collect();
            let deliverable = guard
                .deliverables
                .first()
                .map(|d| format!("Deliverable \"{}\":\n{}", d.title, d.content))
                .unwrap_or_else(|| "No deliverable was produced.".to_string());
            format!("Plan status: {:?}\nSteps:\n{}\n\n{}", guard.status, steps.join("\n"), deliverable)
        };
        let prompt = format!(
            "The user asked: {request}\n\n{summary}\n\n\
             Reply to the user in a few sentences: what was done and what they should look at next."
        );
        let history = self.memory.recent_messages(agent, self.history_messages);

        match self
            .generator
            .generate_with_history(&profile.system_prompt(), &history, &prompt)
            .await
        {
            Ok(text) => (text, OutputSource::Model),
            Err(e) => {
                tracing::warn!(agent = %agent, error = %e, "Response generation fell back to template");
                (fallback_response(agent, request, plan), OutputSource::Template)
            }
        }
    }
}

fn fallback_response(agent: AgentId, request: &str, plan: &SharedPlan) -> String {
    let profile = agent.profile();
    let guard = plan.read();
    let total = guard.steps.len();
    let completed = guard.count_status(StepStatus::Completed);
    match guard.deliverables.first() {
        Some(d) => format!(
            "{} here. I worked through {completed} of {total} steps for \"{}\" and prepared \"{}\".\n\n{}",
            profile.display_name,
            request.trim(),
            d.title,
            d.content
        ),
        None => format!(
            "{} here. I couldn't finish \"{}\" this time. None of the {total} planned steps produced a result, \
             so please try again shortly.",
            profile.display_name,
            request.trim()
        ),
    }
}
