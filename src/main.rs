//! Opsdesk 演示入口
//!
//! 用法：`opsdesk <agent> <request> [<agent> <request> ...]`
//! 每对参数交给对应 Agent 处理（不同 Agent 并发执行），打印思考时间线与最终回复；
//! 最后演示一次需要审批的动作与手动重放。

use std::sync::Arc;

use anyhow::Context;
use futures_util::future::join_all;
use opsdesk::{
    config::{load_config, AppConfig},
    llm::create_llm_from_config,
    observability,
    store::{AuditLog, InMemoryRecordStore, RecordStore},
    ActionDispatcher, AgentId, PermissionManager, PermissionPolicy, PlanOrchestrator,
};

#[cfg(feature = "async-sqlite")]
async fn open_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    match &cfg.store.sqlite_path {
        Some(path) => {
            let store = opsdesk::store::SqliteRecordStore::open(path)
                .await
                .context("Failed to open SQLite store")?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryRecordStore::new())),
    }
}

#[cfg(not(feature = "async-sqlite"))]
async fn open_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    if cfg.store.sqlite_path.is_some() {
        tracing::warn!("sqlite_path set but the async-sqlite feature is disabled, using memory store");
    }
    Ok(Arc::new(InMemoryRecordStore::new()))
}

fn request_pairs(args: &[String]) -> anyhow::Result<Vec<(AgentId, String)>> {
    if args.is_empty() {
        return Ok(vec![
            (AgentId::Finance, "Refresh next quarter's budget forecast".to_string()),
            (AgentId::Marketing, "Plan a launch campaign together with sales".to_string()),
        ]);
    }
    anyhow::ensure!(args.len() % 2 == 0, "expected <agent> <request> pairs");
    args.chunks(2)
        .map(|pair| -> anyhow::Result<(AgentId, String)> {
            let agent: AgentId = pair[0].parse()?;
            Ok((agent, pair[1].clone()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let requests = request_pairs(&args)?;

    let store = open_store(&cfg).await?;
    let audit = AuditLog::new(store);

    let orchestrator = PlanOrchestrator::new(create_llm_from_config(&cfg), &cfg);
    let outcomes = join_all(
        requests
            .iter()
            .map(|(agent, text)| orchestrator.process(*agent, text)),
    )
    .await;

    for ((agent, _), outcome) in requests.iter().zip(&outcomes) {
        println!("=== {} ({}) ===", agent.profile().display_name, agent);
        if let Some(thought) = orchestrator.thoughts().current(*agent) {
            for step in &thought.thoughts {
                println!(
                    "  [{:?}] {:?}: {} ({} ms)",
                    step.status,
                    step.kind,
                    step.content,
                    step.duration_ms.unwrap_or(0)
                );
            }
        }
        let plan = outcome.snapshot();
        println!("  plan {} -> {:?}, {} deliverable(s)", plan.id, plan.status, plan.deliverables.len());
        println!("\n{}\n", outcome.response);
    }

    let permissions = Arc::new(
        PermissionManager::new(PermissionPolicy::from_config(&cfg.permissions))
            .with_retention(cfg.permissions.max_settled_requests)
            .with_audit(audit.clone()),
    );
    permissions.on_resolution(AgentId::Sales, |req| {
        println!("Sales notified: {} is {:?}", req.id, req.status);
    });
    let dispatcher = ActionDispatcher::from_config(&cfg.actions, permissions.clone()).with_audit(audit);

    let outcome = dispatcher
        .send_email(AgentId::Sales, "buyer@example.com", "Proposal", "Attached is our proposal.")
        .await;
    println!("send_email -> {}", serde_json::to_string(&outcome)?);
    if let Some(request_id) = outcome.request_id() {
        permissions.approve(request_id).await?;
        let replayed = dispatcher.replay(request_id).await?;
        println!("replay -> {}", serde_json::to_string(&replayed)?);
    }

    Ok(())
}
