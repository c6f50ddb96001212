//! 动作分发集成测试：审批门控、幂等审批、回调通知、网关降级与手动重放

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use opsdesk::actions::{ActionGateway, GatewayError, GatewayResponse};
use opsdesk::permissions::{PermissionError, RequestStatus, FINANCIAL_TRANSACTION};
use opsdesk::store::{AuditLog, InMemoryRecordStore, AUDIT_COLLECTION};
use opsdesk::{ActionDispatcher, ActionKind, ActionOutcome, AgentError, AgentId, PermissionManager, PermissionPolicy};

/// 记录每次调用的网关；fail 为 true 时返回传输错误
#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<(String, Value)>>,
    fail: bool,
}

impl RecordingGateway {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ActionGateway for RecordingGateway {
    async fn invoke(&self, action: &str, params: &Value) -> Result<GatewayResponse, GatewayError> {
        self.calls.lock().push((action.to_string(), params.clone()));
        if self.fail {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        Ok(GatewayResponse {
            success: true,
            data: Some(json!({"id": "ext_1"})),
            error: None,
        })
    }
}

/// 前 failures 次调用失败，之后成功
struct FlakyGateway {
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyGateway {
    fn failing_times(n: usize) -> Self {
        Self {
            failures: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ActionGateway for FlakyGateway {
    async fn invoke(&self, _action: &str, _params: &Value) -> Result<GatewayResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Status {
                status: 503,
                body: "busy".into(),
            });
        }
        Ok(GatewayResponse {
            success: true,
            data: Some(json!({"delivered": true})),
            error: None,
        })
    }
}

/// 永不返回的网关，用于验证超时
struct HangingGateway;

#[async_trait]
impl ActionGateway for HangingGateway {
    async fn invoke(&self, _action: &str, _params: &Value) -> Result<GatewayResponse, GatewayError> {
        std::future::pending().await
    }
}

fn setup(gateway: Arc<dyn ActionGateway>, policy: PermissionPolicy) -> (ActionDispatcher, Arc<PermissionManager>) {
    let permissions = Arc::new(PermissionManager::new(policy));
    let dispatcher = ActionDispatcher::new(gateway, permissions.clone(), Duration::from_millis(200));
    (dispatcher, permissions)
}

#[tokio::test]
async fn test_gated_actions_never_reach_gateway() {
    let gateway = Arc::new(RecordingGateway::default());
    let (dispatcher, permissions) = setup(gateway.clone(), PermissionPolicy::default());

    let outcomes = vec![
        dispatcher.send_message(AgentId::Support, "cust_42", "Your refund is on the way").await,
        dispatcher.send_email(AgentId::Sales, "lead@acme.test", "Follow-up", "Hi!").await,
        dispatcher.send_sms(AgentId::Sales, "+15550100", "See you at 3").await,
        dispatcher.make_call(AgentId::Sales, "+15550100", "Intro call").await,
        dispatcher.update_board(AgentId::Operations, "ops-weekly", json!({"card": "ship"})).await,
        dispatcher.update_classroom(AgentId::Educator, "math-7", json!({"post": "quiz friday"})).await,
    ];

    assert_eq!(gateway.call_count(), 0);
    for outcome in &outcomes {
        let id = outcome.request_id().expect("pending outcome");
        assert_eq!(permissions.get(id).unwrap().status, RequestStatus::Pending);
    }
    assert_eq!(permissions.pending(AgentId::Sales).len(), 3);
    assert_eq!(permissions.all().len(), 6);
}

#[tokio::test]
async fn test_large_financial_transaction_requires_approval() {
    let gateway = Arc::new(RecordingGateway::default());
    let policy = PermissionPolicy::default()
        .with_threshold(1000.0)
        .with_override(FINANCIAL_TRANSACTION, false);
    let (dispatcher, _) = setup(gateway.clone(), policy);

    let small = dispatcher.financial_transaction(AgentId::Finance, 200.0, "Team lunch").await;
    assert!(small.is_completed());
    assert_eq!(gateway.call_count(), 1);

    let large = dispatcher.financial_transaction(AgentId::Finance, 5000.0, "Vendor deposit").await;
    assert!(large.is_pending());
    assert_eq!(gateway.call_count(), 1);

    // 无法判定金额时同样需要审批
    let unknown = dispatcher.financial_transaction(AgentId::Finance, f64::NAN, "Mystery wire").await;
    assert!(unknown.is_pending());
    let formatted = dispatcher
        .dispatch(
            AgentId::Finance,
            ActionKind::FinancialTransaction,
            json!({"amount": "5,000", "description": "Formatted amount"}),
        )
        .await;
    assert!(formatted.is_pending());
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn test_approve_and_deny_are_idempotent() {
    let (dispatcher, permissions) = setup(Arc::new(RecordingGateway::default()), PermissionPolicy::default());
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    permissions.on_resolution(AgentId::Marketing, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = dispatcher.send_email(AgentId::Marketing, "list@acme.test", "Launch", "Soon").await;
    let id = outcome.request_id().unwrap().to_string();

    assert!(permissions.deny(&id).await.unwrap().changed());
    assert!(!permissions.approve(&id).await.unwrap().changed());
    assert!(!permissions.deny(&id).await.unwrap().changed());

    assert_eq!(permissions.get(&id).unwrap().status, RequestStatus::Denied);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gateway_failure_returns_queued_fallback() {
    let gateway = Arc::new(RecordingGateway::failing());
    let (dispatcher, _) = setup(gateway.clone(), PermissionPolicy::default());

    match dispatcher.web_lookup(AgentId::Research, "market size").await {
        ActionOutcome::Failed { action, error, fallback } => {
            assert_eq!(action, ActionKind::WebLookup);
            assert!(error.contains("connection refused"));
            assert_eq!(fallback["status"], "queued_for_retry");
            assert_eq!(fallback["queued_params"]["query"], "market size");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn test_hanging_gateway_times_out_into_fallback() {
    let (dispatcher, _) = setup(Arc::new(HangingGateway), PermissionPolicy::default());
    let outcome = dispatcher
        .run_financial_model(AgentId::Finance, "dcf", json!({"years": 5}))
        .await;
    match outcome {
        ActionOutcome::Failed { error, fallback, .. } => {
            assert!(error.contains("timed out"));
            assert_eq!(fallback["status"], "queued_for_retry");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_replay_runs_approved_action_once() {
    let gateway = Arc::new(RecordingGateway::default());
    let (dispatcher, permissions) = setup(gateway.clone(), PermissionPolicy::default());

    let outcome = dispatcher.make_call(AgentId::Sales, "+15550100", "Renewal").await;
    let id = outcome.request_id().unwrap().to_string();

    // 审批前不能重放
    assert!(matches!(
        dispatcher.replay(&id).await,
        Err(AgentError::Permission(PermissionError::NotApproved { .. }))
    ));

    // 审批不会自动执行
    permissions.approve(&id).await.unwrap();
    assert_eq!(gateway.call_count(), 0);

    let replayed = dispatcher.replay(&id).await.unwrap();
    assert!(replayed.is_completed());
    {
        let calls = gateway.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "make_call");
        assert_eq!(calls[0].1["to"], "+15550100");
    }

    assert!(matches!(
        dispatcher.replay(&id).await,
        Err(AgentError::Permission(PermissionError::AlreadyReplayed(_)))
    ));
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn test_failed_replay_can_be_retried() {
    let gateway = Arc::new(FlakyGateway::failing_times(1));
    let (dispatcher, permissions) = setup(gateway.clone(), PermissionPolicy::default());

    let outcome = dispatcher.send_email(AgentId::Sales, "lead@acme.test", "Quote", "Attached").await;
    let id = outcome.request_id().unwrap().to_string();
    permissions.approve(&id).await.unwrap();

    match dispatcher.replay(&id).await.unwrap() {
        ActionOutcome::Failed { fallback, .. } => assert_eq!(fallback["status"], "queued_for_retry"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(permissions.get(&id).unwrap().replayed_at.is_none());

    let retried = dispatcher.replay(&id).await.unwrap();
    assert!(retried.is_completed());
    assert!(permissions.get(&id).unwrap().replayed_at.is_some());
    assert!(matches!(
        dispatcher.replay(&id).await,
        Err(AgentError::Permission(PermissionError::AlreadyReplayed(_)))
    ));
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dispatch_writes_audit_records() {
    let store = Arc::new(InMemoryRecordStore::new());
    let audit = AuditLog::new(store.clone());
    let permissions = Arc::new(PermissionManager::new(PermissionPolicy::default()).with_audit(audit.clone()));
    let dispatcher = ActionDispatcher::new(
        Arc::new(RecordingGateway::default()),
        permissions.clone(),
        Duration::from_millis(200),
    )
    .with_audit(audit.clone());

    let outcome = dispatcher.send_sms(AgentId::Support, "+15550111", "Ticket closed").await;
    permissions.approve(outcome.request_id().unwrap()).await.unwrap();

    let events: Vec<String> = audit
        .entries_for(AgentId::Support)
        .await
        .iter()
        .map(|e| e["event"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        events,
        vec!["permission_requested", "action_dispatched", "permission_resolved"]
    );
    assert_eq!(store.len(AUDIT_COLLECTION), 3);
}
