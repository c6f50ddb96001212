//! 对外可见的副作用动作：消息、邮件、短信、电话、网页查询、财务模型、转账、看板 / 课堂更新
//!
//! 所有动作都经由 [`ActionDispatcher`]：先过权限门，再调用外部网关；
//! 网关失败时返回带 queued_for_retry 补位载荷的结构化结果，不向调用方抛错。

pub mod dispatcher;
pub mod gateway;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use dispatcher::{ActionDispatcher, ActionOutcome};
pub use gateway::{
    create_gateway_from_config, ActionGateway, GatewayError, GatewayResponse, HttpActionGateway,
    UnconfiguredGateway,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendMessage,
    SendEmail,
    SendSms,
    MakeCall,
    WebLookup,
    RunFinancialModel,
    FinancialTransaction,
    UpdateBoard,
    UpdateClassroom,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::SendMessage,
        ActionKind::SendEmail,
        ActionKind::SendSms,
        ActionKind::MakeCall,
        ActionKind::WebLookup,
        ActionKind::RunFinancialModel,
        ActionKind::FinancialTransaction,
        ActionKind::UpdateBoard,
        ActionKind::UpdateClassroom,
    ];

    /// 权限表与网关使用的动作名
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::SendMessage => "send_message",
            ActionKind::SendEmail => "send_email",
            ActionKind::SendSms => "send_sms",
            ActionKind::MakeCall => "make_call",
            ActionKind::WebLookup => "web_lookup",
            ActionKind::RunFinancialModel => "run_financial_model",
            ActionKind::FinancialTransaction => "financial_transaction",
            ActionKind::UpdateBoard => "update_board",
            ActionKind::UpdateClassroom => "update_classroom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// 审批单上的人类可读描述
    pub fn describe(&self, params: &Value) -> String {
        let field = |key: &str| params.get(key).and_then(Value::as_str).unwrap_or("?");
        match self {
            ActionKind::SendMessage => format!("Send a message to {}", field("to")),
            ActionKind::SendEmail => format!("Send an email to {}: {}", field("to"), field("subject")),
            ActionKind::SendSms => format!("Send an SMS to {}", field("to")),
            ActionKind::MakeCall => format!("Place a call to {}", field("to")),
            ActionKind::WebLookup => format!("Look up \"{}\" on the web", field("query")),
            ActionKind::RunFinancialModel => format!("Run financial model {}", field("model")),
            ActionKind::FinancialTransaction => format!(
                "Financial transaction of {}: {}",
                params.get("amount").map(Value::to_string).unwrap_or_else(|| "?".to_string()),
                field("description")
            ),
            ActionKind::UpdateBoard => format!("Update board {}", field("board")),
            ActionKind::UpdateClassroom => format!("Update classroom {}", field("classroom")),
        }
    }

    /// 网关失败时返回给调用方的补位载荷
    pub fn fallback_payload(&self, params: &Value) -> Value {
        let mut payload = json!({
            "status": "queued_for_retry",
            "action": self.name(),
            "queued_params": params,
        });
        let extra = match self {
            ActionKind::SendMessage | ActionKind::SendEmail | ActionKind::SendSms => json!({
                "delivered": false,
                "message": "Message saved and will be sent when the channel is available",
            }),
            ActionKind::MakeCall => json!({
                "connected": false,
                "message": "Call scheduled for retry",
            }),
            ActionKind::WebLookup => json!({
                "results": [],
                "message": "Lookup queued; no live results available",
            }),
            ActionKind::RunFinancialModel => json!({
                "projections": null,
                "message": "Model run queued; showing no projections yet",
            }),
            ActionKind::FinancialTransaction => json!({
                "executed": false,
                "message": "Transaction queued; no funds moved",
            }),
            ActionKind::UpdateBoard | ActionKind::UpdateClassroom => json!({
                "synced": false,
                "message": "Update saved locally and queued for sync",
            }),
        };
        if let (Some(obj), Value::Object(extra)) = (payload.as_object_mut(), extra) {
            obj.extend(extra);
        }
        payload
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ActionKind::from_name("launch_rocket"), None);
    }

    #[test]
    fn test_fallback_payload_is_queued() {
        let params = json!({"query": "competitor pricing"});
        let payload = ActionKind::WebLookup.fallback_payload(&params);
        assert_eq!(payload["status"], "queued_for_retry");
        assert_eq!(payload["action"], "web_lookup");
        assert_eq!(payload["queued_params"], params);
        assert!(payload["results"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_describe_uses_params() {
        let text = ActionKind::SendEmail.describe(&json!({"to": "ceo@acme.test", "subject": "Q3"}));
        assert_eq!(text, "Send an email to ceo@acme.test: Q3");
        assert!(ActionKind::MakeCall.describe(&json!({})).contains('?'));
    }
}
