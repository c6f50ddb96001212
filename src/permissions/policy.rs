//! 权限门：动作名 → 是否需要审批 + 优先级
//!
//! 静态表可被配置覆盖；financial_transaction 另有金额规则（amount > 阈值即需审批），
//! 在覆盖之后生效。amount 存在但不是有限数字时一律需要审批。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentId;
use crate::config::PermissionsSection;

pub const FINANCIAL_TRANSACTION: &str = "financial_transaction";

/// 金额超过阈值的倍数时升为 critical
const CRITICAL_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// (动作, 是否需要审批, 优先级)
const ACTION_TABLE: &[(&str, bool, Priority)] = &[
    ("send_message", true, Priority::Medium),
    ("send_email", true, Priority::Medium),
    ("send_sms", true, Priority::Medium),
    ("make_call", true, Priority::High),
    ("update_board", true, Priority::Low),
    ("update_classroom", true, Priority::Low),
    (FINANCIAL_TRANSACTION, false, Priority::High),
    ("run_financial_model", false, Priority::Low),
    ("web_lookup", false, Priority::Low),
];

#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    overrides: HashMap<String, bool>,
    financial_threshold: f64,
    default_requires_approval: bool,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::from_config(&PermissionsSection::default())
    }
}

/// metadata.amount 的解析结果
#[derive(Debug, Clone, Copy, PartialEq)]
enum Amount {
    Absent,
    Valid(f64),
    /// 存在但无法解析，或不是有限数字（含 null、NaN、"5,000"）
    Invalid,
}

/// metadata.amount，数字或数字字符串
fn amount(metadata: &Value) -> Amount {
    let parsed = match metadata.get("amount") {
        None => return Amount::Absent,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(a) if a.is_finite() => Amount::Valid(a),
        _ => Amount::Invalid,
    }
}

impl PermissionPolicy {
    pub fn from_config(cfg: &PermissionsSection) -> Self {
        Self {
            overrides: cfg.overrides.clone(),
            financial_threshold: cfg.financial_threshold,
            default_requires_approval: cfg.default_requires_approval,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.financial_threshold = threshold;
        self
    }

    pub fn with_override(mut self, action: impl Into<String>, requires_approval: bool) -> Self {
        self.overrides.insert(action.into(), requires_approval);
        self
    }

    pub fn financial_threshold(&self) -> f64 {
        self.financial_threshold
    }

    fn table_entry(action: &str) -> Option<(bool, Priority)> {
        ACTION_TABLE
            .iter()
            .find(|(name, _, _)| *name == action)
            .map(|(_, required, priority)| (*required, *priority))
    }

    /// 该动作是否必须先审批
    pub fn requires_approval(&self, action: &str, agent: AgentId, metadata: &Value) -> bool {
        let base = self
            .overrides
            .get(action)
            .copied()
            .or_else(|| Self::table_entry(action).map(|(required, _)| required))
            .unwrap_or(self.default_requires_approval);

        let over_threshold = action == FINANCIAL_TRANSACTION
            && match amount(metadata) {
                Amount::Valid(a) => a > self.financial_threshold,
                Amount::Invalid => true,
                Amount::Absent => false,
            };

        let required = base || over_threshold;
        tracing::debug!(agent = %agent, action, required, "Permission check");
        required
    }

    pub fn priority_for(&self, action: &str, metadata: &Value) -> Priority {
        if action == FINANCIAL_TRANSACTION
            && matches!(amount(metadata), Amount::Valid(a) if a > self.financial_threshold * CRITICAL_MULTIPLIER)
        {
            return Priority::Critical;
        }
        Self::table_entry(action)
            .map(|(_, priority)| priority)
            .unwrap_or(Priority::Medium)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_table() {
        let policy = PermissionPolicy::default();
        let none = json!({});
        assert!(policy.requires_approval("send_email", AgentId::Sales, &none));
        assert!(policy.requires_approval("make_call", AgentId::Sales, &none));
        assert!(!policy.requires_approval("web_lookup", AgentId::Research, &none));
        assert!(!policy.requires_approval("run_financial_model", AgentId::Finance, &none));
    }

    #[test]
    fn test_financial_amount_rule_overrides_table() {
        let policy = PermissionPolicy::default()
            .with_threshold(1000.0)
            .with_override(FINANCIAL_TRANSACTION, false);
        assert!(policy.requires_approval(FINANCIAL_TRANSACTION, AgentId::Finance, &json!({"amount": 5000})));
        assert!(!policy.requires_approval(FINANCIAL_TRANSACTION, AgentId::Finance, &json!({"amount": 1000})));
        assert!(policy.requires_approval(FINANCIAL_TRANSACTION, AgentId::Finance, &json!({"amount": "1500.50"})));
        assert!(!policy.requires_approval(FINANCIAL_TRANSACTION, AgentId::Finance, &json!({"memo": "no amount"})));
    }

    #[test]
    fn test_unparsable_amount_requires_approval() {
        let policy = PermissionPolicy::default()
            .with_threshold(1000.0)
            .with_override(FINANCIAL_TRANSACTION, false);
        for bad in [json!("5,000"), json!("$5000"), json!("NaN"), json!("inf"), json!(null), json!([5000])] {
            assert!(
                policy.requires_approval(FINANCIAL_TRANSACTION, AgentId::Finance, &json!({"amount": bad})),
                "amount {bad} should require approval"
            );
        }
        // NaN 序列化后为 null
        let nan = json!({"amount": f64::NAN});
        assert!(policy.requires_approval(FINANCIAL_TRANSACTION, AgentId::Finance, &nan));
        assert_eq!(policy.priority_for(FINANCIAL_TRANSACTION, &nan), Priority::High);
    }

    #[test]
    fn test_unknown_action_uses_default() {
        let strict = PermissionPolicy::default();
        assert!(strict.requires_approval("launch_rocket", AgentId::Operations, &json!({})));

        let lenient = PermissionPolicy::from_config(&PermissionsSection {
            default_requires_approval: false,
            ..PermissionsSection::default()
        });
        assert!(!lenient.requires_approval("launch_rocket", AgentId::Operations, &json!({})));
        assert_eq!(lenient.priority_for("launch_rocket", &json!({})), Priority::Medium);
    }

    #[test]
    fn test_override_replaces_table_entry() {
        let policy = PermissionPolicy::default().with_override("send_email", false);
        assert!(!policy.requires_approval("send_email", AgentId::Marketing, &json!({})));
    }

    #[test]
    fn test_priority() {
        let policy = PermissionPolicy::default().with_threshold(1000.0);
        assert_eq!(policy.priority_for("make_call", &json!({})), Priority::High);
        assert_eq!(policy.priority_for(FINANCIAL_TRANSACTION, &json!({"amount": 5000})), Priority::High);
        assert_eq!(policy.priority_for(FINANCIAL_TRANSACTION, &json!({"amount": 20000})), Priority::Critical);
    }
}
