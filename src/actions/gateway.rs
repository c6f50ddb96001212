//! 动作网关：invoke(action, params) → { success, data?, error? }
//!
//! 网关被视为不可靠且可能缺失：未配置 base_url 时使用 [`UnconfiguredGateway`]，
//! 所有调用返回 NotConfigured，由分发器转为排队补位。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ActionsSection;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Action gateway not configured for {0}")]
    NotConfigured(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed gateway payload: {0}")]
    Malformed(String),

    #[error("Action rejected: {0}")]
    Rejected(String),

    #[error("Action timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ActionGateway: Send + Sync {
    async fn invoke(&self, action: &str, params: &Value) -> Result<GatewayResponse, GatewayError>;

    fn is_configured(&self) -> bool {
        true
    }
}

/// 未配置时的排队桩
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredGateway;

#[async_trait]
impl ActionGateway for UnconfiguredGateway {
    async fn invoke(&self, action: &str, _params: &Value) -> Result<GatewayResponse, GatewayError> {
        Err(GatewayError::NotConfigured(action.to_string()))
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// HTTP 网关：POST {base_url}/actions/{action}，body 为参数 JSON
pub struct HttpActionGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpActionGateway {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/actions/{}", self.base_url, action)
    }
}

#[async_trait]
impl ActionGateway for HttpActionGateway {
    async fn invoke(&self, action: &str, params: &Value) -> Result<GatewayResponse, GatewayError> {
        let mut request = self.client.post(self.endpoint(action)).json(params);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: GatewayResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !parsed.success {
            return Err(GatewayError::Rejected(
                parsed.error.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }
        Ok(parsed)
    }
}

/// 根据 [actions] 配置选择网关
pub fn create_gateway_from_config(cfg: &ActionsSection) -> Arc<dyn ActionGateway> {
    let Some(base_url) = cfg.base_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        tracing::warn!("No action gateway configured, actions will be queued");
        return Arc::new(UnconfiguredGateway);
    };
    match HttpActionGateway::new(
        base_url,
        cfg.api_key.clone(),
        Duration::from_secs(cfg.timeout_secs),
    ) {
        Ok(gateway) => {
            tracing::info!(base_url, "Using HTTP action gateway");
            Arc::new(gateway)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Action gateway not usable, actions will be queued");
            Arc::new(UnconfiguredGateway)
        }
    }
}
