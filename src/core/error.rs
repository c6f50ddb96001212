//! 跨模块错误类型
//!
//! 运行期失败（LLM、网关）在编排器与分发器内部降级处理，不会以 AgentError 形式冒出；
//! AgentError 只覆盖调用方误用（未知 Agent / 动作 / 审批单）与基础设施错误。

use thiserror::Error;

use crate::actions::GatewayError;
use crate::agents::UnknownAgent;
use crate::llm::LlmError;
use crate::permissions::PermissionError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    UnknownAgent(#[from] UnknownAgent),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}
