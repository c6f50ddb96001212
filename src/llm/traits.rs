//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete。调用方不直接 await 客户端，
//! 而是经过 complete_with_timeout：超时与空回复都归为 LlmError，走同一条降级路径。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用失败的原因
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Empty response")]
    EmptyResponse,

    /// 后端未配置或不可达
    #[error("LLM unavailable: {0}")]
    Unavailable(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 在 limit 内完成一次调用；超时返回 Timeout，空白回复返回 EmptyResponse
pub async fn complete_with_timeout(
    llm: &dyn LlmClient,
    messages: &[Message],
    limit: Duration,
) -> Result<String, LlmError> {
    match tokio::time::timeout(limit, llm.complete(messages)).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(LlmError::EmptyResponse),
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(limit)),
    }
}
