//! Generator：generate(prompt, agent_context) 的统一入口
//!
//! 持有 LLM 与超时；拼接 system（Agent 身份）+ 可选历史 + user prompt 后调用。
//! 各阶段（意图、步骤、合成、回复）都经由它访问 LLM。

use std::sync::Arc;
use std::time::Duration;

use crate::llm::{complete_with_timeout, LlmClient, LlmError};
use crate::memory::Message;

#[derive(Clone)]
pub struct Generator {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn generate(&self, agent_context: &str, prompt: &str) -> Result<String, LlmError> {
        self.generate_with_history(agent_context, &[], prompt).await
    }

    /// 带对话历史的生成（历史按时间顺序放在 system 与 prompt 之间）
    pub async fn generate_with_history(
        &self,
        agent_context: &str,
        history: &[Message],
        prompt: &str,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(agent_context));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(prompt));
        complete_with_timeout(self.llm.as_ref(), &messages, self.timeout).await
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
