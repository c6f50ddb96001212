//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 支持回显、固定回复、总是失败、永不返回（测试超时），以及按顺序消费的脚本回复。
//! 脚本耗尽后回到基础行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

#[derive(Debug, Clone)]
enum Behavior {
    Echo,
    Fixed(String),
    Fail(String),
    Hang,
}

#[derive(Debug)]
pub struct MockLlmClient {
    behavior: Behavior,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<Message>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 回显最后一条 User 消息
    pub fn echo() -> Self {
        Self::with_behavior(Behavior::Echo)
    }

    pub fn fixed(text: impl Into<String>) -> Self {
        Self::with_behavior(Behavior::Fixed(text.into()))
    }

    /// 每次调用都返回 ApiError
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Fail("mock failure".to_string()))
    }

    /// 永不返回，用于验证超时降级
    pub fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    /// 先按顺序返回脚本中的结果，耗尽后回显
    pub fn scripted(replies: Vec<Result<String, LlmError>>) -> Self {
        let mock = Self::echo();
        *mock.script.lock() = replies.into();
        mock
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 最近一次调用收到的完整消息列表
    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages.lock().clone()
    }

    /// 每次调用的最后一条 User 消息
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::echo()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "(no input)".to_string());
        *self.last_messages.lock() = messages.to_vec();
        self.prompts.lock().push(last_user.clone());

        let scripted = self.script.lock().pop_front();
        if let Some(reply) = scripted {
            return reply;
        }

        match &self.behavior {
            Behavior::Echo => Ok(format!("Mock response: {last_user}")),
            Behavior::Fixed(text) => Ok(text.clone()),
            Behavior::Fail(reason) => Err(LlmError::ApiError(reason.clone())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
