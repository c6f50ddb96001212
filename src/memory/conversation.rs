//! 短期记忆：对话历史
//!
//! 保留最近 N 条消息（带时间戳），超出时从最旧的一端剪枝，供 LLM 上下文与 UI 渲染使用。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 发往 LLM 的单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 对话记录中的一条（含时间戳）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role.clone(),
            content: self.content.clone(),
        }
    }
}

/// 有界对话记忆：最多 max_messages 条，超出时淘汰最旧的
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMemory {
    entries: VecDeque<ConversationEntry>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_messages,
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.entries.push_back(ConversationEntry {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        self.prune();
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    /// 最近 n 条，转换为 LLM 消息（按时间顺序）
    pub fn recent_messages(&self, n: usize) -> Vec<Message> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries
            .iter()
            .skip(skip)
            .map(ConversationEntry::to_message)
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn prune(&mut self) {
        while self.entries.len() > self.max_messages {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_drops_oldest_first() {
        let mut memory = ConversationMemory::new(3);
        for i in 0..5 {
            memory.push(Role::User, format!("m{i}"));
        }
        let contents: Vec<_> = memory.entries().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_recent_messages_keeps_order() {
        let mut memory = ConversationMemory::new(10);
        memory.push(Role::User, "hi");
        memory.push(Role::Assistant, "hello");
        memory.push(Role::User, "plan my week");
        let recent = memory.recent_messages(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, Role::Assistant);
        assert_eq!(recent[1].content, "plan my week");
    }
}
