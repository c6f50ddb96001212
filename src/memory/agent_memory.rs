//! 每个 Agent 的记忆：有界对话 + 有界学习记录
//!
//! MemoryStore 由编排器持有（注入），每处理一条请求写入一次；不做持久化。

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::memory::{ConversationMemory, Message, Role};

/// 单个 Agent 的记忆快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentMemory {
    pub agent_id: AgentId,
    pub conversation: ConversationMemory,
    pub learnings: VecDeque<String>,
    max_learnings: usize,
}

impl AgentMemory {
    pub fn new(agent_id: AgentId, max_messages: usize, max_learnings: usize) -> Self {
        Self {
            agent_id,
            conversation: ConversationMemory::new(max_messages),
            learnings: VecDeque::new(),
            max_learnings,
        }
    }

    pub fn add_learning(&mut self, learning: impl Into<String>) {
        self.learnings.push_back(learning.into());
        while self.learnings.len() > self.max_learnings {
            self.learnings.pop_front();
        }
    }
}

/// 所有 Agent 的记忆容器
#[derive(Debug)]
pub struct MemoryStore {
    memories: RwLock<HashMap<AgentId, AgentMemory>>,
    max_messages: usize,
    max_learnings: usize,
}

impl MemoryStore {
    pub fn new(max_messages: usize, max_learnings: usize) -> Self {
        Self {
            memories: RwLock::new(HashMap::new()),
            max_messages,
            max_learnings,
        }
    }

    fn with_memory<R>(&self, agent: AgentId, f: impl FnOnce(&mut AgentMemory) -> R) -> R {
        let mut guard = self.memories.write();
        let memory = guard
            .entry(agent)
            .or_insert_with(|| AgentMemory::new(agent, self.max_messages, self.max_learnings));
        f(memory)
    }

    /// 记录一轮往来：用户请求 + Agent 回复
    pub fn record_exchange(&self, agent: AgentId, request: &str, response: &str) {
        self.with_memory(agent, |m| {
            m.conversation.push(Role::User, request);
            m.conversation.push(Role::Assistant, response);
        });
    }

    pub fn add_learning(&self, agent: AgentId, learning: impl Into<String>) {
        self.with_memory(agent, |m| m.add_learning(learning));
    }

    /// 最近 n 条对话（用于 prompt 上下文）；无记录时为空
    pub fn recent_messages(&self, agent: AgentId, n: usize) -> Vec<Message> {
        self.memories
            .read()
            .get(&agent)
            .map(|m| m.conversation.recent_messages(n))
            .unwrap_or_default()
    }

    pub fn snapshot(&self, agent: AgentId) -> Option<AgentMemory> {
        self.memories.read().get(&agent).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(50, 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_and_learning_are_bounded() {
        let store = MemoryStore::new(4, 2);
        for i in 0..3 {
            store.record_exchange(AgentId::Sales, &format!("q{i}"), &format!("a{i}"));
            store.add_learning(AgentId::Sales, format!("l{i}"));
        }
        let memory = store.snapshot(AgentId::Sales).unwrap();
        assert_eq!(memory.conversation.len(), 4);
        assert_eq!(memory.conversation.entries().next().unwrap().content, "q1");
        assert_eq!(memory.learnings, vec!["l1".to_string(), "l2".to_string()]);
    }

    #[test]
    fn test_agents_are_isolated() {
        let store = MemoryStore::default();
        store.record_exchange(AgentId::Finance, "budget?", "here");
        assert!(store.snapshot(AgentId::Marketing).is_none());
        assert_eq!(store.recent_messages(AgentId::Finance, 10).len(), 2);
    }
}
