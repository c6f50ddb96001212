//! 记忆层：对话消息、有界对话历史、每个 Agent 的记忆容器

pub mod agent_memory;
pub mod conversation;

pub use agent_memory::{AgentMemory, MemoryStore};
pub use conversation::{ConversationEntry, ConversationMemory, Message, Role};
