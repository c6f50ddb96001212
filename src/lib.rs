//! Opsdesk - 多智能体业务助理的任务规划与审批执行引擎
//!
//! 模块划分：
//! - **agents**: 封闭的 Agent 注册表（工具清单、协作清单、专长）
//! - **actions**: 外部动作分发（消息 / 邮件 / 短信 / 电话 / 检索 / 看板 / 课堂 / 财务），统一审批与降级
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 跨模块错误类型
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock），带超时的生成入口
//! - **memory**: 每个 Agent 的有界对话记忆与学习记录
//! - **observability**: tracing 日志初始化
//! - **permissions**: 审批门控策略与审批请求生命周期
//! - **planning**: 意图分析、计划构建、步骤执行、交付物合成、编排主流程
//! - **store**: 记录存储接口（审计日志等）
//! - **thoughts**: 每个 Agent 的思考流（发布 / 订阅）

pub mod actions;
pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod permissions;
pub mod planning;
pub mod store;
pub mod thoughts;

pub use actions::{ActionDispatcher, ActionKind, ActionOutcome};
pub use agents::{AgentId, AgentProfile};
pub use crate::core::AgentError;
pub use permissions::{PermissionManager, PermissionPolicy, PermissionRequest};
pub use planning::{PlanOrchestrator, PlanOutcome};
pub use thoughts::{AgentThought, ThoughtStream};
