//! 核心层：跨模块错误

pub mod error;

pub use error::AgentError;
