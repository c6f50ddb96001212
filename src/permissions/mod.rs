//! 权限：权限门策略 + 审批单生命周期

pub mod manager;
pub mod policy;

pub use manager::{PermissionError, PermissionManager, PermissionRequest, RequestStatus, Resolution};
pub use policy::{PermissionPolicy, Priority, FINANCIAL_TRANSACTION};
