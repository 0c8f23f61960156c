//! 探索错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ExploreError 决定 Fail / LogAndContinue。

use thiserror::Error;

/// 探索过程中可能出现的错误（感知、决策、动作、持久化、取消、会话查找）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExploreError {
    /// 感知源无法产出快照（目标不可达等）
    #[error("Perception failed: {0}")]
    PerceptionFailure(String),

    /// 决策后端报错
    #[error("Decision failed: {0}")]
    DecisionFailure(String),

    /// 批次中某个动作执行失败
    #[error("Action failed: {action}: {reason}")]
    ActionFailure { action: String, reason: String },

    #[error("Persistence failed: {0}")]
    PersistenceFailure(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 会话以 FAILURE 结束（仍尝试一次 PERSIST 刷写）
    Fail,
    /// 记录日志后继续（持久化是尽力而为）
    LogAndContinue,
}
