//! 错误恢复引擎
//!
//! 根据 ExploreError 类型返回 RecoveryAction：感知/决策/动作失败与取消终止会话，持久化失败仅记录日志。

use crate::core::{ExploreError, RecoveryAction};

/// 阶段边界的错误策略：所有错误在这里被转换为状态更新，不会向上冒泡
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &ExploreError) -> RecoveryAction {
        match err {
            ExploreError::PersistenceFailure(msg) => {
                tracing::warn!(error = %msg, "persistence failed, exploration continues");
                RecoveryAction::LogAndContinue
            }
            ExploreError::PerceptionFailure(_)
            | ExploreError::DecisionFailure(_)
            | ExploreError::ActionFailure { .. }
            | ExploreError::Cancelled => RecoveryAction::Fail,
            _ => RecoveryAction::Fail,
        }
    }
}
