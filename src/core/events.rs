//! 探索事件：控制器在关键节点广播，CLI 以 JSON 行输出，测试用于断言阶段顺序

use serde::Serialize;

use crate::core::state::ExploreStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExploreEvent {
    IterationStarted {
        session_id: String,
        iteration: usize,
    },
    Observed {
        session_id: String,
        fingerprint: String,
        locator: String,
        affordances: usize,
        new_state: bool,
    },
    Decided {
        session_id: String,
        /// "actions" / "terminal" / "backtrack"
        outcome: String,
        actions: usize,
    },
    BatchApplied {
        session_id: String,
        summary: String,
        success: bool,
    },
    Backtracked {
        session_id: String,
        fingerprint: String,
        locator: String,
        unexplored: usize,
    },
    PersistFailed {
        session_id: String,
        error: String,
    },
    Finished {
        session_id: String,
        status: ExploreStatus,
        iterations: usize,
        reason: Option<String>,
    },
}

impl ExploreEvent {
    pub fn session_id(&self) -> &str {
        match self {
            ExploreEvent::IterationStarted { session_id, .. }
            | ExploreEvent::Observed { session_id, .. }
            | ExploreEvent::Decided { session_id, .. }
            | ExploreEvent::BatchApplied { session_id, .. }
            | ExploreEvent::Backtracked { session_id, .. }
            | ExploreEvent::PersistFailed { session_id, .. }
            | ExploreEvent::Finished { session_id, .. } => session_id,
        }
    }
}
