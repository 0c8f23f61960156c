//! 探索状态、部分更新与唯一的 reducer
//!
//! 各阶段只读 ExplorationState 并返回 StateUpdate，由控制器调用 `apply` 合并：
//! - history 追加
//! - 标量（locator、fingerprint、status 等）替换
//! - frontier 按自身策略合并，从不整体替换
//!
//! 外部只看到 SessionView 投影。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::core::fingerprint::Fingerprint;
use crate::core::frontier::{BacktrackTarget, Frontier};
use crate::persistence::Record;

/// 单轮迭代结束后的探索状态；CONTINUE 仅内部使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExploreStatus {
    Continue,
    FlowEnd,
    Failure,
    Backtrack,
}

impl ExploreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExploreStatus::Continue => "CONTINUE",
            ExploreStatus::FlowEnd => "FLOW_END",
            ExploreStatus::Failure => "FAILURE",
            ExploreStatus::Backtrack => "BACKTRACK",
        }
    }

    /// FLOW_END / FAILURE 结束迭代循环
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExploreStatus::FlowEnd | ExploreStatus::Failure)
    }
}

impl std::fmt::Display for ExploreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话生命周期：idle → running → completed | error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

/// 已执行但尚未观察到结果状态的转移；下一次 OBSERVE 时补全 `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    pub from: Fingerprint,
    pub actions: String,
    pub iteration: usize,
}

impl PendingTransition {
    pub fn resolve(self, session_id: &str, to: Option<Fingerprint>) -> Record {
        Record::Transition {
            session_id: session_id.to_string(),
            from: self.from,
            to,
            actions: self.actions,
            iteration: self.iteration,
        }
    }
}

/// frontier 的增量操作，按顺序应用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontierOp {
    Record {
        fingerprint: Fingerprint,
        locator: String,
        actions: Vec<String>,
        parent: Option<Fingerprint>,
    },
    MarkExplored {
        fingerprint: Fingerprint,
        action: String,
    },
    PushIfUnexplored(Fingerprint),
}

/// 每个会话独占的可变上下文
#[derive(Debug, Clone)]
pub struct ExplorationState {
    pub session_id: String,
    pub current_locator: String,
    pub snapshot: String,
    pub current_fingerprint: Option<Fingerprint>,
    pub action_history: Vec<String>,
    pub frontier: Frontier,
    pub pending_actions: Vec<Action>,
    pub status: ExploreStatus,
    /// 已开始的迭代数（从 1 计）
    pub iteration: usize,
    /// 回溯后待恢复的目标；下一次 OBSERVE 命中它时不算循环
    pub resume: Option<BacktrackTarget>,
    pub pending_transition: Option<PendingTransition>,
    /// 等待 PERSIST 的记录
    pub outbox: Vec<Record>,
    pub terminal_reason: Option<String>,
}

impl ExplorationState {
    pub fn new(session_id: impl Into<String>, start_locator: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_locator: start_locator.into(),
            snapshot: String::new(),
            current_fingerprint: None,
            action_history: Vec::new(),
            frontier: Frontier::new(),
            pending_actions: Vec::new(),
            status: ExploreStatus::Continue,
            iteration: 0,
            resume: None,
            pending_transition: None,
            outbox: Vec::new(),
            terminal_reason: None,
        }
    }

    /// 由 frontier 派生的 visited 视图（首次发现顺序，无重复）
    pub fn visited_fingerprints(&self) -> &[Fingerprint] {
        self.frontier.visited()
    }

    /// 最近 n 条 history
    pub fn history_tail(&self, n: usize) -> &[String] {
        let start = self.action_history.len().saturating_sub(n);
        &self.action_history[start..]
    }

    /// 当前状态尚未执行的动作
    pub fn unexplored_here(&self) -> Vec<String> {
        self.current_fingerprint
            .as_ref()
            .and_then(|fp| self.frontier.get(fp))
            .map(|r| r.unexplored_actions())
            .unwrap_or_default()
    }

    /// 唯一的 reducer
    pub fn apply(&mut self, update: StateUpdate) {
        if update.begin_iteration {
            self.iteration += 1;
        }
        if let Some(locator) = update.locator {
            self.current_locator = locator;
        }
        if let Some(snapshot) = update.snapshot {
            self.snapshot = snapshot;
        }
        if let Some(fp) = update.fingerprint {
            self.current_fingerprint = Some(fp);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(actions) = update.pending_actions {
            self.pending_actions = actions;
        }
        if let Some(resume) = update.resume {
            self.resume = resume;
        }
        if let Some(pending) = update.pending_transition {
            self.pending_transition = pending;
        }
        if let Some(reason) = update.terminal_reason {
            self.terminal_reason = Some(reason);
        }
        for op in update.frontier_ops {
            match op {
                FrontierOp::Record {
                    fingerprint,
                    locator,
                    actions,
                    parent,
                } => self
                    .frontier
                    .record_observation(&fingerprint, &locator, actions, parent.as_ref()),
                FrontierOp::MarkExplored { fingerprint, action } => {
                    self.frontier.mark_explored(&fingerprint, &action);
                }
                FrontierOp::PushIfUnexplored(fingerprint) => {
                    self.frontier.push_if_unexplored(&fingerprint);
                }
            }
        }
        self.action_history.extend(update.history);
        if update.flush_outbox {
            self.outbox.clear();
        }
        self.outbox.extend(update.records);
    }

    /// 投影为外部可见的会话视图
    pub fn project(&self, status: SessionStatus, created_at: DateTime<Utc>) -> SessionView {
        SessionView {
            session_id: self.session_id.clone(),
            status,
            explore_status: self.status,
            iteration: self.iteration,
            current_locator: self.current_locator.clone(),
            current_fingerprint: self.current_fingerprint.as_ref().map(|f| f.to_string()),
            action_history: self.action_history.clone(),
            visited: self.frontier.visited().len(),
            backtrack_depth: self.frontier.backtrack_stack().len(),
            terminal_reason: self.terminal_reason.clone(),
            created_at,
        }
    }
}

/// 阶段返回的部分更新；None 表示该字段不变
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub begin_iteration: bool,
    pub locator: Option<String>,
    pub snapshot: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub status: Option<ExploreStatus>,
    pub pending_actions: Option<Vec<Action>>,
    pub resume: Option<Option<BacktrackTarget>>,
    pub pending_transition: Option<Option<PendingTransition>>,
    pub terminal_reason: Option<String>,
    pub frontier_ops: Vec<FrontierOp>,
    pub history: Vec<String>,
    /// 先清空 outbox 再追加 records
    pub flush_outbox: bool,
    pub records: Vec<Record>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_iteration() -> Self {
        Self {
            begin_iteration: true,
            status: Some(ExploreStatus::Continue),
            ..Self::default()
        }
    }

    /// 终止更新：设置状态、原因并追加一条 history，清空待执行动作
    pub fn terminal(status: ExploreStatus, reason: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            terminal_reason: Some(reason.into()),
            pending_actions: Some(Vec::new()),
            history: vec![entry.into()],
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: ExploreStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_history(mut self, entry: impl Into<String>) -> Self {
        self.history.push(entry.into());
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_frontier_op(mut self, op: FrontierOp) -> Self {
        self.frontier_ops.push(op);
        self
    }
}

/// 外部可见的会话视图（status 查询与 watch 通道）
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub status: SessionStatus,
    pub explore_status: ExploreStatus,
    pub iteration: usize,
    pub current_locator: String,
    pub current_fingerprint: Option<String>,
    pub action_history: Vec<String>,
    pub visited: usize,
    pub backtrack_depth: usize,
    pub terminal_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionView {
    pub fn idle(session_id: &str, locator: &str, created_at: DateTime<Utc>) -> Self {
        ExplorationState::new(session_id, locator).project(SessionStatus::Idle, created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::fingerprint;

    fn record_op(snapshot: &str, actions: &[&str]) -> FrontierOp {
        FrontierOp::Record {
            fingerprint: fingerprint(snapshot),
            locator: format!("/{snapshot}"),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            parent: None,
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ExploreStatus::FlowEnd).unwrap(),
            "\"FLOW_END\""
        );
        assert!(ExploreStatus::Failure.is_terminal());
        assert!(!ExploreStatus::Backtrack.is_terminal());
        assert!(SessionStatus::Completed.is_finished());
    }

    #[test]
    fn test_apply_appends_history_and_replaces_scalars() {
        let mut state = ExplorationState::new("s", "/start");
        state.apply(StateUpdate::begin_iteration().with_history("one"));
        state.apply(
            StateUpdate::new()
                .with_status(ExploreStatus::FlowEnd)
                .with_history("two"),
        );
        assert_eq!(state.iteration, 1);
        assert_eq!(state.action_history, vec!["one", "two"]);
        assert_eq!(state.status, ExploreStatus::FlowEnd);
        assert_eq!(state.current_locator, "/start");
    }

    #[test]
    fn test_apply_merges_frontier() {
        let mut state = ExplorationState::new("s", "/x");
        state.apply(StateUpdate::new().with_frontier_op(record_op("x", &["a1"])));
        state.apply(StateUpdate::new().with_frontier_op(record_op("x", &["a2"])));
        let fx = fingerprint("x");
        assert_eq!(state.frontier.unexplored_count(&fx), 2);

        state.apply(
            StateUpdate::new()
                .with_frontier_op(FrontierOp::MarkExplored {
                    fingerprint: fx.clone(),
                    action: "a1".into(),
                })
                .with_frontier_op(FrontierOp::PushIfUnexplored(fx.clone())),
        );
        assert_eq!(state.frontier.unexplored_count(&fx), 1);
        assert_eq!(state.frontier.backtrack_stack().len(), 1);
        assert_eq!(state.visited_fingerprints(), &[fx]);
    }

    #[test]
    fn test_terminal_clears_pending_actions() {
        let mut state = ExplorationState::new("s", "/x");
        state.pending_actions = vec![Action::activate("#a")];
        state.apply(StateUpdate::terminal(ExploreStatus::FlowEnd, "done", "flow end: done"));
        assert!(state.pending_actions.is_empty());
        assert_eq!(state.terminal_reason.as_deref(), Some("done"));
    }

    #[test]
    fn test_outbox_flush_then_append() {
        let mut state = ExplorationState::new("s", "/x");
        let rec = Record::Iteration {
            session_id: "s".into(),
            iteration: 1,
            status: ExploreStatus::Continue,
            summary: String::new(),
        };
        state.apply(StateUpdate::new().with_record(rec.clone()));
        assert_eq!(state.outbox.len(), 1);
        state.apply(StateUpdate {
            flush_outbox: true,
            ..StateUpdate::default()
        });
        assert!(state.outbox.is_empty());
    }

    #[test]
    fn test_history_tail_and_projection() {
        let mut state = ExplorationState::new("s", "/x");
        for i in 0..5 {
            state.apply(StateUpdate::new().with_history(format!("e{i}")));
        }
        assert_eq!(state.history_tail(2), &["e3".to_string(), "e4".to_string()]);
        assert_eq!(state.history_tail(10).len(), 5);

        let view = state.project(SessionStatus::Running, Utc::now());
        assert_eq!(view.action_history.len(), 5);
        assert_eq!(view.status, SessionStatus::Running);
        assert_eq!(view.explore_status, ExploreStatus::Continue);
    }
}
