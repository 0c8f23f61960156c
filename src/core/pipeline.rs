//! 探索流水线：OBSERVE → DECIDE → EXECUTE → PERSIST
//!
//! 每个阶段是 `(&ExplorationState, 协作者) -> StateUpdate` 的函数，不直接修改状态；
//! 控制器 `Pipeline::run` 负责顺序调度、错误转换、迭代上限、取消检查与回溯切换。
//!
//! 所有错误在阶段边界被转换为状态与 history，不会向上冒泡。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionTarget, BatchExecutor, BatchReport, SelectorSanitizer};
use crate::core::error::{ExploreError, RecoveryAction};
use crate::core::events::ExploreEvent;
use crate::core::fingerprint::is_cycle;
use crate::core::recovery::RecoveryEngine;
use crate::core::state::{
    ExplorationState, ExploreStatus, FrontierOp, PendingTransition, SessionStatus, SessionView,
    StateUpdate,
};
use crate::decision::{
    default_detectors, normalize, CapabilityDetector, Credentials, DecisionProvider,
    DecisionResult, Hints, LoginShortcut,
};
use crate::perception::PerceptionSource;
use crate::persistence::{PersistenceSink, Record};

/// 一个会话使用的外部协作者
#[derive(Clone)]
pub struct Collaborators {
    pub perception: Arc<dyn PerceptionSource>,
    pub decision: Arc<dyn DecisionProvider>,
    pub target: Arc<dyn ActionTarget>,
    pub sink: Arc<dyn PersistenceSink>,
    pub sanitizer: Arc<dyn SelectorSanitizer>,
}

impl Collaborators {
    /// 释放所有资源句柄；进行中的调用随之失败
    pub async fn release(&self) {
        self.perception.release().await;
        self.target.release().await;
        self.sink.close().await;
    }
}

/// 控制器参数
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_iterations: usize,
    pub history_tail: usize,
    pub credentials: Option<Credentials>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            history_tail: 10,
            credentials: None,
        }
    }
}

/// run 的结果：每轮迭代结束时的状态序列与最终状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub iterations: usize,
    pub status_trail: Vec<ExploreStatus>,
    pub final_status: ExploreStatus,
    pub reason: Option<String>,
}

/// OBSERVE：观察目标，计算指纹，检测循环，合并 frontier。
///
/// 会话开始与回溯后按 locator 导航；其余情况观察当前页面。
/// 命中回溯目标是恢复，不算循环。
pub async fn observe_stage(
    state: &ExplorationState,
    perception: &dyn PerceptionSource,
) -> Result<StateUpdate, ExploreError> {
    let navigate_to = match (&state.resume, &state.current_fingerprint) {
        (Some(target), _) => Some(target.locator.as_str()),
        (None, None) => Some(state.current_locator.as_str()),
        (None, Some(_)) => None,
    };
    let observation = perception
        .observe(navigate_to)
        .await
        .map_err(ExploreError::PerceptionFailure)?;

    let fp = observation.fingerprint();
    let resumed = state.resume.as_ref().is_some_and(|t| t.fingerprint == fp);
    let seen = is_cycle(&fp, state.visited_fingerprints());
    let parent = state.pending_transition.as_ref().map(|p| p.from.clone());

    let mut update = StateUpdate {
        locator: Some(observation.locator.clone()),
        snapshot: Some(observation.snapshot.clone()),
        fingerprint: Some(fp.clone()),
        resume: Some(None),
        pending_transition: Some(None),
        ..StateUpdate::default()
    };

    if let Some(pending) = state.pending_transition.clone() {
        update
            .records
            .push(pending.resolve(&state.session_id, Some(fp.clone())));
    }
    if !seen {
        update.records.push(Record::State {
            session_id: state.session_id.clone(),
            fingerprint: fp.clone(),
            locator: observation.locator.clone(),
            snapshot: observation.snapshot.clone(),
            parent: parent.clone(),
        });
    }
    update.frontier_ops.push(FrontierOp::Record {
        fingerprint: fp.clone(),
        locator: observation.locator.clone(),
        actions: observation.affordances,
        parent,
    });

    if seen && !resumed {
        tracing::info!(session_id = %state.session_id, fingerprint = %fp, "cycle detected");
        let entry = format!("cycle: revisited {} at {}", fp.short(), observation.locator);
        let terminal = StateUpdate::terminal(ExploreStatus::FlowEnd, "cycle detected", entry);
        update.status = terminal.status;
        update.terminal_reason = terminal.terminal_reason;
        update.pending_actions = terminal.pending_actions;
        update.history = terminal.history;
    }
    Ok(update)
}

/// DECIDE 阶段的依赖
pub struct DecideContext<'a> {
    pub provider: &'a dyn DecisionProvider,
    pub detectors: &'a [Box<dyn CapabilityDetector>],
    pub shortcut: Option<&'a LoginShortcut>,
    pub history_tail: usize,
}

/// DECIDE：当前状态无未探索动作时直接结束或回溯；否则先尝试确定性捷径，再交给决策后端。
///
/// 后端输出无法规范化时降级为终止（FLOW_END），后端自身报错为 DecisionFailure。
pub async fn decide_stage(
    state: &ExplorationState,
    ctx: &DecideContext<'_>,
) -> Result<StateUpdate, ExploreError> {
    let fp = state
        .current_fingerprint
        .as_ref()
        .ok_or_else(|| ExploreError::DecisionFailure("no observation to decide on".to_string()))?;

    if state.frontier.is_exhausted(fp) {
        return Ok(StateUpdate::terminal(
            ExploreStatus::FlowEnd,
            "no unexplored actions",
            format!("flow end: no unexplored actions at {}", fp.short()),
        ));
    }
    let unexplored = state.unexplored_here();
    if unexplored.is_empty() {
        return Ok(StateUpdate {
            status: Some(ExploreStatus::Backtrack),
            pending_actions: Some(Vec::new()),
            ..StateUpdate::default()
        });
    }

    let capabilities: Vec<_> = ctx
        .detectors
        .iter()
        .filter_map(|d| d.detect(&state.snapshot))
        .collect();
    let hints = Hints {
        credentials_available: ctx.shortcut.is_some(),
        capabilities,
        unexplored_actions: unexplored,
    };

    if let Some(decision) = ctx.shortcut.and_then(|s| s.propose(&hints)) {
        return Ok(actions_update(decision));
    }

    let reply = ctx
        .provider
        .decide(&state.snapshot, state.history_tail(ctx.history_tail), &hints)
        .await
        .map_err(ExploreError::DecisionFailure)?;

    match normalize(reply, state.iteration <= 1) {
        Ok(DecisionResult::Terminal { reason }) => Ok(StateUpdate::terminal(
            ExploreStatus::FlowEnd,
            reason.clone(),
            format!("flow end: {}", reason),
        )),
        Ok(decision) => Ok(actions_update(decision)),
        Err(e) => {
            tracing::warn!(session_id = %state.session_id, error = %e, "decision output unparsable");
            Ok(StateUpdate::terminal(
                ExploreStatus::FlowEnd,
                "unparsable decision",
                format!("decision unparsable: {}", e),
            ))
        }
    }
}

fn actions_update(decision: DecisionResult) -> StateUpdate {
    StateUpdate {
        status: Some(ExploreStatus::Continue),
        pending_actions: Some(decision.into_actions().unwrap_or_default()),
        ..StateUpdate::default()
    }
}

/// EXECUTE：执行待处理批次，写一条汇总 history，标记已派发动作并视情况把当前状态压入回溯栈。
///
/// 动作失败时已生效的部分照常记录，状态置为 FAILURE。
pub async fn execute_stage(
    state: &ExplorationState,
    executor: &BatchExecutor,
    target: &dyn ActionTarget,
) -> (StateUpdate, BatchReport) {
    let report = executor.execute(&state.pending_actions, target).await;
    let summary = report.summary();
    let mut update = StateUpdate {
        pending_actions: Some(Vec::new()),
        history: vec![summary],
        ..StateUpdate::default()
    };

    let Some(fp) = state.current_fingerprint.clone() else {
        return (update.with_status(ExploreStatus::Failure), report);
    };

    for affordance in report.issued().filter_map(|a| a.affordance()) {
        update.frontier_ops.push(FrontierOp::MarkExplored {
            fingerprint: fp.clone(),
            action: affordance.to_string(),
        });
    }
    update
        .frontier_ops
        .push(FrontierOp::PushIfUnexplored(fp.clone()));

    let applied: Vec<String> = report.applied().map(|a| a.to_string()).collect();
    if !applied.is_empty() {
        update.pending_transition = Some(Some(PendingTransition {
            from: fp,
            actions: applied.join("; "),
            iteration: state.iteration,
        }));
    }

    if let Some((action, reason)) = report.failure() {
        let err = ExploreError::ActionFailure {
            action: action.to_string(),
            reason: reason.to_string(),
        };
        tracing::warn!(session_id = %state.session_id, error = %err, "batch stopped at first failure");
        update.status = Some(ExploreStatus::Failure);
        update.terminal_reason = Some(err.to_string());
    }
    (update, report)
}

/// PERSIST：把 outbox 与本轮迭代汇总作为一批写入
pub async fn persist_stage(
    state: &ExplorationState,
    sink: &dyn PersistenceSink,
) -> Result<(), ExploreError> {
    let mut records = state.outbox.clone();
    records.push(Record::Iteration {
        session_id: state.session_id.clone(),
        iteration: state.iteration,
        status: state.status,
        summary: state.action_history.last().cloned().unwrap_or_default(),
    });
    sink.append_batch(&records)
        .await
        .map_err(|e| ExploreError::PersistenceFailure(e.to_string()))
}

/// 单个会话的控制器
pub struct Pipeline {
    collaborators: Collaborators,
    executor: BatchExecutor,
    detectors: Vec<Box<dyn CapabilityDetector>>,
    shortcut: Option<LoginShortcut>,
    recovery: RecoveryEngine,
    cancel: CancellationToken,
    events: Option<broadcast::Sender<ExploreEvent>>,
    view: Option<(watch::Sender<SessionView>, DateTime<Utc>)>,
    max_iterations: usize,
    history_tail: usize,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, options: PipelineOptions) -> Self {
        let executor = BatchExecutor::new(Arc::clone(&collaborators.sanitizer));
        Self {
            collaborators,
            executor,
            detectors: default_detectors(),
            shortcut: options.credentials.map(LoginShortcut::new),
            recovery: RecoveryEngine::new(),
            cancel: CancellationToken::new(),
            events: None,
            view: None,
            max_iterations: options.max_iterations,
            history_tail: options.history_tail,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<ExploreEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 每个阶段结束后把投影推送到 watch 通道
    pub fn with_view(mut self, tx: watch::Sender<SessionView>, created_at: DateTime<Utc>) -> Self {
        self.view = Some((tx, created_at));
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行直到终止状态；迭代 N+1 只在迭代 N 的 PERSIST 完成后开始
    pub async fn run(&self, state: &mut ExplorationState) -> RunReport {
        let mut status_trail = Vec::new();
        tracing::info!(session_id = %state.session_id, locator = %state.current_locator, "exploration started");

        loop {
            if let Some(stop) = self.preflight(state) {
                state.apply(stop);
                self.settle_transition(state);
                self.flush(state).await;
                self.publish(state);
                break;
            }

            state.apply(StateUpdate::begin_iteration());
            self.emit(ExploreEvent::IterationStarted {
                session_id: state.session_id.clone(),
                iteration: state.iteration,
            });

            self.run_stages(state).await;
            if state.status.is_terminal() {
                self.settle_transition(state);
            }
            self.flush(state).await;

            let recorded = if state.status == ExploreStatus::Backtrack {
                self.backtrack(state).await
            } else {
                state.status
            };
            status_trail.push(recorded);
            self.publish(state);
            tracing::debug!(session_id = %state.session_id, iteration = state.iteration, status = %recorded, "iteration settled");

            if state.status.is_terminal() {
                break;
            }
        }

        tracing::info!(
            session_id = %state.session_id,
            status = %state.status,
            iterations = state.iteration,
            visited = state.visited_fingerprints().len(),
            "exploration finished"
        );
        self.emit(ExploreEvent::Finished {
            session_id: state.session_id.clone(),
            status: state.status,
            iterations: state.iteration,
            reason: state.terminal_reason.clone(),
        });

        RunReport {
            iterations: state.iteration,
            status_trail,
            final_status: state.status,
            reason: state.terminal_reason.clone(),
        }
    }

    /// 迭代开始前：取消与迭代上限
    fn preflight(&self, state: &ExplorationState) -> Option<StateUpdate> {
        if self.cancel.is_cancelled() {
            let err = ExploreError::Cancelled;
            return Some(StateUpdate::terminal(
                ExploreStatus::Failure,
                err.to_string(),
                format!("failure: {}", err),
            ));
        }
        if state.iteration >= self.max_iterations {
            return Some(StateUpdate::terminal(
                ExploreStatus::FlowEnd,
                "iteration cap reached",
                format!("flow end: iteration cap {} reached", self.max_iterations),
            ));
        }
        None
    }

    async fn run_stages(&self, state: &mut ExplorationState) {
        let visited_before = state.visited_fingerprints().len();
        match observe_stage(state, self.collaborators.perception.as_ref()).await {
            Ok(update) => state.apply(update),
            Err(e) => return self.fail(state, e),
        }
        if let Some(fp) = &state.current_fingerprint {
            self.emit(ExploreEvent::Observed {
                session_id: state.session_id.clone(),
                fingerprint: fp.to_string(),
                locator: state.current_locator.clone(),
                affordances: state.frontier.get(fp).map(|r| r.available_actions().len()).unwrap_or(0),
                new_state: state.visited_fingerprints().len() > visited_before,
            });
        }
        self.publish(state);
        if state.status.is_terminal() || self.cancelled(state) {
            return;
        }

        let ctx = DecideContext {
            provider: self.collaborators.decision.as_ref(),
            detectors: &self.detectors,
            shortcut: self.shortcut.as_ref(),
            history_tail: self.history_tail,
        };
        match decide_stage(state, &ctx).await {
            Ok(update) => state.apply(update),
            Err(e) => return self.fail(state, e),
        }
        let outcome = match state.status {
            ExploreStatus::Continue => "actions",
            ExploreStatus::Backtrack => "backtrack",
            _ => "terminal",
        };
        self.emit(ExploreEvent::Decided {
            session_id: state.session_id.clone(),
            outcome: outcome.to_string(),
            actions: state.pending_actions.len(),
        });
        if state.status != ExploreStatus::Continue || self.cancelled(state) {
            return;
        }

        let (update, report) =
            execute_stage(state, &self.executor, self.collaborators.target.as_ref()).await;
        state.apply(update);
        self.emit(ExploreEvent::BatchApplied {
            session_id: state.session_id.clone(),
            summary: report.summary(),
            success: report.is_success(),
        });
    }

    /// 阶段边界的取消检查；已取消时把会话置为 FAILURE
    fn cancelled(&self, state: &mut ExplorationState) -> bool {
        if self.cancel.is_cancelled() {
            self.fail(state, ExploreError::Cancelled);
            return true;
        }
        false
    }

    fn fail(&self, state: &mut ExplorationState, err: ExploreError) {
        match self.recovery.handle(&err) {
            RecoveryAction::Fail => {
                tracing::warn!(session_id = %state.session_id, error = %err, "session failed");
                let entry = format!("failure: {}", err);
                state.apply(StateUpdate::terminal(ExploreStatus::Failure, err.to_string(), entry));
            }
            RecoveryAction::LogAndContinue => {}
        }
    }

    /// PERSIST；失败只记录，outbox 无论成败都清空
    /// 会话结束前仍未观察到结果状态的转移以 `to = None` 写出
    fn settle_transition(&self, state: &mut ExplorationState) {
        if let Some(pending) = state.pending_transition.clone() {
            let record = pending.resolve(&state.session_id, None);
            state.apply(StateUpdate {
                pending_transition: Some(None),
                records: vec![record],
                ..StateUpdate::default()
            });
        }
    }

    async fn flush(&self, state: &mut ExplorationState) {
        let result = persist_stage(state, self.collaborators.sink.as_ref()).await;
        state.apply(StateUpdate {
            flush_outbox: true,
            ..StateUpdate::default()
        });
        if let Err(e) = result {
            if self.recovery.handle(&e) == RecoveryAction::LogAndContinue {
                self.emit(ExploreEvent::PersistFailed {
                    session_id: state.session_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// 弹出下一个回溯目标并切换 locator / fingerprint；栈空时结束会话。
    /// 返回本轮记录到状态序列中的值。
    async fn backtrack(&self, state: &mut ExplorationState) -> ExploreStatus {
        let popped = state.frontier.pop_next();
        let mut update = StateUpdate {
            history: popped.notes,
            ..StateUpdate::default()
        };

        match popped.target {
            Some(target) => {
                tracing::info!(
                    session_id = %state.session_id,
                    fingerprint = %target.fingerprint,
                    unexplored = target.unexplored_count,
                    "backtracking"
                );
                update.history.push(format!(
                    "backtrack to {} at {} ({} unexplored)",
                    target.fingerprint.short(),
                    target.locator,
                    target.unexplored_count
                ));
                update.locator = Some(target.locator.clone());
                update.fingerprint = Some(target.fingerprint.clone());
                update.status = Some(ExploreStatus::Continue);
                self.emit(ExploreEvent::Backtracked {
                    session_id: state.session_id.clone(),
                    fingerprint: target.fingerprint.to_string(),
                    locator: target.locator.clone(),
                    unexplored: target.unexplored_count,
                });
                update.resume = Some(Some(target));
                state.apply(update);
                ExploreStatus::Backtrack
            }
            None => {
                let mut terminal = StateUpdate::terminal(
                    ExploreStatus::FlowEnd,
                    "backtrack stack exhausted",
                    "flow end: backtrack stack exhausted",
                );
                update.history.append(&mut terminal.history);
                terminal.history = update.history;
                state.apply(terminal);
                // 覆盖本轮的迭代记录
                self.flush(state).await;
                ExploreStatus::FlowEnd
            }
        }
    }

    fn emit(&self, event: ExploreEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn publish(&self, state: &ExplorationState) {
        self.publish_as(state, SessionStatus::Running);
    }

    /// 以指定会话状态推送投影（注册表在会话结束时调用）
    pub fn publish_as(&self, state: &ExplorationState, status: SessionStatus) {
        if let Some((tx, created_at)) = &self.view {
            tx.send_replace(state.project(status, *created_at));
        }
    }
}
