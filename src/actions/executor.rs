//! 批次执行器
//!
//! 严格从左到右执行；第一个失败之后的动作全部跳过，已生效的动作不回滚。
//! 每次派发输出结构化审计日志（JSON），整个批次在 history 中只产生一条汇总记录。

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::actions::{Action, ActionKind, ActionTarget, SelectorSanitizer};

/// 单个动作的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied { action: Action },
    Failed { action: Action, reason: String },
    Skipped { action: Action },
}

impl ActionOutcome {
    pub fn action(&self) -> &Action {
        match self {
            ActionOutcome::Applied { action }
            | ActionOutcome::Failed { action, .. }
            | ActionOutcome::Skipped { action } => action,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied { .. })
    }
}

/// 批次执行报告（按输入顺序）
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<ActionOutcome>,
}

impl BatchReport {
    pub fn applied(&self) -> impl Iterator<Item = &Action> {
        self.outcomes.iter().filter_map(|o| match o {
            ActionOutcome::Applied { action } => Some(action),
            _ => None,
        })
    }

    /// 已派发（成功或失败）的动作，即 frontier 中应标记为已探索的动作
    pub fn issued(&self) -> impl Iterator<Item = &Action> {
        self.outcomes.iter().filter_map(|o| match o {
            ActionOutcome::Skipped { .. } => None,
            other => Some(other.action()),
        })
    }

    pub fn failure(&self) -> Option<(&Action, &str)> {
        self.outcomes.iter().find_map(|o| match o {
            ActionOutcome::Failed { action, reason } => Some((action, reason.as_str())),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// 写入 action_history 的汇总：按顺序列出 applied / failed / skipped
    pub fn summary(&self) -> String {
        let applied: Vec<String> = self.applied().map(|a| a.to_string()).collect();
        let failed: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ActionOutcome::Failed { action, reason } => Some(format!("{action}: {reason}")),
                _ => None,
            })
            .collect();
        let skipped: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ActionOutcome::Skipped { action } => Some(action.to_string()),
                _ => None,
            })
            .collect();
        format!(
            "batch: applied [{}]; failed [{}]; skipped [{}]",
            applied.join(", "),
            failed.join(", "),
            skipped.join(", ")
        )
    }
}

/// 批次执行器：持有选择器清洗能力，对目标依次派发动作
pub struct BatchExecutor {
    sanitizer: Arc<dyn SelectorSanitizer>,
}

impl BatchExecutor {
    pub fn new(sanitizer: Arc<dyn SelectorSanitizer>) -> Self {
        Self { sanitizer }
    }

    pub async fn execute(&self, actions: &[Action], target: &dyn ActionTarget) -> BatchReport {
        let mut report = BatchReport::default();
        let mut failed = false;

        for action in actions {
            let action = self.sanitized(action);
            if failed {
                report.outcomes.push(ActionOutcome::Skipped { action });
                continue;
            }

            if let Some(param) = action.missing_parameter() {
                let reason = format!("missing required parameter '{param}' for {}", action.kind.as_str());
                audit(&action, "invalid", 0);
                report.outcomes.push(ActionOutcome::Failed { action, reason });
                failed = true;
                continue;
            }

            let start = Instant::now();
            let result = target.apply(&action).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            match result {
                Ok(()) => {
                    audit(&action, "ok", duration_ms);
                    report.outcomes.push(ActionOutcome::Applied { action });
                }
                Err(reason) => {
                    audit(&action, "error", duration_ms);
                    report.outcomes.push(ActionOutcome::Failed { action, reason });
                    failed = true;
                }
            }
        }

        report
    }

    fn sanitized(&self, action: &Action) -> Action {
        let mut action = action.clone();
        if action.kind != ActionKind::Navigate {
            action.target = action
                .target
                .as_deref()
                .map(|t| self.sanitizer.sanitize(t))
                .filter(|t| !t.is_empty());
        }
        action
    }
}

fn audit(action: &Action, outcome: &str, duration_ms: u64) {
    let target_preview: String = action
        .target
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(120)
        .collect();
    let audit = serde_json::json!({
        "event": "action_audit",
        "kind": action.kind.as_str(),
        "target": target_preview,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
    });
    tracing::info!(audit = %audit, "action");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::actions::CssSelectorSanitizer;

    /// 记录收到的动作；target 命中 fail_on 时返回失败
    struct RecordingTarget {
        fail_on: Option<String>,
        applied: Mutex<Vec<Action>>,
    }

    impl RecordingTarget {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                fail_on: fail_on.map(String::from),
                applied: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ActionTarget for RecordingTarget {
        async fn apply(&self, action: &Action) -> Result<(), String> {
            if action.target == self.fail_on {
                return Err("element detached".to_string());
            }
            self.applied.lock().unwrap().push(action.clone());
            Ok(())
        }
    }

    fn executor() -> BatchExecutor {
        BatchExecutor::new(Arc::new(CssSelectorSanitizer))
    }

    #[tokio::test]
    async fn test_all_applied() {
        let target = RecordingTarget::new(None);
        let actions = vec![Action::enter_text("#q", "rust"), Action::activate("#go")];
        let report = executor().execute(&actions, &target).await;

        assert!(report.is_success());
        assert_eq!(report.applied().count(), 2);
        assert_eq!(target.applied.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_skips_rest() {
        let target = RecordingTarget::new(Some("#b"));
        let actions = vec![
            Action::activate("#a"),
            Action::activate("#b"),
            Action::activate("#c"),
        ];
        let report = executor().execute(&actions, &target).await;

        assert!(matches!(report.outcomes[0], ActionOutcome::Applied { .. }));
        assert!(matches!(report.outcomes[1], ActionOutcome::Failed { .. }));
        assert!(matches!(report.outcomes[2], ActionOutcome::Skipped { .. }));
        assert_eq!(target.applied.lock().unwrap().len(), 1);
        assert_eq!(
            report.summary(),
            "batch: applied [activate #a]; failed [activate #b: element detached]; skipped [activate #c]"
        );
        let issued: Vec<_> = report.issued().filter_map(Action::affordance).collect();
        assert_eq!(issued, vec!["#a", "#b"]);
    }

    #[tokio::test]
    async fn test_missing_parameter_is_action_failure() {
        let target = RecordingTarget::new(None);
        let broken = Action {
            kind: ActionKind::ChooseOption,
            target: Some("#lang".to_string()),
            text: None,
            value: None,
        };
        let actions = vec![broken, Action::activate("#go")];
        let report = executor().execute(&actions, &target).await;

        let (action, reason) = report.failure().unwrap();
        assert_eq!(action.kind, ActionKind::ChooseOption);
        assert!(reason.contains("value"));
        assert!(matches!(report.outcomes[1], ActionOutcome::Skipped { .. }));
        assert!(target.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_targets_sanitized_before_dispatch() {
        let target = RecordingTarget::new(None);
        let actions = vec![Action::activate("[#submit]")];
        let report = executor().execute(&actions, &target).await;

        assert!(report.is_success());
        assert_eq!(
            target.applied.lock().unwrap()[0].target.as_deref(),
            Some("#submit")
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let target = RecordingTarget::new(None);
        let report = executor().execute(&[], &target).await;
        assert!(report.is_success());
        assert_eq!(report.summary(), "batch: applied []; failed []; skipped []");
    }
}
