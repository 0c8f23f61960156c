//! 决策层：DecisionProvider 契约、输出规范化、能力探测与确定性捷径
//!
//! 核心只接受三种决策形态：单个动作、有序批次、终止信号。
//! 无法规范化的输出一律降级为终止信号，不做无限重试。

pub mod detectors;
pub mod heuristic;
pub mod llm;
pub mod parse;
pub mod shortcut;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::Action;

pub use detectors::{default_detectors, Capability, CapabilityDetector, LoginFormDetector, ModalDetector};
pub use heuristic::HeuristicDecisionProvider;
pub use llm::LlmDecisionProvider;
pub use parse::{normalize, parse_decision, DecisionParseError};
pub use shortcut::LoginShortcut;

/// 规范化后的决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionResult {
    Single(Action),
    Batch(Vec<Action>),
    Terminal { reason: String },
}

impl DecisionResult {
    pub fn terminal(reason: impl Into<String>) -> Self {
        DecisionResult::Terminal {
            reason: reason.into(),
        }
    }

    /// 终止信号返回 None
    pub fn into_actions(self) -> Option<Vec<Action>> {
        match self {
            DecisionResult::Single(action) => Some(vec![action]),
            DecisionResult::Batch(actions) => Some(actions),
            DecisionResult::Terminal { .. } => None,
        }
    }
}

/// 后端原始回复：文本（需解析）或已结构化的决策（仍需经过策略校验）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReply {
    Text(String),
    Decision(DecisionResult),
}

/// 会话开始时提供的登录凭据
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 决策提示：能力探测结果、是否有凭据、当前状态未探索的动作
#[derive(Debug, Clone, Default, Serialize)]
pub struct Hints {
    pub credentials_available: bool,
    pub capabilities: Vec<Capability>,
    pub unexplored_actions: Vec<String>,
}

impl Hints {
    pub fn modal_present(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| matches!(c, Capability::Modal { .. }))
    }

    pub fn login_form(&self) -> Option<&Capability> {
        self.capabilities
            .iter()
            .find(|c| matches!(c, Capability::LoginForm { .. }))
    }

    /// 拼入 prompt 的提示段落
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::from("## Hints\n");
        s.push_str(&format!("- credentials available: {}\n", self.credentials_available));
        s.push_str(&format!("- modal present: {}\n", self.modal_present()));
        if self.login_form().is_some() {
            s.push_str("- login form detected\n");
        }
        if self.unexplored_actions.is_empty() {
            s.push_str("- no unexplored elements on this page\n");
        } else {
            s.push_str("- unexplored elements (prefer these):\n");
            for a in &self.unexplored_actions {
                s.push_str(&format!("  - {}\n", a));
            }
        }
        s
    }
}

/// 决策后端（启发式或 LLM）
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(
        &self,
        snapshot: &str,
        history_tail: &[String],
        hints: &Hints,
    ) -> Result<ProviderReply, String>;
}
