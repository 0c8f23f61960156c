//! 动作层：原子动作定义、选择器清洗、批次执行器

pub mod executor;
pub mod sanitizer;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use executor::{ActionOutcome, BatchExecutor, BatchReport};
pub use sanitizer::{CssSelectorSanitizer, SelectorSanitizer};

/// 动作类型；navigate 仅允许在会话开始时出现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Activate,
    EnterText,
    ChooseOption,
    Navigate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Activate => "activate",
            ActionKind::EnterText => "enter_text",
            ActionKind::ChooseOption => "choose_option",
            ActionKind::Navigate => "navigate",
        }
    }
}

/// 原子动作：target 为元素引用（选择器），navigate 时为目标地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl Action {
    pub fn activate(target: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Activate,
            target: Some(target.into()),
            text: None,
            value: None,
        }
    }

    pub fn enter_text(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::EnterText,
            target: Some(target.into()),
            text: Some(text.into()),
            value: None,
        }
    }

    pub fn choose_option(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::ChooseOption,
            target: Some(target.into()),
            text: None,
            value: Some(value.into()),
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Navigate,
            target: Some(url.into()),
            text: None,
            value: None,
        }
    }

    /// 检查该类型所需参数，缺失时返回缺失的参数名
    pub fn missing_parameter(&self) -> Option<&'static str> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !present(&self.target) {
            return Some("target");
        }
        match self.kind {
            // 空字符串也是合法输入（清空输入框）
            ActionKind::EnterText if self.text.is_none() => Some("text"),
            ActionKind::ChooseOption if !present(&self.value) => Some("value"),
            _ => None,
        }
    }

    /// frontier 中的动作标识：即元素引用
    pub fn affordance(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

/// 用于 history 的可读形式；输入内容只显示长度，避免凭据写入日志
impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.target.as_deref().unwrap_or("<missing>");
        match self.kind {
            ActionKind::EnterText => {
                let len = self.text.as_ref().map(|t| t.chars().count()).unwrap_or(0);
                write!(f, "{} {} ({} chars)", self.kind.as_str(), target, len)
            }
            ActionKind::ChooseOption => write!(
                f,
                "{} {} = {}",
                self.kind.as_str(),
                target,
                self.value.as_deref().unwrap_or("<missing>")
            ),
            _ => write!(f, "{} {}", self.kind.as_str(), target),
        }
    }
}

/// 动作目标（被探索的应用）：apply 的副作用在外部，失败时返回原因
#[async_trait]
pub trait ActionTarget: Send + Sync {
    async fn apply(&self, action: &Action) -> Result<(), String>;

    /// 释放会话持有的资源；之后进行中的调用应当失败
    async fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter() {
        assert_eq!(Action::activate("#go").missing_parameter(), None);
        assert_eq!(Action::enter_text("#q", "").missing_parameter(), None);
        assert_eq!(Action::choose_option("#lang", "en").missing_parameter(), None);

        let no_target = Action {
            kind: ActionKind::Activate,
            target: None,
            text: None,
            value: None,
        };
        assert_eq!(no_target.missing_parameter(), Some("target"));

        let no_text = Action {
            kind: ActionKind::EnterText,
            target: Some("#q".into()),
            text: None,
            value: None,
        };
        assert_eq!(no_text.missing_parameter(), Some("text"));

        let blank_value = Action::choose_option("#lang", "  ");
        assert_eq!(blank_value.missing_parameter(), Some("value"));
    }

    #[test]
    fn test_display_hides_text() {
        let action = Action::enter_text("#password", "hunter2");
        let shown = action.to_string();
        assert_eq!(shown, "enter_text #password (7 chars)");
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_deserialize_snake_case_kind() {
        let action: Action =
            serde_json::from_str(r##"{"kind": "choose_option", "target": "#lang", "value": "de"}"##)
                .unwrap();
        assert_eq!(action, Action::choose_option("#lang", "de"));
    }
}
