//! 能力探测器：从规范化快照中识别登录表单、模态框等结构，输出结构化提示
//!
//! 探测器只读快照文本，不参与状态机；结果经 Hints 交给决策层。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::perception::{parse_snapshot_line, SnapshotElement};

/// 探测到的能力；字段为快照中的元素引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum Capability {
    LoginForm {
        username: Option<String>,
        password: String,
        submit: Option<String>,
    },
    Modal {
        dismiss: Option<String>,
    },
}

pub trait CapabilityDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, snapshot: &str) -> Option<Capability>;
}

/// 默认探测器集合
pub fn default_detectors() -> Vec<Box<dyn CapabilityDetector>> {
    vec![Box::new(LoginFormDetector), Box::new(ModalDetector)]
}

fn elements(snapshot: &str) -> Vec<SnapshotElement> {
    snapshot.lines().filter_map(parse_snapshot_line).collect()
}

fn is_text_input(el: &SnapshotElement) -> bool {
    matches!(el.role.as_str(), "textbox" | "input" | "searchbox")
}

static PASSWORD_RE: OnceLock<Regex> = OnceLock::new();
static USERNAME_RE: OnceLock<Regex> = OnceLock::new();
static SUBMIT_RE: OnceLock<Regex> = OnceLock::new();

fn password_re() -> &'static Regex {
    PASSWORD_RE.get_or_init(|| Regex::new(r#"(?i)password|passwd|type="password"|密码"#).unwrap())
}

fn username_re() -> &'static Regex {
    USERNAME_RE.get_or_init(|| Regex::new(r"(?i)user|e-?mail|login|account|用户名|邮箱|账号").unwrap())
}

fn submit_re() -> &'static Regex {
    SUBMIT_RE.get_or_init(|| Regex::new(r"(?i)log\s?in|sign\s?in|submit|continue|登录").unwrap())
}

/// 登录表单：必须有密码输入框；用户名框与提交按钮尽力识别
pub struct LoginFormDetector;

impl CapabilityDetector for LoginFormDetector {
    fn name(&self) -> &str {
        "login_form"
    }

    fn detect(&self, snapshot: &str) -> Option<Capability> {
        let elements = elements(snapshot);
        let matches = |re: &Regex, el: &SnapshotElement| re.is_match(&el.selector) || re.is_match(&el.name);

        let password = elements
            .iter()
            .find(|el| is_text_input(el) && matches(password_re(), el))?;
        let username = elements
            .iter()
            .find(|el| {
                is_text_input(el) && el.selector != password.selector && matches(username_re(), el)
            })
            .map(|el| el.selector.clone());
        let submit = elements
            .iter()
            .find(|el| el.role == "button" && matches(submit_re(), el))
            .map(|el| el.selector.clone());

        Some(Capability::LoginForm {
            username,
            password: password.selector.clone(),
            submit,
        })
    }
}

static DISMISS_RE: OnceLock<Regex> = OnceLock::new();

fn dismiss_re() -> &'static Regex {
    DISMISS_RE.get_or_init(|| {
        Regex::new(r"(?i)^(close|dismiss|cancel|ok|got it|no thanks|accept|×|✕|关闭|取消|确定)$").unwrap()
    })
}

/// 模态框：快照中出现 dialog / alertdialog 行
pub struct ModalDetector;

impl CapabilityDetector for ModalDetector {
    fn name(&self) -> &str {
        "modal"
    }

    fn detect(&self, snapshot: &str) -> Option<Capability> {
        let elements = elements(snapshot);
        let dialog = elements
            .iter()
            .position(|el| matches!(el.role.as_str(), "dialog" | "alertdialog"))?;
        // 关闭按钮优先取对话框之后的元素
        let dismiss = elements[dialog..]
            .iter()
            .chain(elements[..dialog].iter())
            .find(|el| el.role == "button" && dismiss_re().is_match(el.name.trim()))
            .map(|el| el.selector.clone());
        Some(Capability::Modal { dismiss })
    }
}
