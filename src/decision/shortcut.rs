//! 确定性捷径：探测到登录表单且有凭据时，直接生成登录批次，不经过决策后端

use crate::actions::Action;
use crate::decision::{Capability, Credentials, DecisionResult, Hints};

pub struct LoginShortcut {
    credentials: Credentials,
}

impl LoginShortcut {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// 仅当密码框尚未探索时生效，保证同一表单只自动提交一次
    pub fn propose(&self, hints: &Hints) -> Option<DecisionResult> {
        let Some(Capability::LoginForm {
            username,
            password,
            submit,
        }) = hints.login_form()
        else {
            return None;
        };
        if !hints.unexplored_actions.iter().any(|a| a == password) {
            return None;
        }

        let mut batch = Vec::with_capacity(3);
        if let Some(username) = username {
            batch.push(Action::enter_text(username.clone(), self.credentials.username.clone()));
        }
        batch.push(Action::enter_text(password.clone(), self.credentials.password.clone()));
        if let Some(submit) = submit {
            batch.push(Action::activate(submit.clone()));
        }
        tracing::debug!(steps = batch.len(), "login shortcut engaged");
        Some(DecisionResult::Batch(batch))
    }
}
