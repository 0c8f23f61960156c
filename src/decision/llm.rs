//! LLM 决策后端：拼装 prompt，调用 LlmClient，原样返回文本交给核心规范化

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::decision::{DecisionProvider, Hints, ProviderReply};
use crate::llm::{LlmClient, Message};

const SYSTEM_PROMPT: &str = r#"You are exploring an unfamiliar web application to discover its flows.
Each turn you receive a snapshot of the current page. Every interactive element is listed as
`[<selector>] <role>: "<name>"`. Use the selector exactly as shown as the action target.

Reply with JSON only, in one of these shapes:
- one action: {"kind": "activate", "target": "<selector>"}
- several actions applied in order: {"actions": [{"kind": "enter_text", "target": "<selector>", "text": "..."}, {"kind": "activate", "target": "<selector>"}]}
- nothing left worth exploring: {"done": true, "reason": "..."}

Action kinds: activate (click), enter_text (requires "text"), choose_option (requires "value").
Do not navigate to other addresses. Prefer elements you have not used yet."#;

pub struct LlmDecisionProvider {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmDecisionProvider {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    fn build_messages(snapshot: &str, history_tail: &[String], hints: &Hints) -> Vec<Message> {
        let history = if history_tail.is_empty() {
            "(none yet)".to_string()
        } else {
            history_tail
                .iter()
                .enumerate()
                .map(|(i, h)| format!("{}. {}", i + 1, h))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let user = format!(
            "## Current page\n{}\n\n## Recent history\n{}\n\n{}",
            snapshot,
            history,
            hints.to_prompt_section()
        );
        vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
    }
}

#[async_trait]
impl DecisionProvider for LlmDecisionProvider {
    async fn decide(
        &self,
        snapshot: &str,
        history_tail: &[String],
        hints: &Hints,
    ) -> Result<ProviderReply, String> {
        let messages = Self::build_messages(snapshot, history_tail, hints);
        let reply = tokio::time::timeout(self.timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| format!("decision timed out after {}s", self.timeout.as_secs()))??;

        tracing::debug!(
            model = self.llm.model(),
            reply_len = reply.len(),
            total_tokens = self.llm.usage().total(),
            "llm decision"
        );
        Ok(ProviderReply::Text(reply))
    }
}
