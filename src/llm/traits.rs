//! LLM 客户端抽象：决策层只需要一次非流式的 chat completion

use async_trait::async_trait;

use crate::llm::Message;

/// 累计 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 返回首条回复的文本；失败时给出原因
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 日志中展示的模型名
    fn model(&self) -> &str;

    fn usage(&self) -> Usage {
        Usage::default()
    }
}
