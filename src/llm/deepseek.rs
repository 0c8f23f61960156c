//! DeepSeek 端点（OpenAI 兼容格式）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
/// 决策只需要常规对话模型，响应快于推理模型
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// Key 取 DEEPSEEK_API_KEY，缺省时退回 OPENAI_API_KEY
pub fn create_deepseek_client(model: &str) -> OpenAiClient {
    let api_key = ["DEEPSEEK_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .find_map(|name| std::env::var(name).ok());
    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), model, api_key.as_deref())
}
