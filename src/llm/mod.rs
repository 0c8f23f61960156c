//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use message::{Message, Role};
pub use mock::ScriptedLlmClient;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, Usage};
