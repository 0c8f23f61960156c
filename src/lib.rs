//! Forager - Rust 自主探索智能体
//!
//! 模块划分：
//! - **actions**: 动作模型、选择器清洗、批量执行器
//! - **browser**: Headless Chrome 驱动（feature `browser`）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 指纹、frontier、状态 reducer、探索流水线、会话注册表、优雅关闭
//! - **decision**: 决策后端（LLM / 启发式）、回复解析、能力探测、登录捷径
//! - **factory**: 按配置装配每个会话的协作者
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）
//! - **perception**: 观察与快照渲染
//! - **persistence**: 探索图谱持久化（SQLite / 内存）

pub mod actions;
#[cfg(feature = "browser")]
pub mod browser;
pub mod config;
pub mod core;
pub mod decision;
pub mod factory;
pub mod llm;
pub mod observability;
pub mod perception;
pub mod persistence;
