//! 协作者装配：根据配置为每个会话创建浏览器驱动、决策后端与持久化 sink

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::core::{CollaboratorFactory, Collaborators, ExploreError, PipelineOptions, StartRequest};
use crate::decision::{Credentials, DecisionProvider, HeuristicDecisionProvider, LlmDecisionProvider};
use crate::llm::{create_deepseek_client, LlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::persistence::{MemorySink, PersistenceSink, SqliteSink};

/// 按配置与环境变量选择 LLM：
/// - provider = heuristic 时不使用 LLM
/// - 有 DeepSeek Key，或 provider = deepseek 且有 OpenAI Key 时走 DeepSeek
/// - 有 OpenAI Key 时走 OpenAI 兼容端点（可配置 base_url）
/// - 否则返回 None，由调用方退回启发式决策
pub fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "heuristic" {
        return None;
    }
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = if provider == "deepseek" {
            cfg.llm.model.clone()
        } else {
            DEEPSEEK_CHAT.to_string()
        };
        tracing::info!("Using DeepSeek LLM ({})", model);
        Some(Arc::new(create_deepseek_client(&model)))
    } else if use_openai {
        let model = cfg.llm.model.clone();
        tracing::info!("Using OpenAI LLM ({})", model);
        Some(Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        )))
    } else {
        tracing::warn!(provider = %provider, "No API key set, falling back to heuristic decisions");
        None
    }
}

pub fn create_decision_provider(cfg: &AppConfig) -> Arc<dyn DecisionProvider> {
    match create_llm_from_config(cfg) {
        Some(llm) => Arc::new(LlmDecisionProvider::new(
            llm,
            Duration::from_secs(cfg.llm.timeouts.request),
        )),
        None => Arc::new(HeuristicDecisionProvider::new()),
    }
}

/// 配置了 sqlite_path 时每个会话打开独立连接，否则使用内存 sink
pub fn create_sink(cfg: &AppConfig) -> Result<Arc<dyn PersistenceSink>, ExploreError> {
    match &cfg.persistence.sqlite_path {
        Some(path) => {
            let sink = SqliteSink::open(path)
                .map_err(|e| ExploreError::ConfigError(format!("{}: {}", path.display(), e)))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(MemorySink::new())),
    }
}

pub fn pipeline_options(cfg: &AppConfig) -> PipelineOptions {
    PipelineOptions {
        max_iterations: cfg.explore.max_iterations,
        history_tail: cfg.explore.history_tail,
        credentials: None,
    }
}

/// 从 FORAGER_USERNAME / FORAGER_PASSWORD 读取登录凭据；缺少密码时视为未提供
pub fn credentials_from_env() -> Option<Credentials> {
    let password = std::env::var("FORAGER_PASSWORD").ok().filter(|p| !p.is_empty())?;
    let username = std::env::var("FORAGER_USERNAME").unwrap_or_default();
    Some(Credentials { username, password })
}

/// 默认协作者工厂：真实浏览器 + 配置选择的决策后端 + 配置选择的 sink
pub struct DefaultFactory {
    cfg: AppConfig,
}

impl DefaultFactory {
    pub fn new(cfg: AppConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl CollaboratorFactory for DefaultFactory {
    #[cfg(feature = "browser")]
    async fn create(&self, request: &StartRequest) -> Result<Collaborators, ExploreError> {
        let driver = Arc::new(crate::browser::BrowserDriver::new(&self.cfg.browser));
        tracing::debug!(target_locator = %request.target_locator, "creating browser collaborators");
        Ok(Collaborators {
            perception: driver.clone(),
            decision: create_decision_provider(&self.cfg),
            target: driver,
            sink: create_sink(&self.cfg)?,
            sanitizer: Arc::new(crate::actions::CssSelectorSanitizer),
        })
    }

    #[cfg(not(feature = "browser"))]
    async fn create(&self, request: &StartRequest) -> Result<Collaborators, ExploreError> {
        tracing::error!(target_locator = %request.target_locator, "browser support not compiled in");
        Err(ExploreError::ConfigError(
            "built without the `browser` feature; rebuild with --features browser".to_string(),
        ))
    }
}
