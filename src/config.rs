//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，如 `FORAGER__EXPLORE__MAX_ITERATIONS=20`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub explore: ExploreSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub browser: BrowserSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [explore] 段：迭代上限与决策时携带的历史条数
#[derive(Debug, Clone, Deserialize)]
pub struct ExploreSection {
    /// 单个会话最大迭代数，到达后强制 FLOW_END
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 传给 DecisionProvider 的 action_history 尾部条数
    #[serde(default = "default_history_tail")]
    pub history_tail: usize,
}

impl Default for ExploreSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_tail: default_history_tail(),
        }
    }
}

fn default_max_iterations() -> usize {
    50
}

fn default_history_tail() -> usize {
    10
}

/// [llm] 段：决策后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / heuristic
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "heuristic".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [browser] 段：无头浏览器、域名白名单、快照长度
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// 允许访问的域名；为空表示不限制
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_max_snapshot_chars")]
    pub max_snapshot_chars: usize,
    /// 导航或动作后等待页面稳定的毫秒数
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            allowed_domains: Vec::new(),
            max_snapshot_chars: default_max_snapshot_chars(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_headless() -> bool {
    true
}

fn default_max_snapshot_chars() -> usize {
    8000
}

fn default_settle_ms() -> u64 {
    500
}

/// [persistence] 段：未配置 sqlite_path 时使用内存 sink
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PersistenceSection {
    pub sqlite_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 FORAGER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
