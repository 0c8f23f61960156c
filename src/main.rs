//! Forager 命令行入口
//!
//! 用法：`forager <url> [max_iterations]`
//!
//! 启动一个探索会话，把探索事件以 JSON 行输出到 stdout，结束后输出最终会话视图。
//! Ctrl+C / SIGTERM 会停止会话并释放浏览器与数据库连接。

use std::sync::Arc;

use anyhow::Context;
use forager::config::{load_config, AppConfig};
use forager::core::{
    run_with_graceful_shutdown, RegistryCleanup, SessionRegistry, ShutdownCoordinator,
    ShutdownReason, ShutdownSignal, StartRequest,
};
use forager::factory::{credentials_from_env, pipeline_options, DefaultFactory};
use forager::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .context("usage: forager <url> [max_iterations]")?;
    let max_iterations = args
        .next()
        .map(|s| s.parse::<usize>())
        .transpose()
        .context("max_iterations must be a positive integer")?;

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(DefaultFactory::new(cfg.clone())),
        pipeline_options(&cfg),
    ));

    let mut request = StartRequest::new(url);
    if let Some(max) = max_iterations {
        request = request.with_max_iterations(max);
    }
    if let Some(credentials) = credentials_from_env() {
        request = request.with_credentials(credentials);
    }

    // 事件以 JSON 行输出
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        }
    });

    let session_id = registry
        .start(request)
        .await
        .context("Failed to start session")?;

    let signal = Arc::new(ShutdownSignal::new());
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(RegistryCleanup::new(Arc::clone(&registry)));

    let waiter = Arc::clone(&registry);
    let id = session_id.clone();
    let final_view = Arc::new(tokio::sync::Mutex::new(None));
    let slot = Arc::clone(&final_view);
    let fatal = Arc::clone(&signal);
    let app = async move {
        match waiter.wait(&id).await {
            Ok(view) => *slot.lock().await = Some(view),
            Err(e) => {
                tracing::warn!(error = %e, "session lookup failed");
                fatal.trigger(ShutdownReason::FatalError(e.to_string()));
            }
        }
    };
    if let Some(reason) = run_with_graceful_shutdown(signal, app, &coordinator).await {
        tracing::info!(?reason, "shut down before the session finished");
    }

    match final_view.lock().await.take() {
        Some(view) => println!(
            "{}",
            serde_json::to_string_pretty(&view).context("Failed to encode session view")?
        ),
        None => tracing::info!(session_id = %session_id, "session stopped before completion"),
    }

    Ok(())
}
