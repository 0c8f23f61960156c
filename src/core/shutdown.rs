//! 进程级关闭：Ctrl+C / SIGTERM 停止所有会话，释放浏览器与数据库连接
//!
//! 第一个关闭原因生效；清理任务并发执行，各自有超时，互不阻塞。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::registry::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

/// 关闭信号：取消令牌 + 首个关闭原因
#[derive(Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 只记录第一次的原因；重复触发无副作用
    pub fn trigger(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }

    /// 监听 Ctrl+C 与 SIGTERM
    pub fn listen_for_signals(self: &Arc<Self>) {
        let signal = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, stopping sessions");
                signal.trigger(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let signal = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal as unix_signal, SignalKind};
                if let Ok(mut sigterm) = unix_signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, stopping sessions");
                    signal.trigger(ShutdownReason::Signal);
                }
            });
        }
    }
}

#[async_trait]
pub trait ShutdownCleanup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// 一次清理的结果（按任务名）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed: Vec<&'static str>,
    pub failed: Vec<&'static str>,
    pub timed_out: Vec<&'static str>,
}

pub struct ShutdownCoordinator {
    tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(&mut self, task: impl ShutdownCleanup + 'static) {
        self.tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) -> CleanupReport {
        let runs = self.tasks.iter().map(|task| async move {
            let outcome = tokio::time::timeout(self.timeout, task.cleanup()).await;
            (task.name(), outcome)
        });

        let mut report = CleanupReport::default();
        for (name, outcome) in futures_util::future::join_all(runs).await {
            match outcome {
                Ok(Ok(())) => report.completed.push(name),
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "cleanup failed");
                    report.failed.push(name);
                }
                Err(_) => {
                    tracing::warn!(task = name, timeout_ms = self.timeout.as_millis() as u64, "cleanup timed out");
                    report.timed_out.push(name);
                }
            }
        }
        report
    }
}

/// 停止注册表中的所有会话
pub struct RegistryCleanup {
    registry: Arc<SessionRegistry>,
}

impl RegistryCleanup {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ShutdownCleanup for RegistryCleanup {
    fn name(&self) -> &'static str {
        "session-registry"
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.registry.stop_all().await;
        Ok(())
    }
}

/// 运行 app 直到结束或收到关闭信号，然后执行清理。
/// 返回关闭原因；app 自然结束时为 None。
pub async fn run_with_graceful_shutdown<F>(
    signal: Arc<ShutdownSignal>,
    app: F,
    coordinator: &ShutdownCoordinator,
) -> Option<ShutdownReason>
where
    F: Future<Output = ()>,
{
    signal.listen_for_signals();

    let token = signal.token();
    tokio::select! {
        _ = app => tracing::info!("Exploration finished"),
        _ = token.cancelled() => tracing::info!("Shutdown requested"),
    }

    let report = coordinator.run_cleanup().await;
    tracing::info!(
        completed = report.completed.len(),
        failed = report.failed.len(),
        timed_out = report.timed_out.len(),
        "cleanup finished"
    );
    signal.reason()
}
