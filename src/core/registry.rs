//! 会话注册表：每个 sessionId 一个流水线实例，会话之间完全独立并发
//!
//! 注册表自身的 id → 会话映射是唯一共享的可变结构，用 RwLock 串行化。
//! stop 立即从映射中移除会话、取消令牌并释放协作者资源；之后查询返回 SessionNotFound。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};

use crate::core::error::ExploreError;
use crate::core::events::ExploreEvent;
use crate::core::pipeline::{Collaborators, Pipeline, PipelineOptions};
use crate::core::session_supervisor::SessionSupervisor;
use crate::core::state::{ExplorationState, ExploreStatus, SessionStatus, SessionView};
use crate::decision::Credentials;

/// start 请求
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub target_locator: String,
    pub max_iterations: Option<usize>,
    pub credentials: Option<Credentials>,
}

impl StartRequest {
    pub fn new(target_locator: impl Into<String>) -> Self {
        Self {
            target_locator: target_locator.into(),
            max_iterations: None,
            credentials: None,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// 为每个会话创建独立的协作者（浏览器、决策后端、持久化连接）
#[async_trait]
pub trait CollaboratorFactory: Send + Sync {
    async fn create(&self, request: &StartRequest) -> Result<Collaborators, ExploreError>;
}

/// list 返回的会话摘要
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub explore_status: ExploreStatus,
    pub iteration: usize,
    pub locator: String,
    pub created_at: DateTime<Utc>,
}

struct SessionHandle {
    created_at: DateTime<Utc>,
    supervisor: SessionSupervisor,
    collaborators: Collaborators,
    released: Arc<AtomicBool>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    async fn release(&self) {
        release_once(&self.collaborators, &self.released).await;
    }
}

/// 协作者只释放一次（stop 与会话自然结束可能并发）
async fn release_once(collaborators: &Collaborators, released: &AtomicBool) {
    if !released.swap(true, Ordering::SeqCst) {
        collaborators.release().await;
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    factory: Arc<dyn CollaboratorFactory>,
    defaults: PipelineOptions,
    root: SessionSupervisor,
    events: broadcast::Sender<ExploreEvent>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn CollaboratorFactory>, defaults: PipelineOptions) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            defaults,
            root: SessionSupervisor::new(),
            events,
        }
    }

    /// 订阅所有会话的探索事件
    pub fn subscribe(&self) -> broadcast::Receiver<ExploreEvent> {
        self.events.subscribe()
    }

    /// 创建会话并在后台任务中运行流水线，返回 sessionId
    pub async fn start(&self, request: StartRequest) -> Result<String, ExploreError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let collaborators = self.factory.create(&request).await?;

        let mut options = self.defaults.clone();
        if let Some(max) = request.max_iterations {
            options.max_iterations = max;
        }
        if request.credentials.is_some() {
            options.credentials = request.credentials.clone();
        }

        let (view_tx, view_rx) = watch::channel(SessionView::idle(
            &session_id,
            &request.target_locator,
            created_at,
        ));
        let supervisor = self.root.child();
        let released = Arc::new(AtomicBool::new(false));
        let handle = Arc::new(SessionHandle {
            created_at,
            supervisor: supervisor.clone(),
            collaborators: collaborators.clone(),
            released: Arc::clone(&released),
            view: view_rx,
        });
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), handle);

        let pipeline = Pipeline::new(collaborators.clone(), options)
            .with_cancel(supervisor.cancel_token())
            .with_events(self.events.clone())
            .with_view(view_tx, created_at);
        let mut state = ExplorationState::new(session_id.clone(), request.target_locator);

        tracing::info!(session_id = %session_id, "session started");
        tokio::spawn(async move {
            pipeline.publish_as(&state, SessionStatus::Running);
            let report = pipeline.run(&mut state).await;
            release_once(&collaborators, &released).await;
            let final_status = match report.final_status {
                ExploreStatus::Failure => SessionStatus::Error,
                _ => SessionStatus::Completed,
            };
            pipeline.publish_as(&state, final_status);
        });

        Ok(session_id)
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionView, ExploreError> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| ExploreError::SessionNotFound(session_id.to_string()))?;
        let view = handle.view.borrow().clone();
        Ok(view)
    }

    /// 停止会话：移除、取消、释放资源。只有第一次调用生效，之后返回 SessionNotFound
    pub async fn stop(&self, session_id: &str) -> Result<(), ExploreError> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| ExploreError::SessionNotFound(session_id.to_string()))?;
        handle.supervisor.cancel();
        handle.release().await;
        tracing::info!(session_id = %session_id, "session stopped");
        Ok(())
    }

    /// 按创建时间排序的会话摘要
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .map(|h| {
                let view = h.view.borrow();
                SessionSummary {
                    session_id: view.session_id.clone(),
                    status: view.status,
                    explore_status: view.explore_status,
                    iteration: view.iteration,
                    locator: view.current_locator.clone(),
                    created_at: h.created_at,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// 等待会话结束（completed / error），返回最终视图
    pub async fn wait(&self, session_id: &str) -> Result<SessionView, ExploreError> {
        let mut rx = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .ok_or_else(|| ExploreError::SessionNotFound(session_id.to_string()))?
                .view
                .clone()
        };
        let finished = rx
            .wait_for(|v| v.status.is_finished())
            .await
            .map(|view| view.clone());
        // 发送端已丢弃（任务异常退出）时返回最后一次投影
        Ok(finished.unwrap_or_else(|_| rx.borrow().clone()))
    }

    /// 移除已结束的会话并确保其资源已释放，返回移除数量
    pub async fn cleanup_finished(&self) -> usize {
        let finished: Vec<Arc<SessionHandle>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, h)| h.view.borrow().status.is_finished())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        futures_util::future::join_all(finished.iter().map(|h| h.release())).await;
        finished.len()
    }

    /// 停止所有会话（进程关闭时）。只取消已登记的会话，之后仍可 start 新会话。
    pub async fn stop_all(&self) {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.write().await.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.supervisor.cancel();
        }
        futures_util::future::join_all(handles.iter().map(|h| h.release())).await;
        tracing::info!(count = handles.len(), "all sessions stopped");
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
