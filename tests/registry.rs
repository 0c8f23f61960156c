//! 会话注册表：并发会话、停止与资源释放

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{linear_app, SimFactory, START};
use forager::core::{
    ExploreError, ExploreStatus, PipelineOptions, SessionRegistry, SessionStatus, StartRequest,
};

fn registry(factory: Arc<SimFactory>) -> SessionRegistry {
    SessionRegistry::new(factory, PipelineOptions::default())
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let factory = Arc::new(SimFactory::new(linear_app));
    let registry = registry(factory.clone());

    let a = registry.start(StartRequest::new(START)).await.unwrap();
    let b = registry.start(StartRequest::new(START)).await.unwrap();
    assert_ne!(a, b);

    let (va, vb) = tokio::join!(registry.wait(&a), registry.wait(&b));
    let (va, vb) = (va.unwrap(), vb.unwrap());
    for view in [&va, &vb] {
        assert_eq!(view.status, SessionStatus::Completed);
        assert_eq!(view.explore_status, ExploreStatus::FlowEnd);
        assert_eq!(view.visited, 3);
    }
    assert_eq!(factory.app(0).applied().len(), 2);
    assert_eq!(factory.app(1).applied().len(), 2);
    assert!(factory.app(0).is_released());
    assert!(factory.sinks.lock().unwrap().iter().all(|s| s.is_closed()));
}

#[tokio::test]
async fn test_stop_releases_and_forgets_session() {
    let factory = Arc::new(SimFactory::new(|| linear_app().hold()));
    let registry = registry(factory.clone());

    let id = registry.start(StartRequest::new(START)).await.unwrap();
    let view = registry.status(&id).await.unwrap();
    assert!(!view.status.is_finished());

    registry.stop(&id).await.unwrap();
    assert!(factory.app(0).is_released());
    assert!(matches!(
        registry.status(&id).await,
        Err(ExploreError::SessionNotFound(_))
    ));
    assert!(matches!(
        registry.stop(&id).await,
        Err(ExploreError::SessionNotFound(_))
    ));

    // 后台任务结束后不会重复释放（perception + target 各一次）
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(factory.app(0).release_calls(), 2);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let registry = registry(Arc::new(SimFactory::new(linear_app)));
    assert!(matches!(
        registry.status("missing").await,
        Err(ExploreError::SessionNotFound(_))
    ));
    assert!(matches!(
        registry.wait("missing").await,
        Err(ExploreError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_factory_error_does_not_register() {
    let registry = registry(Arc::new(SimFactory::new(linear_app)));
    let err = registry.start(StartRequest::new("")).await.unwrap_err();
    assert!(matches!(err, ExploreError::ConfigError(_)));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_list_and_cleanup_finished() {
    let factory = Arc::new(SimFactory::new(linear_app));
    let registry = registry(factory);

    let first = registry.start(StartRequest::new(START)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = registry
        .start(StartRequest::new(START).with_max_iterations(1))
        .await
        .unwrap();

    let ids: Vec<String> = registry.list().await.into_iter().map(|s| s.session_id).collect();
    assert_eq!(ids, vec![first.clone(), second.clone()]);

    registry.wait(&first).await.unwrap();
    let capped = registry.wait(&second).await.unwrap();
    assert_eq!(capped.iteration, 1);
    assert_eq!(capped.explore_status, ExploreStatus::FlowEnd);

    assert_eq!(registry.cleanup_finished().await, 2);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_stop_all_releases_everything() {
    let factory = Arc::new(SimFactory::new(|| linear_app().hold()));
    let registry = registry(factory.clone());

    registry.start(StartRequest::new(START)).await.unwrap();
    registry.start(StartRequest::new(START)).await.unwrap();
    assert_eq!(registry.len().await, 2);

    registry.stop_all().await;
    assert!(registry.is_empty().await);
    assert!(factory.app(0).is_released());
    assert!(factory.app(1).is_released());
}

#[tokio::test]
async fn test_registry_accepts_sessions_after_stop_all() {
    let started = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = started.clone();
    let factory = Arc::new(SimFactory::new(move || {
        let app = linear_app();
        if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            app.hold()
        } else {
            app
        }
    }));
    let registry = registry(factory.clone());

    registry.start(StartRequest::new(START)).await.unwrap();
    registry.stop_all().await;
    assert!(factory.app(0).is_released());

    let id = registry.start(StartRequest::new(START)).await.unwrap();
    let view = tokio::time::timeout(Duration::from_secs(5), registry.wait(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, SessionStatus::Completed);
    assert_eq!(view.explore_status, ExploreStatus::FlowEnd);
}
