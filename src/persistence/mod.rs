//! 持久化层：把探索图谱（状态、转移、迭代）按批次写入外部存储
//!
//! 每次 append_batch 必须整体生效或整体失败；核心只负责把一次 PERSIST 的记录打包成一批。
//! 写入失败只记日志，不阻塞探索。

pub mod sqlite;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::core::fingerprint::Fingerprint;
use crate::core::state::ExploreStatus;

pub use sqlite::{SqliteSink, Table};

/// 单条持久化记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    /// 首次发现的状态
    State {
        session_id: String,
        fingerprint: Fingerprint,
        locator: String,
        snapshot: String,
        parent: Option<Fingerprint>,
    },
    /// 一个动作批次导致的状态转移；会话在下一次观察前结束时 `to` 为空
    Transition {
        session_id: String,
        from: Fingerprint,
        to: Option<Fingerprint>,
        actions: String,
        iteration: usize,
    },
    /// 每轮迭代的汇总
    Iteration {
        session_id: String,
        iteration: usize,
        status: ExploreStatus,
        summary: String,
    },
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::State { .. } => "state",
            Record::Transition { .. } => "transition",
            Record::Iteration { .. } => "iteration",
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("background write task failed: {0}")]
    Join(String),
    #[error("sink is closed")]
    Closed,
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// 持久化接收端；语句必须参数化，不允许拼接查询字符串
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// 全有或全无
    async fn append_batch(&self, records: &[Record]) -> Result<(), PersistError>;

    /// 释放连接；之后的写入返回 Closed
    async fn close(&self) {}
}

/// 内存接收端：无数据库时使用，也用于测试（可注入失败）
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
    batches: AtomicUsize,
    fail_next: AtomicUsize,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来 n 次写入返回失败
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 成功写入的批次数
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn append_batch(&self, records: &[Record]) -> Result<(), PersistError> {
        if self.is_closed() {
            return Err(PersistError::Closed);
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PersistError::Rejected("injected failure".to_string()));
        }
        let mut stored = self
            .records
            .lock()
            .map_err(|e| PersistError::Rejected(e.to_string()))?;
        stored.extend_from_slice(records);
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::fingerprint;

    fn iteration(n: usize) -> Record {
        Record::Iteration {
            session_id: "s".into(),
            iteration: n,
            status: ExploreStatus::Continue,
            summary: format!("iteration {n}"),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_appends() {
        let sink = MemorySink::new();
        sink.append_batch(&[iteration(1), iteration(2)]).await.unwrap();
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.batches(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink_injected_failure_is_all_or_nothing() {
        let sink = MemorySink::new();
        sink.fail_next(1);
        assert!(sink.append_batch(&[iteration(1)]).await.is_err());
        assert!(sink.records().is_empty());
        sink.append_batch(&[iteration(2)]).await.unwrap();
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink_closed() {
        let sink = MemorySink::new();
        sink.close().await;
        assert!(matches!(
            sink.append_batch(&[iteration(1)]).await,
            Err(PersistError::Closed)
        ));
    }

    #[test]
    fn test_record_serializes_with_tag() {
        let record = Record::State {
            session_id: "s".into(),
            fingerprint: fingerprint("x"),
            locator: "/".into(),
            snapshot: "x".into(),
            parent: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record"], "state");
        assert_eq!(record.kind(), "state");
    }
}
