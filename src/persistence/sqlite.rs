//! SQLite 接收端（rusqlite）
//!
//! 一次 append_batch 对应一个事务；所有语句都是静态 SQL + 绑定参数。
//! rusqlite 是同步 API，写入放到 spawn_blocking 中执行。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::{PersistError, PersistenceSink, Record};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS states (
    session_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    locator TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    parent TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_id, fingerprint)
);
CREATE TABLE IF NOT EXISTS transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    from_fp TEXT NOT NULL,
    to_fp TEXT,
    actions TEXT NOT NULL,
    iteration INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS iterations (
    session_id TEXT NOT NULL,
    iteration INTEGER NOT NULL,
    status TEXT NOT NULL,
    summary TEXT NOT NULL,
    PRIMARY KEY (session_id, iteration)
);
CREATE INDEX IF NOT EXISTS idx_transitions_session ON transitions(session_id);
";

const INSERT_STATE: &str = "INSERT OR IGNORE INTO states (session_id, fingerprint, locator, snapshot, parent, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
const INSERT_TRANSITION: &str = "INSERT INTO transitions (session_id, from_fp, to_fp, actions, iteration) VALUES (?1, ?2, ?3, ?4, ?5)";
const UPSERT_ITERATION: &str = "INSERT OR REPLACE INTO iterations (session_id, iteration, status, summary) VALUES (?1, ?2, ?3, ?4)";

pub struct SqliteSink {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PersistError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// 统计某张表中某会话的行数（查询接口之外的诊断用途）
    pub fn count(&self, table: Table, session_id: &str) -> Result<usize, PersistError> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| PersistError::Rejected(e.to_string()))?;
        let conn = guard.as_ref().ok_or(PersistError::Closed)?;
        let n: i64 = conn.query_row(table.count_sql(), params![session_id], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// 可统计的表；表名不能作为绑定参数，因此用固定语句
#[derive(Debug, Clone, Copy)]
pub enum Table {
    States,
    Transitions,
    Iterations,
}

impl Table {
    fn count_sql(self) -> &'static str {
        match self {
            Table::States => "SELECT COUNT(*) FROM states WHERE session_id = ?1",
            Table::Transitions => "SELECT COUNT(*) FROM transitions WHERE session_id = ?1",
            Table::Iterations => "SELECT COUNT(*) FROM iterations WHERE session_id = ?1",
        }
    }
}

fn write_batch(conn: &mut Connection, records: &[Record]) -> Result<(), PersistError> {
    let tx = conn.transaction()?;
    let now = chrono::Utc::now().to_rfc3339();
    for record in records {
        match record {
            Record::State {
                session_id,
                fingerprint,
                locator,
                snapshot,
                parent,
            } => {
                tx.execute(
                    INSERT_STATE,
                    params![
                        session_id,
                        fingerprint.as_str(),
                        locator,
                        snapshot,
                        parent.as_ref().map(|p| p.as_str()),
                        now
                    ],
                )?;
            }
            Record::Transition {
                session_id,
                from,
                to,
                actions,
                iteration,
            } => {
                tx.execute(
                    INSERT_TRANSITION,
                    params![
                        session_id,
                        from.as_str(),
                        to.as_ref().map(|f| f.as_str()),
                        actions,
                        *iteration as i64
                    ],
                )?;
            }
            Record::Iteration {
                session_id,
                iteration,
                status,
                summary,
            } => {
                tx.execute(
                    UPSERT_ITERATION,
                    params![session_id, *iteration as i64, status.as_str(), summary],
                )?;
            }
        }
    }
    // 任一语句失败时 tx 被丢弃并回滚
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn append_batch(&self, records: &[Record]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }
        let conn = Arc::clone(&self.conn);
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| PersistError::Rejected(e.to_string()))?;
            let conn = guard.as_mut().ok_or(PersistError::Closed)?;
            write_batch(conn, &records)
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }

    async fn close(&self) {
        let conn = Arc::clone(&self.conn);
        let closed = tokio::task::spawn_blocking(move || {
            let taken = conn.lock().ok().and_then(|mut guard| guard.take());
            match taken {
                Some(conn) => conn.close().map_err(|(_, e)| e),
                None => Ok(()),
            }
        })
        .await;
        match closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "sqlite close failed"),
            Err(e) => tracing::warn!(error = %e, "sqlite close task failed"),
        }
    }
}
