//! SQLite 存储（rusqlite）
//!
//! 连接是同步的，所有操作放入 `spawn_blocking`，避免阻塞 async 运行时。
//! 检查点与 Job 各一张表，主键为 job_id；expires_at 为 Unix 秒，读时过滤、purge 时删除。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Checkpoint, CheckpointStore, JobStore, StoreError};
use crate::core::Job;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    ttl_secs: i64,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>, ttl_secs: u64) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, ttl_secs)
    }

    pub fn open_in_memory(ttl_secs: u64) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, ttl_secs)
    }

    fn with_connection(conn: Connection, ttl_secs: u64) -> Result<Self, StoreError> {
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl_secs: ttl_secs as i64,
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {e}")))?
    }

    fn expires_at(&self) -> i64 {
        Utc::now().timestamp() + self.ttl_secs
    }
}

fn init_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS checkpoints (
            job_id TEXT PRIMARY KEY,
            turn_index INTEGER NOT NULL,
            payload TEXT NOT NULL,
            saved_at TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_checkpoints_expires ON checkpoints(expires_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_expires ON jobs(expires_at);",
    )?;
    Ok(())
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let payload = serde_json::to_string(checkpoint)?;
        let job_id = job_id.to_string();
        let turn_index = checkpoint.turn_index as i64;
        let saved_at = checkpoint.saved_at.to_rfc3339();
        let expires_at = self.expires_at();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO checkpoints (job_id, turn_index, payload, saved_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id) DO UPDATE SET
                    turn_index = excluded.turn_index,
                    payload = excluded.payload,
                    saved_at = excluded.saved_at,
                    expires_at = excluded.expires_at",
                params![job_id, turn_index, payload, saved_at, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let job_id = job_id.to_string();
        let now = Utc::now().timestamp();
        let payload: Option<String> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT payload FROM checkpoints WHERE job_id = ?1 AND expires_at > ?2",
                        params![job_id, now],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }

    async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
        let job_id = job_id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM checkpoints WHERE job_id = ?1", params![job_id])?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp();
        self.run(move |conn| {
            Ok(conn.execute("DELETE FROM checkpoints WHERE expires_at <= ?1", params![now])?)
        })
        .await
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn upsert_job(&self, job: &Job) -> Result<(), StoreError> {
        let payload = serde_json::to_string(job)?;
        let job_id = job.id.clone();
        let status = job.status.to_string();
        let updated_at = job.updated_at.to_rfc3339();
        let expires_at = self.expires_at();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, status, payload, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id) DO UPDATE SET
                    status = excluded.status,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at",
                params![job_id, status, payload, updated_at, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let job_id = job_id.to_string();
        let now = Utc::now().timestamp();
        let payload: Option<String> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT payload FROM jobs WHERE job_id = ?1 AND expires_at > ?2",
                        params![job_id, now],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        let job_id = job_id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])?;
            Ok(())
        })
        .await
    }

    async fn purge_expired_jobs(&self) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp();
        self.run(move |conn| {
            Ok(conn.execute("DELETE FROM jobs WHERE expires_at <= ?1", params![now])?)
        })
        .await
    }
}
