//! 检查点存储适配层
//!
//! 每个 Job 至多一个检查点：save 为幂等 upsert，后写覆盖先写，最新者为准。
//! Job 记录与检查点都带 TTL，作为被放弃 Job 的兜底清理。
//! 后端：InMemoryStore（默认 / 测试）与 SqliteStore（rusqlite，跨进程持久）。

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Job;
use crate::memory::History;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// toolCallLog 中的一条记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallLogEntry {
    pub tool_name: String,
    pub parameters: serde_json::Value,
    pub result_summary: String,
    pub duration_ms: u64,
}

/// 编排进度快照
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub job_id: String,
    /// 快照时的对话长度
    pub turn_index: usize,
    pub conversation_history: History,
    pub tool_call_log: Vec<ToolCallLogEntry>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn capture(job_id: &str, history: &History, tool_call_log: &[ToolCallLogEntry]) -> Self {
        Self {
            job_id: job_id.to_string(),
            turn_index: history.len(),
            conversation_history: history.clone(),
            tool_call_log: tool_call_log.to_vec(),
            saved_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store operation exceeded {0}ms sub-budget")]
    TimedOut(u64),
}

/// 检查点存储：按 jobId 寻址，单写者，无需加锁协调
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// 不存在或已过期时返回 None
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn delete(&self, job_id: &str) -> Result<(), StoreError>;

    /// 清理过期检查点，返回清理条数
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// Job 记录存储（upsert / find / delete-by-id）
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn find_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError>;

    async fn purge_expired_jobs(&self) -> Result<usize, StoreError>;
}
