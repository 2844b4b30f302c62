//! 内存存储（单进程；默认后端与测试用）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointStore, JobStore, StoreError};
use crate::core::Job;

struct Entry<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Entry<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 同时实现 CheckpointStore 与 JobStore；每次写入刷新 TTL
pub struct InMemoryStore {
    checkpoints: RwLock<HashMap<String, Entry<Checkpoint>>>,
    jobs: RwLock<HashMap<String, Entry<Job>>>,
    ttl: Duration,
}

impl InMemoryStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    fn expiry(&self) -> DateTime<Utc> {
        Utc::now() + self.ttl
    }

    pub async fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().await.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(24 * 3600)
    }
}

fn purge<T>(map: &mut HashMap<String, Entry<T>>) -> usize {
    let now = Utc::now();
    let before = map.len();
    map.retain(|_, e| !e.is_expired(now));
    before - map.len()
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let entry = Entry {
            value: checkpoint.clone(),
            expires_at: self.expiry(),
        };
        self.checkpoints.write().await.insert(job_id.to_string(), entry);
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let now = Utc::now();
        Ok(self
            .checkpoints
            .read()
            .await
            .get(job_id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
        self.checkpoints.write().await.remove(job_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(purge(&mut *self.checkpoints.write().await))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn upsert_job(&self, job: &Job) -> Result<(), StoreError> {
        let entry = Entry {
            value: job.clone(),
            expires_at: self.expiry(),
        };
        self.jobs.write().await.insert(job.id.clone(), entry);
        Ok(())
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        Ok(self
            .jobs
            .read()
            .await
            .get(job_id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        self.jobs.write().await.remove(job_id);
        Ok(())
    }

    async fn purge_expired_jobs(&self) -> Result<usize, StoreError> {
        Ok(purge(&mut *self.jobs.write().await))
    }
}
