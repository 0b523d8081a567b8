// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-queue adapter contract
//!
//! The durable broker is written against this trait; the Postgres
//! implementation is the production path and the in-memory one backs tests
//! and single-process harnesses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{0}' does not exist")]
    UnknownQueue(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid job id: {0}")]
    BadJobId(String),
    #[error("queue adapter is shut down")]
    Closed,
}

/// Error returned by a job processor; triggers the retry/DLQ path.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Admission policy for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// No admission constraint.
    #[default]
    Standard,
    /// At most one job waiting to start.
    Short,
    /// At most one job queued or active.
    Singleton,
    /// At most one job waiting to start; active jobs do not block new sends.
    Stately,
}

/// Options fixed at queue creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueOptions {
    pub policy: QueuePolicy,
    pub partition: bool,
    /// Exhausted jobs move here. No DLQ unless configured.
    pub dead_letter: Option<String>,
    /// Log a warning when the queued count exceeds this size.
    pub warning_queue_size: Option<i64>,
}

/// Per-job options applied at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    pub priority: i32,
    /// Retries after the first failure; 0 means fail immediately.
    pub retry_limit: u32,
    pub retry_delay: Duration,
    /// Exponential (powers of two on `retry_delay`) instead of fixed delay.
    pub retry_backoff: bool,
    /// An active job older than this is treated as failed.
    pub expire_in: Duration,
    /// How long completed/failed rows are retained.
    pub retention: Duration,
    /// Remove the row immediately on completion instead of retaining it.
    pub delete_after_complete: bool,
    /// At most one job with the same key may be queued or active.
    pub singleton_key: Option<String>,
    /// Delay before the job becomes eligible.
    pub start_after: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            retry_limit: 2,
            retry_delay: Duration::from_secs(1),
            retry_backoff: false,
            expire_in: Duration::from_secs(15 * 60),
            retention: Duration::from_secs(14 * 24 * 60 * 60),
            delete_after_complete: false,
            singleton_key: None,
            start_after: None,
        }
    }
}

/// Worker pool options for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Concurrent workers on this queue.
    pub team_size: usize,
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            team_size: 1,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// A fetched job handed to a processor.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: serde_json::Value,
    /// Failures so far.
    pub retry_count: u32,
    pub expire_in: Duration,
}

/// Consumes jobs from one queue.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: Job) -> Result<(), JobError>;
}

/// Running worker pool; dropping it detaches the workers, `stop` joins them.
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(stop_tx: watch::Sender<bool>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { stop_tx, tasks }
    }

    /// Signal the workers and wait for in-flight jobs to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Per-queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub active: i64,
    pub queued: i64,
}

/// The durable queue contract (spec'd behaviorally: FIFO within priority,
/// at-least-once delivery, retry with optional backoff, dead-lettering
/// after exhaustion, singleton admission).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Create or update a queue. Idempotent.
    async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<(), QueueError>;

    /// Drop a queue and all of its jobs.
    async fn delete_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Enqueue a payload. Returns the job id, or `None` when an admission
    /// policy (queue policy or singleton key) throttled the send.
    async fn send(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Option<String>, QueueError>;

    /// Start a worker pool on a queue.
    async fn work(
        &self,
        queue: &str,
        options: WorkerOptions,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<WorkerHandle, QueueError>;

    async fn get_queue_stats(&self, name: &str) -> Result<QueueCounts, QueueError>;

    /// Stop accepting work. Pending jobs stay stored (where applicable).
    async fn shutdown(&self) -> Result<(), QueueError>;
}
