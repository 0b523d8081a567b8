// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process job queue with the same observable behavior as the
//! Postgres adapter, minus durability

use crate::queue::{
    Job, JobOptions, JobProcessor, JobQueue, QueueCounts, QueueError, QueueOptions, QueuePolicy,
    WorkerHandle, WorkerOptions,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct StoredJob {
    id: String,
    payload: serde_json::Value,
    retry_count: u32,
    options: JobOptions,
    eligible_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct QueueEntry {
    options: QueueOptions,
    queued: Vec<StoredJob>,
    active: Vec<StoredJob>,
}

impl QueueEntry {
    fn admits(&self, options: &JobOptions) -> bool {
        let throttled = match self.options.policy {
            QueuePolicy::Standard => false,
            QueuePolicy::Short | QueuePolicy::Stately => !self.queued.is_empty(),
            QueuePolicy::Singleton => !self.queued.is_empty() || !self.active.is_empty(),
        };
        if throttled {
            return false;
        }
        if let Some(key) = &options.singleton_key {
            let clash = self
                .queued
                .iter()
                .chain(self.active.iter())
                .any(|job| job.options.singleton_key.as_ref() == Some(key));
            if clash {
                return false;
            }
        }
        true
    }
}

struct Inner {
    queues: Mutex<HashMap<String, QueueEntry>>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    /// Pop the highest-priority eligible job and mark it active.
    fn fetch(&self, queue: &str) -> Option<StoredJob> {
        let now = Instant::now();
        let mut queues = self.queues.lock();
        let entry = queues.get_mut(queue)?;
        let best = entry
            .queued
            .iter()
            .enumerate()
            .filter(|(_, job)| job.eligible_at <= now)
            .max_by(|(_, a), (_, b)| {
                a.options
                    .priority
                    .cmp(&b.options.priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(index, _)| index)?;
        let job = entry.queued.remove(best);
        entry.active.push(job.clone());
        Some(job)
    }

    fn complete(&self, queue: &str, id: &str) {
        let mut queues = self.queues.lock();
        if let Some(entry) = queues.get_mut(queue) {
            entry.active.retain(|job| job.id != id);
        }
    }

    /// Failure path: reschedule with backoff or move to the dead-letter
    /// queue when retries are exhausted.
    fn fail(&self, queue: &str, id: &str) {
        let mut queues = self.queues.lock();
        let Some(entry) = queues.get_mut(queue) else {
            return;
        };
        let Some(index) = entry.active.iter().position(|job| job.id == id) else {
            return;
        };
        let mut job = entry.active.remove(index);
        if job.retry_count < job.options.retry_limit {
            job.retry_count += 1;
            let factor = if job.options.retry_backoff {
                2u32.saturating_pow(job.retry_count - 1)
            } else {
                1
            };
            job.eligible_at = Instant::now() + job.options.retry_delay * factor;
            entry.queued.push(job);
            return;
        }

        let dead_letter = entry.options.dead_letter.clone();
        match dead_letter {
            Some(dlq) => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                let dead = StoredJob {
                    id: uuid::Uuid::new_v4().to_string(),
                    payload: job.payload,
                    retry_count: 0,
                    options: JobOptions::default(),
                    eligible_at: Instant::now(),
                    seq,
                };
                match queues.get_mut(&dlq) {
                    Some(target) => target.queued.push(dead),
                    None => {
                        tracing::warn!(queue, dlq = %dlq, "dead-letter queue missing, dropping job")
                    }
                }
            }
            None => {
                tracing::warn!(queue, job_id = %id, "job exhausted retries, no dead-letter queue")
            }
        }
    }
}

/// In-memory [`JobQueue`] adapter.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    inner: Arc<Inner>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<(), QueueError> {
        self.inner.ensure_open()?;
        let mut queues = self.inner.queues.lock();
        let entry = queues.entry(name.to_string()).or_default();
        entry.options = options;
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.inner.ensure_open()?;
        self.inner.queues.lock().remove(name);
        Ok(())
    }

    async fn send(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Option<String>, QueueError> {
        self.inner.ensure_open()?;
        let mut queues = self.inner.queues.lock();
        let entry = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        if !entry.admits(&options) {
            return Ok(None);
        }
        if let Some(warning) = entry.options.warning_queue_size {
            if entry.queued.len() as i64 >= warning {
                tracing::warn!(queue, size = entry.queued.len(), "queue above warning size");
            }
        }
        let id = uuid::Uuid::new_v4().to_string();
        let eligible_at = Instant::now() + options.start_after.unwrap_or_default();
        entry.queued.push(StoredJob {
            id: id.clone(),
            payload,
            retry_count: 0,
            options,
            eligible_at,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
        });
        Ok(Some(id))
    }

    async fn work(
        &self,
        queue: &str,
        options: WorkerOptions,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<WorkerHandle, QueueError> {
        self.inner.ensure_open()?;
        if !self.inner.queues.lock().contains_key(queue) {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(options.team_size.max(1));
        for _ in 0..options.team_size.max(1) {
            let inner = Arc::clone(&self.inner);
            let processor = Arc::clone(&processor);
            let queue = queue.to_string();
            let mut stop_rx = stop_rx.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    if *stop_rx.borrow() || inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    match inner.fetch(&queue) {
                        Some(job) => {
                            let handed = Job {
                                id: job.id.clone(),
                                queue: queue.clone(),
                                payload: job.payload.clone(),
                                retry_count: job.retry_count,
                                expire_in: job.options.expire_in,
                            };
                            let run =
                                tokio::time::timeout(job.options.expire_in, processor.process(handed));
                            match run.await {
                                Ok(Ok(())) => inner.complete(&queue, &job.id),
                                Ok(Err(err)) => {
                                    tracing::debug!(queue = %queue, job_id = %job.id, error = %err, "job failed");
                                    inner.fail(&queue, &job.id);
                                }
                                Err(_elapsed) => {
                                    tracing::warn!(queue = %queue, job_id = %job.id, "job expired");
                                    inner.fail(&queue, &job.id);
                                }
                            }
                        }
                        None => {
                            tokio::select! {
                                _ = tokio::time::sleep(options.poll_interval) => {}
                                _ = stop_rx.changed() => break,
                            }
                        }
                    }
                }
            }));
        }
        Ok(WorkerHandle::new(stop_tx, tasks))
    }

    async fn get_queue_stats(&self, name: &str) -> Result<QueueCounts, QueueError> {
        self.inner.ensure_open()?;
        let queues = self.inner.queues.lock();
        let entry = queues
            .get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))?;
        Ok(QueueCounts {
            active: entry.active.len() as i64,
            queued: entry.queued.len() as i64,
        })
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[path = "in_memory_queue_tests.rs"]
mod tests;
