// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PostgreSQL job queue
//!
//! Jobs live in a single `arvo_job` table; workers claim them with
//! `FOR UPDATE SKIP LOCKED`, so any number of processes can share a queue.
//! Failures reschedule with optional exponential backoff until
//! `retry_limit`, then dead-letter when the queue has one configured.

use crate::queue::{
    Job, JobOptions, JobProcessor, JobQueue, QueueCounts, QueueError, QueueOptions, QueuePolicy,
    WorkerHandle, WorkerOptions,
};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS arvo_queue (
        name TEXT PRIMARY KEY,
        policy TEXT NOT NULL DEFAULT 'standard',
        partition_queue BOOLEAN NOT NULL DEFAULT false,
        dead_letter TEXT,
        warning_queue_size BIGINT,
        created_on TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS arvo_job (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        data JSONB NOT NULL,
        state TEXT NOT NULL DEFAULT 'created',
        retry_limit INTEGER NOT NULL DEFAULT 0,
        retry_count INTEGER NOT NULL DEFAULT 0,
        retry_delay_ms BIGINT NOT NULL DEFAULT 0,
        retry_backoff BOOLEAN NOT NULL DEFAULT false,
        start_after TIMESTAMPTZ NOT NULL DEFAULT now(),
        started_on TIMESTAMPTZ,
        singleton_key TEXT,
        expire_in_ms BIGINT NOT NULL,
        delete_after_complete BOOLEAN NOT NULL DEFAULT false,
        created_on TIMESTAMPTZ NOT NULL DEFAULT now(),
        completed_on TIMESTAMPTZ,
        keep_until TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS arvo_job_fetch_idx
        ON arvo_job (name, state, start_after, priority)
    "#,
];

fn policy_name(policy: QueuePolicy) -> &'static str {
    match policy {
        QueuePolicy::Standard => "standard",
        QueuePolicy::Short => "short",
        QueuePolicy::Singleton => "singleton",
        QueuePolicy::Stately => "stately",
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    policy: String,
    dead_letter: Option<String>,
    warning_queue_size: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct FetchedJob {
    id: Uuid,
    data: serde_json::Value,
    retry_count: i32,
    expire_in_ms: i64,
}

#[derive(sqlx::FromRow)]
struct SettledJob {
    state: String,
    data: serde_json::Value,
}

/// Postgres-backed [`JobQueue`] over a shared `sqlx` pool.
pub struct PgJobQueue {
    pool: PgPool,
    closed: AtomicBool,
}

impl PgJobQueue {
    /// Wrap an existing pool and create the queue tables.
    pub async fn with_pool(pool: PgPool) -> Result<Self, QueueError> {
        for ddl in CREATE_TABLES {
            sqlx::query(ddl).execute(&pool).await?;
        }
        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Connect a dedicated pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::with_pool(pool).await
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    async fn queue_row(&self, name: &str) -> Result<QueueRow, QueueError> {
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT policy, dead_letter, warning_queue_size FROM arvo_queue WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    /// Claim the next eligible job, highest priority first, FIFO within a
    /// priority.
    async fn fetch(&self, queue: &str) -> Result<Option<Job>, QueueError> {
        let row: Option<FetchedJob> = sqlx::query_as(
            r#"
            WITH next AS (
                SELECT id FROM arvo_job
                WHERE name = $1 AND state IN ('created', 'retry') AND start_after <= now()
                ORDER BY priority DESC, created_on, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE arvo_job j
            SET state = 'active', started_on = now()
            FROM next
            WHERE j.id = next.id
            RETURNING j.id, j.data, j.retry_count, j.expire_in_ms
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Job {
            id: row.id.to_string(),
            queue: queue.to_string(),
            payload: row.data,
            retry_count: row.retry_count.max(0) as u32,
            expire_in: Duration::from_millis(row.expire_in_ms.max(0) as u64),
        }))
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        let id = parse_job_id(job_id)?;
        sqlx::query(
            r#"
            UPDATE arvo_job SET state = 'completed', completed_on = now()
            WHERE id = $1 AND state = 'active'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        sqlx::query("DELETE FROM arvo_job WHERE id = $1 AND delete_after_complete")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reschedule a failed job or settle it as failed, dead-lettering the
    /// payload when the queue has a DLQ.
    async fn fail(&self, queue: &str, job_id: &str) -> Result<(), QueueError> {
        let id = parse_job_id(job_id)?;
        let settled: Option<SettledJob> = sqlx::query_as(
            r#"
            UPDATE arvo_job
            SET retry_count = retry_count + 1,
                state = CASE WHEN retry_count < retry_limit THEN 'retry' ELSE 'failed' END,
                start_after = CASE WHEN retry_count < retry_limit
                    THEN now() + (retry_delay_ms
                        * (CASE WHEN retry_backoff THEN power(2, retry_count) ELSE 1 END)
                        * interval '1 millisecond')
                    ELSE start_after END,
                completed_on = CASE WHEN retry_count < retry_limit THEN NULL ELSE now() END
            WHERE id = $1 AND state = 'active'
            RETURNING state, data
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(SettledJob { state, data }) = settled {
            if state == "failed" {
                self.dead_letter(queue, data).await?;
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, data: serde_json::Value) -> Result<(), QueueError> {
        let row = self.queue_row(queue).await?;
        match row.dead_letter {
            Some(dlq) => {
                if self.send(&dlq, data, JobOptions::default()).await?.is_none() {
                    tracing::warn!(queue, dlq = %dlq, "dead-letter send throttled, dropping job");
                }
            }
            None => {
                tracing::warn!(queue, "job exhausted retries, no dead-letter queue configured")
            }
        }
        Ok(())
    }

    /// Expire overdue active jobs (failure path) and purge rows past their
    /// retention.
    async fn maintain(&self, queue: &str) -> Result<(), QueueError> {
        let expired: Vec<SettledJob> = sqlx::query_as(
            r#"
            UPDATE arvo_job
            SET retry_count = retry_count + 1,
                state = CASE WHEN retry_count < retry_limit THEN 'retry' ELSE 'failed' END,
                start_after = CASE WHEN retry_count < retry_limit
                    THEN now() + (retry_delay_ms
                        * (CASE WHEN retry_backoff THEN power(2, retry_count) ELSE 1 END)
                        * interval '1 millisecond')
                    ELSE start_after END,
                completed_on = CASE WHEN retry_count < retry_limit THEN NULL ELSE now() END
            WHERE name = $1 AND state = 'active'
              AND started_on + (expire_in_ms * interval '1 millisecond') < now()
            RETURNING state, data
            "#,
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;
        for job in expired {
            tracing::warn!(queue, "active job expired");
            if job.state == "failed" {
                self.dead_letter(queue, job.data).await?;
            }
        }

        sqlx::query(
            r#"
            DELETE FROM arvo_job
            WHERE name = $1 AND state IN ('completed', 'failed') AND keep_until < now()
            "#,
        )
        .bind(queue)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_job_id(job_id: &str) -> Result<Uuid, QueueError> {
    Uuid::parse_str(job_id).map_err(|e| QueueError::BadJobId(e.to_string()))
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<(), QueueError> {
        self.ensure_open()?;
        sqlx::query(
            r#"
            INSERT INTO arvo_queue (name, policy, partition_queue, dead_letter, warning_queue_size)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET policy = EXCLUDED.policy,
                partition_queue = EXCLUDED.partition_queue,
                dead_letter = EXCLUDED.dead_letter,
                warning_queue_size = EXCLUDED.warning_queue_size
            "#,
        )
        .bind(name)
        .bind(policy_name(options.policy))
        .bind(options.partition)
        .bind(options.dead_letter.as_deref())
        .bind(options.warning_queue_size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM arvo_job WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM arvo_queue WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn send(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Option<String>, QueueError> {
        self.ensure_open()?;
        let row = self.queue_row(queue).await?;

        // Admission clause depends on the queue policy; singleton keys apply
        // on top of any policy.
        let mut guards: Vec<&str> = Vec::new();
        match row.policy.as_str() {
            "short" | "stately" => guards.push(
                "NOT EXISTS (SELECT 1 FROM arvo_job g WHERE g.name = $2 AND g.state = 'created')",
            ),
            "singleton" => guards.push(
                "NOT EXISTS (SELECT 1 FROM arvo_job g WHERE g.name = $2 \
                 AND g.state IN ('created', 'retry', 'active'))",
            ),
            _ => {}
        }
        guards.push(
            "($11::text IS NULL OR NOT EXISTS (SELECT 1 FROM arvo_job g WHERE g.name = $2 \
             AND g.singleton_key = $11 AND g.state IN ('created', 'retry', 'active')))",
        );
        let sql = format!(
            r#"
            INSERT INTO arvo_job
                (id, name, priority, data, retry_limit, retry_delay_ms, retry_backoff,
                 start_after, expire_in_ms, delete_after_complete, singleton_key, keep_until)
            SELECT $1, $2, $3, $4, $5, $6, $7,
                   now() + ($8 * interval '1 millisecond'), $9, $10, $11,
                   now() + ($12 * interval '1 millisecond')
            WHERE {}
            "#,
            guards.join(" AND ")
        );

        let id = Uuid::new_v4();
        let inserted = sqlx::query(&sql)
            .bind(id)
            .bind(queue)
            .bind(options.priority)
            .bind(&payload)
            .bind(options.retry_limit as i32)
            .bind(options.retry_delay.as_millis() as i64)
            .bind(options.retry_backoff)
            .bind(options.start_after.unwrap_or_default().as_millis() as i64)
            .bind(options.expire_in.as_millis() as i64)
            .bind(options.delete_after_complete)
            .bind(options.singleton_key.as_deref())
            .bind(options.retention.as_millis() as i64)
            .execute(&self.pool)
            .await?;
        if inserted.rows_affected() == 0 {
            return Ok(None);
        }

        if let Some(warning) = row.warning_queue_size {
            let counts = self.get_queue_stats(queue).await?;
            if counts.queued >= warning {
                tracing::warn!(queue, queued = counts.queued, "queue above warning size");
            }
        }
        Ok(Some(id.to_string()))
    }

    async fn work(
        &self,
        queue: &str,
        options: WorkerOptions,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<WorkerHandle, QueueError> {
        self.ensure_open()?;
        self.queue_row(queue).await?;

        let this = Arc::new(PgJobQueue {
            pool: self.pool.clone(),
            closed: AtomicBool::new(false),
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(options.team_size.max(1));
        for worker in 0..options.team_size.max(1) {
            let this = Arc::clone(&this);
            let processor = Arc::clone(&processor);
            let queue = queue.to_string();
            let mut stop_rx = stop_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut iterations: u32 = 0;
                loop {
                    if *stop_rx.borrow() {
                        break;
                    }
                    if worker == 0 && iterations % 20 == 0 {
                        if let Err(err) = this.maintain(&queue).await {
                            tracing::warn!(queue = %queue, error = %err, "queue maintenance failed");
                        }
                    }
                    iterations = iterations.wrapping_add(1);

                    match this.fetch(&queue).await {
                        Ok(Some(job)) => {
                            let expire_in = job.expire_in;
                            let job_id = job.id.clone();
                            let run = tokio::time::timeout(expire_in, processor.process(job));
                            let outcome = match run.await {
                                Ok(Ok(())) => this.complete(&job_id).await,
                                Ok(Err(err)) => {
                                    tracing::debug!(queue = %queue, job_id = %job_id, error = %err, "job failed");
                                    this.fail(&queue, &job_id).await
                                }
                                Err(_elapsed) => {
                                    tracing::warn!(queue = %queue, job_id = %job_id, "job expired in worker");
                                    this.fail(&queue, &job_id).await
                                }
                            };
                            if let Err(err) = outcome {
                                tracing::warn!(queue = %queue, job_id = %job_id, error = %err, "job settlement failed");
                            }
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = tokio::time::sleep(options.poll_interval) => {}
                                _ = stop_rx.changed() => break,
                            }
                        }
                        Err(err) => {
                            tracing::warn!(queue = %queue, error = %err, "job fetch failed");
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
        self.ensure_open()?;
        self.queue_row(name).await?;
        let (active, queued): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'active'),
                COUNT(*) FILTER (WHERE state IN ('created', 'retry'))
            FROM arvo_job WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueCounts { active, queued })
    }

    async fn shutdown(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
