// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PostgreSQL-backed machine memory

use crate::config::{ConnectionConfig, LockConfig, MemoryConfig, MigrationMode};
use crate::machine::{
    MachineMemory, MemoryError, StateRecord, VersionedState, WriteMeta,
};
use crate::schema;
use arvo_core::{RetryPolicy, Subject};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

#[derive(sqlx::FromRow)]
struct StateRow {
    data: serde_json::Value,
    version: i32,
    execution_status: String,
    parent_subject: Option<String>,
    initiator: Option<String>,
    source: String,
}

impl From<StateRow> for VersionedState {
    fn from(row: StateRow) -> Self {
        VersionedState {
            record: StateRecord {
                data: row.data,
                execution_status: row.execution_status,
                source: row.source,
                initiator: row.initiator,
                parent_subject: row.parent_subject.map(Subject::new),
            },
            version: row.version as i64,
        }
    }
}

/// Durable machine memory over a shared `sqlx` pool (C5).
pub struct PostgresMachineMemory {
    pool: PgPool,
    lock_config: LockConfig,
    enable_cleanup: bool,
}

impl PostgresMachineMemory {
    /// Connect, run the configured migration mode, and verify the schema.
    ///
    /// A schema mismatch fails the connect call; it is never downgraded to
    /// a warning.
    pub async fn connect(config: MemoryConfig) -> Result<Self, MemoryError> {
        let options = match &config.connection {
            ConnectionConfig::Url(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| MemoryError::Config(format!("invalid connection string: {e}")))?,
            ConnectionConfig::Params {
                host,
                port,
                user,
                password,
                database,
            } => PgConnectOptions::new()
                .host(host)
                .port(*port)
                .username(user)
                .password(password)
                .database(database),
        };
        // Both budget knobs are enforced server-side; the tighter one wins.
        let timeout_ms = config.statement_timeout_ms.min(config.query_timeout_ms);
        let options = options.options([("statement_timeout", timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .acquire_timeout(Duration::from_millis(config.connection_timeout_ms))
            .connect_with(options)
            .await?;

        match config.migrate {
            MigrationMode::Noop => {}
            MigrationMode::IfTablesDontExist => schema::create_tables(&pool).await?,
            MigrationMode::DangerouslyForceMigration => {
                tracing::warn!("force migration: dropping machine memory tables");
                schema::drop_tables(&pool).await?;
                schema::create_tables(&pool).await?;
            }
        }
        schema::verify(&pool).await?;

        Ok(Self {
            pool,
            lock_config: config.lock,
            enable_cleanup: config.enable_cleanup,
        })
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.pool.is_closed() {
            Err(MemoryError::Closed)
        } else {
            Ok(())
        }
    }

    async fn try_lock_once(&self, id: &Subject) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO machine_lock (subject, locked_at, expires_at)
            VALUES ($1, now(), now() + ($2 * interval '1 millisecond'))
            ON CONFLICT (subject) DO UPDATE
            SET locked_at = EXCLUDED.locked_at, expires_at = EXCLUDED.expires_at
            WHERE machine_lock.expires_at < now()
            "#,
        )
        .bind(id.as_str())
        .bind(self.lock_config.ttl_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl MachineMemory for PostgresMachineMemory {
    async fn read(&self, id: &Subject) -> Result<Option<VersionedState>, MemoryError> {
        self.ensure_open()?;
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            SELECT data, version, execution_status, parent_subject, initiator, source
            FROM machine_state
            WHERE subject = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(VersionedState::from))
    }

    async fn write(
        &self,
        id: &Subject,
        record: StateRecord,
        prev: Option<&VersionedState>,
        meta: WriteMeta,
    ) -> Result<VersionedState, MemoryError> {
        self.ensure_open()?;
        tracing::debug!(
            subject = %id,
            prev_version = prev.map(|p| p.version),
            traceparent = meta.traceparent.as_deref(),
            "machine memory write"
        );

        match prev {
            None => {
                let mut tx = self.pool.begin().await?;
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO machine_state
                        (subject, data, version, execution_status, parent_subject, initiator, source)
                    VALUES ($1, $2, 1, $3, $4, $5, $6)
                    ON CONFLICT (subject) DO NOTHING
                    "#,
                )
                .bind(id.as_str())
                .bind(&record.data)
                .bind(&record.execution_status)
                .bind(record.parent_subject.as_ref().map(|s| s.as_str()))
                .bind(record.initiator.as_deref())
                .bind(&record.source)
                .execute(&mut *tx)
                .await?;
                if inserted.rows_affected() == 0 {
                    return Err(MemoryError::AlreadyExists(id.to_string()));
                }

                let root_subject = match &record.parent_subject {
                    None => id.to_string(),
                    Some(parent) => {
                        let parent_root: Option<String> = sqlx::query_scalar(
                            "SELECT root_subject FROM machine_hierarchy WHERE subject = $1",
                        )
                        .bind(parent.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;
                        parent_root.unwrap_or_else(|| id.to_string())
                    }
                };
                sqlx::query(
                    r#"
                    INSERT INTO machine_hierarchy (subject, parent_subject, root_subject)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(id.as_str())
                .bind(record.parent_subject.as_ref().map(|s| s.as_str()))
                .bind(&root_subject)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                Ok(VersionedState { record, version: 1 })
            }
            Some(prev) => {
                let updated = sqlx::query(
                    r#"
                    UPDATE machine_state
                    SET data = $2,
                        execution_status = $3,
                        parent_subject = $4,
                        initiator = $5,
                        source = $6,
                        version = version + 1,
                        updated_at = now()
                    WHERE subject = $1 AND version = $7
                    "#,
                )
                .bind(id.as_str())
                .bind(&record.data)
                .bind(&record.execution_status)
                .bind(record.parent_subject.as_ref().map(|s| s.as_str()))
                .bind(record.initiator.as_deref())
                .bind(&record.source)
                .bind(prev.version as i32)
                .execute(&self.pool)
                .await?;
                if updated.rows_affected() == 0 {
                    return Err(MemoryError::VersionConflict {
                        subject: id.to_string(),
                        expected: prev.version,
                    });
                }
                Ok(VersionedState {
                    record,
                    version: prev.version + 1,
                })
            }
        }
    }

    async fn lock(&self, id: &Subject) -> Result<bool, MemoryError> {
        self.ensure_open()?;
        let policy = RetryPolicy::new(
            self.lock_config.max_retries,
            self.lock_config.initial_delay_ms,
            self.lock_config.backoff_exponent,
        );
        let mut attempt: u32 = 0;
        loop {
            if self.try_lock_once(id).await? {
                return Ok(true);
            }
            if !policy.should_retry(attempt) {
                tracing::debug!(subject = %id, attempts = attempt + 1, "lock acquisition exhausted");
                return Ok(false);
            }
            tokio::time::sleep(policy.delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn unlock(&self, id: &Subject) -> Result<bool, MemoryError> {
        self.ensure_open()?;
        sqlx::query("DELETE FROM machine_lock WHERE subject = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn cleanup(&self, id: &Subject) -> Result<(), MemoryError> {
        self.ensure_open()?;
        if !self.enable_cleanup {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM machine_state WHERE subject = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM machine_lock WHERE subject = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM machine_hierarchy WHERE subject = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_root_subject(&self, id: &Subject) -> Result<Option<Subject>, MemoryError> {
        self.ensure_open()?;
        let root: Option<String> =
            sqlx::query_scalar("SELECT root_subject FROM machine_hierarchy WHERE subject = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(root.map(Subject::new))
    }

    async fn get_subjects_by_root(&self, root: &Subject) -> Result<Vec<Subject>, MemoryError> {
        self.ensure_open()?;
        let subjects: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT subject FROM machine_hierarchy
            WHERE root_subject = $1 AND subject <> $1
            ORDER BY subject
            "#,
        )
        .bind(root.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(subjects.into_iter().map(Subject::new).collect())
    }

    async fn close(&self) -> Result<(), MemoryError> {
        self.pool.close().await;
        Ok(())
    }
}
