// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine memory contract

use arvo_core::Subject;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors from machine-memory operations
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The caller lost a lock race. This is a durable corruption signal:
    /// the invocation must abort, never retry blindly.
    #[error("version mismatch for '{subject}': expected stored version {expected}")]
    VersionConflict { subject: String, expected: i64 },
    #[error("state for '{0}' already exists")]
    AlreadyExists(String),
    #[error("lock acquisition for '{subject}' exhausted after {attempts} attempts")]
    LockExhausted { subject: String, attempts: u32 },
    #[error("machine memory is closed")]
    Closed,
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The writable fields of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Opaque structured document owned by the handler.
    pub data: serde_json::Value,
    pub execution_status: String,
    pub source: String,
    pub initiator: Option<String>,
    /// Set on child workflows; drives hierarchy-row root resolution.
    pub parent_subject: Option<Subject>,
}

/// A record plus the version the store holds for it.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedState {
    pub record: StateRecord,
    /// Monotonically increasing, starts at 1.
    pub version: i64,
}

/// Out-of-band metadata for a write, used for instrumentation only.
#[derive(Debug, Clone, Default)]
pub struct WriteMeta {
    pub traceparent: Option<String>,
}

/// Durable state store for workflow instances (C5).
///
/// The only correct mutation sequence is
/// `lock → read → compute → write(prev) → unlock`. A version mismatch on
/// write means the caller lost the lock race and must abort.
#[async_trait]
pub trait MachineMemory: Send + Sync {
    /// Returns the current state, or `None` before the first write.
    /// Idempotent.
    async fn read(&self, id: &Subject) -> Result<Option<VersionedState>, MemoryError>;

    /// First write (`prev = None`) inserts state and hierarchy rows in one
    /// transaction; the hierarchy root resolves through the parent's row,
    /// falling back to `id` when absent. Subsequent writes compare-and-swap
    /// on `prev.version` and store `prev.version + 1`.
    async fn write(
        &self,
        id: &Subject,
        record: StateRecord,
        prev: Option<&VersionedState>,
        meta: WriteMeta,
    ) -> Result<VersionedState, MemoryError>;

    /// Acquire the instance lock, retrying with backoff per the configured
    /// lock policy. Returns false when retries are exhausted.
    async fn lock(&self, id: &Subject) -> Result<bool, MemoryError>;

    /// Release the instance lock. Unconditional and idempotent; returns
    /// true even if no lock row existed.
    async fn unlock(&self, id: &Subject) -> Result<bool, MemoryError>;

    /// Remove state, lock, and hierarchy rows in one transaction. A no-op
    /// when cleanup is disabled (rows are retained for audit).
    async fn cleanup(&self, id: &Subject) -> Result<(), MemoryError>;

    /// Root of the instance's workflow tree, or `None` for unknown ids.
    async fn get_root_subject(&self, id: &Subject) -> Result<Option<Subject>, MemoryError>;

    /// All subjects under `root`, excluding `root` itself.
    async fn get_subjects_by_root(&self, root: &Subject) -> Result<Vec<Subject>, MemoryError>;

    /// Drain the connection pool. No operation may proceed afterward.
    async fn close(&self) -> Result<(), MemoryError>;
}

/// Shared, dynamically dispatched machine memory.
pub type DynMachineMemory = Arc<dyn MachineMemory>;
