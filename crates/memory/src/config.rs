// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine-memory configuration

use serde::{Deserialize, Serialize};

/// How to reach the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionConfig {
    /// A full connection string, e.g. `postgres://user:pw@host:5432/db`.
    Url(String),
    Params {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::Url("postgres://localhost:5432/arvo".to_string())
    }
}

/// Lock acquisition policy: absolute TTL plus bounded retry with
/// exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_exponent: f64,
    pub ttl_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_exponent: 2.0,
            ttl_ms: 30_000,
        }
    }
}

/// What to do about missing tables at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MigrationMode {
    /// Verify only; refuse to start when tables are absent.
    #[serde(rename = "noop")]
    Noop,
    /// Create the tables when they do not exist, then verify.
    #[default]
    #[serde(rename = "if_tables_dont_exist")]
    IfTablesDontExist,
    /// Drop and recreate the tables. Destroys existing state.
    #[serde(rename = "dangerousely_force_migration")]
    DangerouslyForceMigration,
}

/// Full configuration for [`crate::PostgresMachineMemory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub connection: ConnectionConfig,
    pub max_connections: u32,
    pub idle_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub statement_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub lock: LockConfig,
    pub enable_cleanup: bool,
    pub enable_otel: bool,
    pub migrate: MigrationMode,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_connections: 10,
            idle_timeout_ms: 30_000,
            connection_timeout_ms: 5_000,
            statement_timeout_ms: 10_000,
            query_timeout_ms: 10_000,
            lock: LockConfig::default(),
            enable_cleanup: true,
            enable_otel: false,
            migrate: MigrationMode::default(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
