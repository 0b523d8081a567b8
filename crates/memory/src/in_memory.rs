// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process machine memory, for tests and single-process harnesses

use crate::config::LockConfig;
use crate::machine::{
    MachineMemory, MemoryError, StateRecord, VersionedState, WriteMeta,
};
use arvo_core::{Clock, RetryPolicy, Subject, SystemClock, TtlMutex};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct HierarchyRow {
    #[allow(dead_code)]
    parent_subject: Option<Subject>,
    root_subject: Subject,
}

struct Tables {
    state: HashMap<Subject, VersionedState>,
    hierarchy: HashMap<Subject, HierarchyRow>,
}

/// Same observable contract as the Postgres store, minus durability.
///
/// Each subject gets its own [`TtlMutex`]; the lock table invariant (at
/// most one live holder per subject) falls out of the mutex semantics.
pub struct InMemoryMachineMemory<C: Clock = SystemClock> {
    lock_config: LockConfig,
    enable_cleanup: bool,
    clock: C,
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<Subject, Arc<TtlMutex<C>>>>,
    closed: AtomicBool,
}

impl InMemoryMachineMemory<SystemClock> {
    pub fn new(lock_config: LockConfig) -> Self {
        Self::with_clock(lock_config, true, SystemClock)
    }
}

impl Default for InMemoryMachineMemory<SystemClock> {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl<C: Clock> InMemoryMachineMemory<C> {
    pub fn with_clock(lock_config: LockConfig, enable_cleanup: bool, clock: C) -> Self {
        Self {
            lock_config,
            enable_cleanup,
            clock,
            tables: Mutex::new(Tables {
                state: HashMap::new(),
                hierarchy: HashMap::new(),
            }),
            locks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MemoryError::Closed)
        } else {
            Ok(())
        }
    }

    fn mutex_for(&self, id: &Subject) -> Arc<TtlMutex<C>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(id.clone()).or_insert_with(|| {
            Arc::new(TtlMutex::with_clock(
                Duration::from_millis(self.lock_config.ttl_ms),
                self.clock.clone(),
            ))
        }))
    }
}

#[async_trait]
impl<C: Clock> MachineMemory for InMemoryMachineMemory<C> {
    async fn read(&self, id: &Subject) -> Result<Option<VersionedState>, MemoryError> {
        self.ensure_open()?;
        Ok(self.tables.lock().state.get(id).cloned())
    }

    async fn write(
        &self,
        id: &Subject,
        record: StateRecord,
        prev: Option<&VersionedState>,
        _meta: WriteMeta,
    ) -> Result<VersionedState, MemoryError> {
        self.ensure_open()?;
        let mut tables = self.tables.lock();
        match prev {
            None => {
                if tables.state.contains_key(id) {
                    return Err(MemoryError::AlreadyExists(id.to_string()));
                }
                let root_subject = match &record.parent_subject {
                    None => id.clone(),
                    Some(parent) => tables
                        .hierarchy
                        .get(parent)
                        .map(|row| row.root_subject.clone())
                        .unwrap_or_else(|| id.clone()),
                };
                tables.hierarchy.insert(
                    id.clone(),
                    HierarchyRow {
                        parent_subject: record.parent_subject.clone(),
                        root_subject,
                    },
                );
                let state = VersionedState { record, version: 1 };
                tables.state.insert(id.clone(), state.clone());
                Ok(state)
            }
            Some(prev) => {
                let stored = tables.state.get_mut(id).ok_or_else(|| {
                    MemoryError::VersionConflict {
                        subject: id.to_string(),
                        expected: prev.version,
                    }
                })?;
                if stored.version != prev.version {
                    return Err(MemoryError::VersionConflict {
                        subject: id.to_string(),
                        expected: prev.version,
                    });
                }
                stored.record = record;
                stored.version = prev.version + 1;
                Ok(stored.clone())
            }
        }
    }

    async fn lock(&self, id: &Subject) -> Result<bool, MemoryError> {
        self.ensure_open()?;
        let mutex = self.mutex_for(id);
        let policy = RetryPolicy::new(
            self.lock_config.max_retries,
            self.lock_config.initial_delay_ms,
            self.lock_config.backoff_exponent,
        );
        let mut attempt: u32 = 0;
        loop {
            if mutex.lock() {
                return Ok(true);
            }
            if !policy.should_retry(attempt) {
                return Ok(false);
            }
            tokio::time::sleep(policy.delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn unlock(&self, id: &Subject) -> Result<bool, MemoryError> {
        self.ensure_open()?;
        if let Some(mutex) = self.locks.lock().get(id) {
            mutex.unlock();
        }
        Ok(true)
    }

    async fn cleanup(&self, id: &Subject) -> Result<(), MemoryError> {
        self.ensure_open()?;
        if !self.enable_cleanup {
            return Ok(());
        }
        let mut tables = self.tables.lock();
        tables.state.remove(id);
        tables.hierarchy.remove(id);
        self.locks.lock().remove(id);
        Ok(())
    }

    async fn get_root_subject(&self, id: &Subject) -> Result<Option<Subject>, MemoryError> {
        self.ensure_open()?;
        Ok(self
            .tables
            .lock()
            .hierarchy
            .get(id)
            .map(|row| row.root_subject.clone()))
    }

    async fn get_subjects_by_root(&self, root: &Subject) -> Result<Vec<Subject>, MemoryError> {
        self.ensure_open()?;
        let tables = self.tables.lock();
        let mut subjects: Vec<Subject> = tables
            .hierarchy
            .iter()
            .filter(|(subject, row)| row.root_subject == *root && *subject != root)
            .map(|(subject, _)| subject.clone())
            .collect();
        subjects.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(subjects)
    }

    async fn close(&self) -> Result<(), MemoryError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[path = "in_memory_tests.rs"]
mod tests;
