// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S3: the optimistic-lock race has exactly one winner.

use arvo_core::Subject;
use arvo_memory::{
    InMemoryMachineMemory, LockConfig, MachineMemory, MemoryError, StateRecord, WriteMeta,
};
use serde_json::json;
use std::sync::Arc;

fn record(step: u32) -> StateRecord {
    StateRecord {
        data: json!({ "step": step }),
        execution_status: "active".to_string(),
        source: "com.spec.machine".to_string(),
        initiator: None,
        parent_subject: None,
    }
}

#[tokio::test]
async fn optimistic_lock_race() {
    let memory = Arc::new(InMemoryMachineMemory::new(LockConfig::default()));
    let subject = Subject::new("subj");
    let prev = memory
        .write(&subject, record(0), None, WriteMeta::default())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        memory.write(&subject, record(1), Some(&prev), WriteMeta::default()),
        memory.write(&subject, record(2), Some(&prev), WriteMeta::default()),
    );

    let successes = [&a, &b].iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent write may win");
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(
        loser.unwrap_err(),
        MemoryError::VersionConflict { .. }
    ));

    let stored = memory.read(&subject).await.unwrap().unwrap();
    assert_eq!(stored.version, prev.version + 1);
}

#[tokio::test]
async fn version_counts_up_from_one() {
    let memory = InMemoryMachineMemory::new(LockConfig::default());
    let subject = Subject::new("subj");
    let mut state = memory
        .write(&subject, record(0), None, WriteMeta::default())
        .await
        .unwrap();
    assert_eq!(state.version, 1);
    for step in 1..=4 {
        state = memory
            .write(&subject, record(step), Some(&state), WriteMeta::default())
            .await
            .unwrap();
        assert_eq!(state.version, i64::from(step) + 1);
    }
}
