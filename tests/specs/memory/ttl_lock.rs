// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S4: TTL lock reclamation.

use arvo_core::Subject;
use arvo_core::{FakeClock, TtlMutex};
use arvo_memory::{InMemoryMachineMemory, LockConfig, MachineMemory};
use std::time::Duration;

#[test]
fn ttl_mutex_reclaims_after_expiry() {
    let clock = FakeClock::new();
    let mutex = TtlMutex::with_clock(Duration::from_millis(100), clock.clone());

    assert!(mutex.lock());

    // A concurrent acquirer anywhere inside the TTL window sees false.
    clock.advance(Duration::from_millis(50));
    assert!(!mutex.lock(), "held and unexpired at 50ms");
    clock.advance(Duration::from_millis(49));
    assert!(!mutex.lock(), "held and unexpired at 99ms");

    // Past the TTL the lock is stale and reclaimable.
    clock.advance(Duration::from_millis(51));
    assert!(mutex.lock(), "second acquisition succeeds after expiry");
}

#[tokio::test]
async fn machine_memory_lock_respects_ttl() {
    let clock = FakeClock::new();
    let memory = InMemoryMachineMemory::with_clock(
        LockConfig {
            max_retries: 0,
            initial_delay_ms: 1,
            backoff_exponent: 1.0,
            ttl_ms: 100,
        },
        true,
        clock.clone(),
    );
    let subject = Subject::new("subj");

    assert!(memory.lock(&subject).await.unwrap());
    clock.advance(Duration::from_millis(50));
    assert!(!memory.lock(&subject).await.unwrap(), "mid-TTL acquirer fails");
    clock.advance(Duration::from_millis(100));
    assert!(memory.lock(&subject).await.unwrap(), "post-TTL acquirer succeeds");
}

#[tokio::test]
async fn unlock_any_number_of_times_is_safe() {
    let memory = InMemoryMachineMemory::new(LockConfig::default());
    let subject = Subject::new("subj");
    for _ in 0..3 {
        assert!(memory.unlock(&subject).await.unwrap());
    }
    assert!(memory.lock(&subject).await.unwrap());
    for _ in 0..3 {
        assert!(memory.unlock(&subject).await.unwrap());
    }
    assert!(memory.lock(&subject).await.unwrap());
}
