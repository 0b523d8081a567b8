// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-holder lock with absolute expiry

use crate::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of the current holder, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolderInfo {
    pub locked_at: Instant,
    pub expires_at: Instant,
}

/// Mutual exclusion with a TTL instead of a liveness side-channel.
///
/// A holder that never unlocks cannot block others past `ttl`: the next
/// `lock()` after expiry reclaims the mutex. Operations guarded by this
/// lock must therefore finish within `ttl`.
#[derive(Debug)]
pub struct TtlMutex<C: Clock = SystemClock> {
    ttl: Duration,
    clock: C,
    holder: Mutex<Option<HolderInfo>>,
}

impl TtlMutex<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> TtlMutex<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            ttl,
            clock,
            holder: Mutex::new(None),
        }
    }

    /// Acquire the lock.
    ///
    /// Succeeds iff the mutex is free, or held but past its expiry (the
    /// stale holder is reclaimed). Returns false when a live holder exists.
    pub fn lock(&self) -> bool {
        let now = self.clock.now();
        let mut holder = self.holder.lock();
        match *holder {
            Some(info) if now < info.expires_at => false,
            _ => {
                *holder = Some(HolderInfo {
                    locked_at: now,
                    expires_at: now + self.ttl,
                });
                true
            }
        }
    }

    /// Release the lock. Idempotent; releasing a free mutex is a no-op.
    pub fn unlock(&self) {
        *self.holder.lock() = None;
    }

    /// Held and not expired.
    pub fn is_locked(&self) -> bool {
        let now = self.clock.now();
        self.holder
            .lock()
            .is_some_and(|info| now < info.expires_at)
    }

    /// Current holder timestamps, including stale holders not yet reclaimed.
    pub fn holder(&self) -> Option<HolderInfo> {
        *self.holder.lock()
    }
}

#[cfg(test)]
#[path = "ttl_mutex_tests.rs"]
mod tests;
