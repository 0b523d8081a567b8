// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-topic FIFO queue with prefetch-limited concurrent execution

use arvo_core::Event;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Snapshot of a queue's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub prefetch: usize,
    pub pending: usize,
    pub in_flight: usize,
    /// pending + in_flight
    pub size: usize,
}

pub(crate) type Runner = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct QueueState {
    pending: VecDeque<Event>,
    in_flight: usize,
}

/// Bounded work queue for one topic.
///
/// Items are consumed whether the runner succeeds or fails; redelivery is
/// the retry policy's concern, not the queue's.
pub(crate) struct WorkQueue {
    topic: String,
    prefetch: usize,
    state: Mutex<QueueState>,
    runner: Runner,
}

impl WorkQueue {
    pub(crate) fn new(topic: String, prefetch: usize, runner: Runner) -> Arc<Self> {
        Arc::new(Self {
            topic,
            prefetch: prefetch.max(1),
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: 0,
            }),
            runner,
        })
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn enqueue(self: &Arc<Self>, event: Event) {
        self.state.lock().pending.push_back(event);
        self.dispatch();
    }

    /// Hand pending items to workers while capacity remains.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let event = {
                let mut state = self.state.lock();
                if state.in_flight >= self.prefetch {
                    return;
                }
                match state.pending.pop_front() {
                    Some(event) => {
                        state.in_flight += 1;
                        event
                    }
                    None => return,
                }
            };
            let queue = Arc::clone(self);
            let task = (self.runner)(event);
            tokio::spawn(async move {
                task.await;
                queue.finish();
            });
        }
    }

    fn finish(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.dispatch();
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            prefetch: self.prefetch,
            pending: state.pending.len(),
            in_flight: state.in_flight,
            size: state.pending.len() + state.in_flight,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.pending.is_empty() && state.in_flight == 0
    }

    pub(crate) fn clear_pending(&self) {
        self.state.lock().pending.clear();
    }
}

#[cfg(test)]
#[path = "work_queue_tests.rs"]
mod tests;
