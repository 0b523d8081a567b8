// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! arvo-durable: persistent event broker on a relational job queue
//!
//! Each registered handler owns a named queue; events are serialized into
//! jobs, workers deserialize and run the shared handler pipeline, and
//! emitted events are routed back through queues, the domained-event
//! listener, or the completion sink.

mod broker;
mod in_memory_queue;
mod pg_queue;
mod queue;

pub use broker::{
    CompletionRegistration, DurableBrokerConfig, DurableBrokerError, DurableEventBroker,
    HandlerNotFoundListener, HandlerRegistration,
};
pub use in_memory_queue::InMemoryJobQueue;
pub use pg_queue::PgJobQueue;
pub use queue::{
    Job, JobError, JobOptions, JobProcessor, JobQueue, QueueCounts, QueueError, QueueOptions,
    QueuePolicy, WorkerHandle, WorkerOptions,
};
