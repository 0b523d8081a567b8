// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! arvo-broker: in-process event broker with bounded per-topic prefetch
//!
//! Events are routed by destination to per-topic work queues. Handlers may
//! publish more events from inside their bodies (cascades); the quiescence
//! detector accounts for work those cascades schedule.

mod broker;
mod handler;
mod pipeline;
mod resolve;
mod work_queue;

pub use broker::{
    BrokerConfig, BrokerError, DomainedListener, ErrorHook, EventBroker, IdleConfig,
    SubscribeOptions, Subscription,
};
pub use handler::{handler_fn, DynHandler, EventHandler, HandlerError, Publisher, RoutingSink};
pub use pipeline::{
    ErrorDisposition, HandlerConfig, HandlerPipeline, InputMiddleware, MiddlewareContext, OnError,
    OutputMiddleware,
};
pub use resolve::ResolveOutcome;
pub use work_queue::QueueStats;
