// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the behavioral specs.

use arvo_broker::{handler_fn, BrokerConfig, DynHandler, EventBroker};
use arvo_core::Event;
use parking_lot::Mutex;
use std::sync::Arc;

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Handler that records everything it receives and emits nothing.
pub fn recording_handler(log: EventLog) -> DynHandler {
    handler_fn(move |event: Event, _publisher| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(event);
            Ok(Vec::new())
        }
    })
}

/// Broker whose routing errors are collected instead of logged away.
pub fn broker_with_error_log() -> (EventBroker, Arc<Mutex<Vec<String>>>) {
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let broker = EventBroker::new(BrokerConfig {
        on_error: Some(Arc::new(move |err| sink.lock().push(err.to_string()))),
        ..BrokerConfig::default()
    });
    (broker, errors)
}
