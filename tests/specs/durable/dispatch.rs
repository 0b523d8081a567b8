// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S8: durable broker dispatch validation.

use crate::prelude::*;
use arvo_broker::{handler_fn, HandlerError};
use arvo_core::Event;
use arvo_durable::{
    DurableBrokerConfig, DurableBrokerError, DurableEventBroker, HandlerRegistration,
    InMemoryJobQueue, WorkerOptions,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const CALLER: &str = "com.spec.caller";
const SERVICE: &str = "com.spec.echo";

fn broker() -> DurableEventBroker<InMemoryJobQueue> {
    DurableEventBroker::new(
        Arc::new(InMemoryJobQueue::new()),
        DurableBrokerConfig::default(),
    )
}

fn fast(registration: HandlerRegistration) -> HandlerRegistration {
    HandlerRegistration {
        worker_options: WorkerOptions {
            team_size: 1,
            poll_interval: Duration::from_millis(10),
        },
        ..registration
    }
}

fn sink_registration(log: EventLog) -> HandlerRegistration {
    fast(HandlerRegistration::new(recording_handler(log)))
}

fn echo_registration() -> HandlerRegistration {
    fast(HandlerRegistration::new(handler_fn(
        |event: Event, _publisher| async move {
            let reply = event
                .reply("com.spec.echo.done")
                .source(SERVICE)
                .data(json!({"echo": event.data}))
                .build()
                .map_err(|e| HandlerError::failed(e.to_string()))?;
            Ok(vec![reply])
        },
    )))
}

fn inbound(source: &str, to: &str) -> Event {
    Event::builder("com.spec.echo.run")
        .source(source)
        .to(to)
        .subject("subj-s8")
        .data(json!({"n": 1}))
        .build()
        .unwrap()
}

#[tokio::test]
async fn dispatch_without_sink_rejects() {
    let broker = broker();
    broker
        .register_handler(SERVICE, echo_registration())
        .await
        .unwrap();
    let err = broker.dispatch(inbound(CALLER, SERVICE)).await.unwrap_err();
    assert!(matches!(err, DurableBrokerError::NoCompletionSink));
    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn dispatch_with_wrong_source_rejects() {
    let broker = broker();
    broker
        .on_workflow_complete(CALLER, sink_registration(event_log()))
        .await
        .unwrap();
    broker
        .register_handler(SERVICE, echo_registration())
        .await
        .unwrap();
    let err = broker
        .dispatch(inbound("com.imposter", SERVICE))
        .await
        .unwrap_err();
    assert!(matches!(err, DurableBrokerError::SourceMismatch { .. }));
    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn dispatch_to_unregistered_destination_rejects() {
    let broker = broker();
    broker
        .on_workflow_complete(CALLER, sink_registration(event_log()))
        .await
        .unwrap();
    broker
        .register_handler(SERVICE, echo_registration())
        .await
        .unwrap();
    let err = broker
        .dispatch(inbound(CALLER, "com.spec.unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, DurableBrokerError::UnknownDestination(_)));
    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn dispatch_with_all_conditions_enqueues_and_completes() {
    let broker = broker();
    let sink_log = event_log();
    broker
        .on_workflow_complete(CALLER, sink_registration(Arc::clone(&sink_log)))
        .await
        .unwrap();
    broker
        .register_handler(SERVICE, echo_registration())
        .await
        .unwrap();

    let job_id = broker.dispatch(inbound(CALLER, SERVICE)).await.unwrap();
    assert!(job_id.is_some());

    for _ in 0..300 {
        if !sink_log.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let completions = sink_log.lock();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].event_type, "com.spec.echo.done");
    assert_eq!(completions[0].subject, "subj-s8");
    drop(completions);
    broker.shutdown().await.unwrap();
}
