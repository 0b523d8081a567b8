// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S1: a handler's output cascades into another handler's queue.

use crate::prelude::*;
use arvo_broker::{handler_fn, HandlerError, SubscribeOptions};
use arvo_core::Event;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn basic_broker_cascade() {
    let (broker, errors) = broker_with_error_log();
    let first_log = event_log();
    let second_log = event_log();

    let forward = {
        let first_log = Arc::clone(&first_log);
        handler_fn(move |event: Event, _publisher| {
            let first_log = Arc::clone(&first_log);
            async move {
                first_log.lock().push(event.clone());
                let next = Event::builder("com.spec.forwarded")
                    .source("topic1")
                    .to("topic2")
                    .subject(event.subject.clone())
                    .parent_id(event.id.clone())
                    .data(event.data.clone())
                    .build()
                    .map_err(|e| HandlerError::failed(e.to_string()))?;
                Ok(vec![next])
            }
        })
    };
    broker
        .subscribe(SubscribeOptions::new("topic1"), forward)
        .unwrap();
    broker
        .subscribe(
            SubscribeOptions::new("topic2"),
            recording_handler(Arc::clone(&second_log)),
        )
        .unwrap();

    let event = Event::builder("com.spec.start")
        .source("com.spec.caller")
        .to("topic1")
        .subject("cascade-subject")
        .data(json!({"hello": "world"}))
        .build()
        .unwrap();
    broker.publish(event).unwrap();
    broker.wait_for_idle().await.unwrap();

    assert_eq!(first_log.lock().len(), 1, "handler A ran exactly once");
    assert_eq!(second_log.lock().len(), 1, "handler B ran exactly once");
    assert_eq!(second_log.lock()[0].subject, "cascade-subject");
    assert_eq!(second_log.lock()[0].data, json!({"hello": "world"}));
    assert!(errors.lock().is_empty());
}
