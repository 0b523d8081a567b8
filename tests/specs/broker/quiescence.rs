// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S7: the idle detector holds through cascade bursts.

use crate::prelude::*;
use arvo_broker::{handler_fn, HandlerError, SubscribeOptions};
use arvo_core::Event;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MAX_DEPTH: u64 = 5;

#[tokio::test]
async fn quiescence_under_cascade_bursts() {
    let (broker, errors) = broker_with_error_log();
    let invocations = Arc::new(AtomicUsize::new(0));

    // Every invocation up to the depth limit fans out two more events.
    let exploder = {
        let invocations = Arc::clone(&invocations);
        handler_fn(move |event: Event, _publisher| {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                let depth = event.data["depth"].as_u64().unwrap_or(0);
                if depth >= MAX_DEPTH {
                    return Ok(Vec::new());
                }
                let mut outputs = Vec::new();
                for _ in 0..2 {
                    outputs.push(
                        Event::builder("com.spec.split")
                            .source("fanout")
                            .to("fanout")
                            .subject(event.subject.clone())
                            .data(json!({ "depth": depth + 1 }))
                            .build()
                            .map_err(|e| HandlerError::failed(e.to_string()))?,
                    );
                }
                Ok(outputs)
            }
        })
    };
    broker
        .subscribe(SubscribeOptions::new("fanout").prefetch(4), exploder)
        .unwrap();

    let seed = Event::builder("com.spec.split")
        .source("com.spec.caller")
        .to("fanout")
        .subject("burst")
        .data(json!({"depth": 1}))
        .build()
        .unwrap();
    broker.publish(seed).unwrap();
    broker.wait_for_idle().await.unwrap();

    // depth 1..=5 doubling each level: 1+2+4+8+16
    assert_eq!(invocations.load(Ordering::SeqCst), 31);
    let stats = broker.stats();
    let fanout = stats.get("fanout").unwrap();
    assert_eq!(fanout.pending + fanout.in_flight, 0);
    assert!(errors.lock().is_empty());
}
