// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S2: prefetch clamps per-topic concurrency at exactly its value.

use crate::prelude::*;
use arvo_broker::{handler_fn, SubscribeOptions};
use arvo_core::Event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn prefetch_clamps_concurrency() {
    let (broker, _errors) = broker_with_error_log();
    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let slow = {
        let current = Arc::clone(&current);
        let max_seen = Arc::clone(&max_seen);
        handler_fn(move |_event: Event, _publisher| {
            let current = Arc::clone(&current);
            let max_seen = Arc::clone(&max_seen);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        })
    };
    broker
        .subscribe(SubscribeOptions::new("slow-topic").prefetch(3), slow)
        .unwrap();

    for n in 0..10 {
        let event = Event::builder("com.spec.tick")
            .source("com.spec.caller")
            .to("slow-topic")
            .subject(format!("s-{n}"))
            .build()
            .unwrap();
        broker.publish(event).unwrap();
    }
    broker.wait_for_idle().await.unwrap();

    assert_eq!(
        max_seen.load(Ordering::SeqCst),
        3,
        "simultaneous in-flight count must be exactly the prefetch"
    );
}
