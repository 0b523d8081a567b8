// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::handler::{handler_fn, HandlerError, Publisher};
use crate::pipeline::{ErrorDisposition, HandlerConfig};
use arvo_core::test_support::ping_event;
use arvo_core::Event;
use parking_lot::Mutex as PlMutex;
use serde_json::json;

fn recording_handler(log: Arc<PlMutex<Vec<Event>>>) -> DynHandler {
    handler_fn(move |event: Event, _publisher| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(event);
            Ok(Vec::new())
        }
    })
}

fn broker_with_error_log() -> (EventBroker, Arc<PlMutex<Vec<String>>>) {
    let errors: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
    let hook_errors = Arc::clone(&errors);
    let broker = EventBroker::new(BrokerConfig {
        on_error: Some(Arc::new(move |err| {
            hook_errors.lock().push(err.to_string());
        })),
        ..BrokerConfig::default()
    });
    (broker, errors)
}

#[tokio::test]
async fn routes_to_subscribed_topic() {
    let (broker, _errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));
    broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(Arc::clone(&log)))
        .unwrap();

    broker.publish(ping_event("s", "topic1")).unwrap();
    broker.wait_for_idle().await.unwrap();

    assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn duplicate_subscription_fails() {
    let (broker, _errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));
    broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(Arc::clone(&log)))
        .unwrap();
    let err = broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(log))
        .unwrap_err();
    assert!(matches!(err, BrokerError::DuplicateTopic(t) if t == "topic1"));
}

#[tokio::test]
async fn unsubscribe_frees_the_topic() {
    let (broker, _errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));
    let subscription = broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(Arc::clone(&log)))
        .unwrap();
    subscription.unsubscribe();
    broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(log))
        .unwrap();
}

#[tokio::test]
async fn publish_without_destination_is_rejected() {
    let (broker, _errors) = broker_with_error_log();
    let mut event = ping_event("s", "topic1");
    event.to = None;
    let err = broker.publish(event).unwrap_err();
    assert!(matches!(err, BrokerError::MissingDestination { .. }));
}

#[tokio::test]
async fn unrouteable_event_hits_error_hook_and_drops() {
    let (broker, errors) = broker_with_error_log();
    broker.publish(ping_event("s", "nobody-home")).unwrap();
    broker.wait_for_idle().await.unwrap();
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("routing failed"), "got: {}", errors[0]);
    assert!(errors[0].contains("nobody-home"));
}

#[tokio::test]
async fn cascade_via_returned_events() {
    let (broker, _errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));

    // Handler A republishes to topic2 by returning an addressed event.
    let forward = handler_fn(|event: Event, _publisher| async move {
        let next = Event::builder("com.test.fwd")
            .source("topic1")
            .to("topic2")
            .subject(event.subject.clone())
            .parent_id(event.id.clone())
            .data(event.data.clone())
            .build()
            .map_err(|e| HandlerError::failed(e.to_string()))?;
        Ok(vec![next])
    });
    broker
        .subscribe(SubscribeOptions::new("topic1"), forward)
        .unwrap();
    broker
        .subscribe(SubscribeOptions::new("topic2"), recording_handler(Arc::clone(&log)))
        .unwrap();

    broker.publish(ping_event("subj", "topic1")).unwrap();
    broker.wait_for_idle().await.unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].event_type, "com.test.fwd");
    assert_eq!(log[0].subject, "subj");
}

#[tokio::test]
async fn cascade_via_publisher_inside_handler() {
    let (broker, _errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));

    let forward = handler_fn(|event: Event, publisher: Publisher| async move {
        let next = Event::builder("com.test.fwd")
            .source("topic1")
            .to("topic2")
            .subject(event.subject.clone())
            .build()
            .map_err(|e| HandlerError::failed(e.to_string()))?;
        publisher.publish(next)?;
        Ok(Vec::new())
    });
    broker
        .subscribe(SubscribeOptions::new("topic1"), forward)
        .unwrap();
    broker
        .subscribe(SubscribeOptions::new("topic2"), recording_handler(Arc::clone(&log)))
        .unwrap();

    broker.publish(ping_event("subj", "topic1")).unwrap();
    broker.wait_for_idle().await.unwrap();

    assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn emission_order_is_preserved_per_destination() {
    let (broker, _errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));

    let burst = handler_fn(|event: Event, _publisher| async move {
        let mut outputs = Vec::new();
        for n in 0..5 {
            outputs.push(
                Event::builder("com.test.burst")
                    .source("topic1")
                    .to("topic2")
                    .subject(event.subject.clone())
                    .data(json!({ "n": n }))
                    .build()
                    .map_err(|e| HandlerError::failed(e.to_string()))?,
            );
        }
        Ok(outputs)
    });
    broker
        .subscribe(SubscribeOptions::new("topic1"), burst)
        .unwrap();
    broker
        .subscribe(SubscribeOptions::new("topic2"), recording_handler(Arc::clone(&log)))
        .unwrap();

    broker.publish(ping_event("subj", "topic1")).unwrap();
    broker.wait_for_idle().await.unwrap();

    let ns: Vec<i64> = log
        .lock()
        .iter()
        .map(|e| e.data["n"].as_i64().unwrap_or(-1))
        .collect();
    assert_eq!(ns, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn handler_failure_reports_hook_and_queue_continues() {
    let (broker, errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));
    let handler = {
        let log = Arc::clone(&log);
        handler_fn(move |event: Event, _publisher| {
            let log = Arc::clone(&log);
            async move {
                if event.data["n"] == json!(0) {
                    Err(HandlerError::failed("first one fails"))
                } else {
                    log.lock().push(event);
                    Ok(Vec::new())
                }
            }
        })
    };
    broker
        .subscribe(SubscribeOptions::new("topic1"), handler)
        .unwrap();

    let mut first = ping_event("a", "topic1");
    first.data = json!({"n": 0});
    let mut second = ping_event("b", "topic1");
    second.data = json!({"n": 1});
    broker.publish(first).unwrap();
    broker.publish(second).unwrap();
    broker.wait_for_idle().await.unwrap();

    assert_eq!(log.lock().len(), 1, "queue keeps going after a failure");
    assert_eq!(errors.lock().len(), 1);
}

#[tokio::test]
async fn suppressed_handler_error_skips_hook() {
    let (broker, errors) = broker_with_error_log();
    let handler = handler_fn(|_event: Event, _publisher| async move {
        Err::<Vec<Event>, _>(HandlerError::failed("quiet"))
    });
    let config = HandlerConfig::default()
        .with_on_error(Arc::new(|_err, _event| ErrorDisposition::Suppress));
    broker
        .subscribe(SubscribeOptions::new("topic1").config(config), handler)
        .unwrap();

    broker.publish(ping_event("s", "topic1")).unwrap();
    broker.wait_for_idle().await.unwrap();
    assert!(errors.lock().is_empty());
}

#[tokio::test]
async fn domained_event_goes_to_listener_not_queue() {
    let domained = Arc::new(PlMutex::new(Vec::new()));
    let listener_log = Arc::clone(&domained);
    let broker = EventBroker::new(BrokerConfig {
        on_domained_event: Some(Arc::new(move |event| {
            listener_log.lock().push(event);
        })),
        ..BrokerConfig::default()
    });
    let log = Arc::new(PlMutex::new(Vec::new()));
    broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(Arc::clone(&log)))
        .unwrap();

    let mut event = ping_event("s", "topic1");
    event.domain = Some("human.review".to_string());
    broker.publish(event).unwrap();
    broker.wait_for_idle().await.unwrap();

    assert!(log.lock().is_empty(), "queue must not see domained events");
    assert_eq!(domained.lock().len(), 1);
}

#[tokio::test]
async fn wait_for_idle_times_out_while_work_remains() {
    let (broker, _errors) = broker_with_error_log();
    let handler = handler_fn(|_event: Event, _publisher| async move {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        Ok(Vec::new())
    });
    broker
        .subscribe(SubscribeOptions::new("topic1"), handler)
        .unwrap();
    broker.publish(ping_event("s", "topic1")).unwrap();

    let err = broker
        .wait_for_idle_with(
            std::time::Duration::from_millis(50),
            std::time::Duration::from_millis(5),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::IdleTimeout(_)));
    broker.wait_for_idle().await.unwrap();
}

#[tokio::test]
async fn clear_drops_subscriptions_and_pending_work() {
    let (broker, _errors) = broker_with_error_log();
    let log = Arc::new(PlMutex::new(Vec::new()));
    broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(Arc::clone(&log)))
        .unwrap();
    broker.clear();
    assert!(broker.stats().is_empty());
    // Topic can be registered again after clear.
    broker
        .subscribe(SubscribeOptions::new("topic1"), recording_handler(log))
        .unwrap();
}

#[tokio::test]
async fn stats_expose_per_topic_counts() {
    let (broker, _errors) = broker_with_error_log();
    let handler = handler_fn(|_event: Event, _publisher| async move {
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        Ok(Vec::new())
    });
    broker
        .subscribe(SubscribeOptions::new("topic1").prefetch(2), handler)
        .unwrap();
    for i in 0..4 {
        broker.publish(ping_event(&format!("s{i}"), "topic1")).unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let stats = broker.stats();
    let topic_stats = stats.get("topic1").copied().unwrap();
    assert_eq!(topic_stats.prefetch, 2);
    assert_eq!(topic_stats.in_flight, 2);
    assert_eq!(topic_stats.pending, 2);
    broker.wait_for_idle().await.unwrap();
}
