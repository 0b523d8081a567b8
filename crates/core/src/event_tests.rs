// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn sample() -> Event {
    Event::builder("com.example.ping")
        .source("com.test.caller")
        .to("com.example.service")
        .subject("subj-1")
        .access_control("role=ops")
        .data(json!({"value": 1}))
        .build()
        .unwrap()
}

#[test]
fn builder_requires_source() {
    let err = Event::builder("com.example.ping").build().unwrap_err();
    assert_eq!(err, EventBuilderError::MissingSource);
}

#[test]
fn builder_mints_id_subject_and_time() {
    let event = Event::builder("com.example.ping")
        .source("s")
        .build()
        .unwrap();
    assert!(!event.id.as_str().is_empty());
    assert!(!event.subject.as_str().is_empty());
    assert!(event.time > 0);

    let other = Event::builder("com.example.ping")
        .source("s")
        .build()
        .unwrap();
    assert_ne!(event.id, other.id, "ids must be unique");
}

#[test]
fn builder_keeps_explicit_fields() {
    let event = sample();
    assert_eq!(event.event_type, "com.example.ping");
    assert_eq!(event.source, "com.test.caller");
    assert_eq!(event.to.as_deref(), Some("com.example.service"));
    assert_eq!(event.subject, "subj-1");
    assert_eq!(event.access_control.as_deref(), Some("role=ops"));
}

#[test]
fn reply_correlates_and_preserves_chain_fields() {
    let request = sample();
    let reply = request
        .reply("com.example.ping.done")
        .source("com.example.service")
        .data(json!({"ok": true}))
        .build()
        .unwrap();

    assert_eq!(reply.to.as_deref(), Some("com.test.caller"));
    assert_eq!(reply.subject, request.subject);
    assert_eq!(reply.parent_id.as_ref(), Some(&request.id));
    assert_eq!(reply.access_control, request.access_control);
}

#[test]
fn reply_carries_trace_headers() {
    let request = Event::builder("com.example.ping")
        .source("caller")
        .traceparent("00-abc-def-01")
        .tracestate("vendor=1")
        .build()
        .unwrap();
    let reply = request
        .reply("com.example.pong")
        .source("service")
        .build()
        .unwrap();
    assert_eq!(reply.traceparent.as_deref(), Some("00-abc-def-01"));
    assert_eq!(reply.tracestate.as_deref(), Some("vendor=1"));
}

#[test]
fn terminal_when_to_is_absent_or_empty() {
    let mut event = sample();
    assert!(!event.is_terminal());
    event.to = None;
    assert!(event.is_terminal());
    event.to = Some(String::new());
    assert!(event.is_terminal());
}

#[test]
fn wire_format_uses_flat_extension_names() {
    let event = Event::builder("com.example.ping")
        .id("ev-1")
        .source("caller")
        .to("service")
        .subject("subj-9")
        .parent_id("ev-0")
        .access_control("xyz")
        .execution_units(3)
        .time(42)
        .build()
        .unwrap();

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "com.example.ping");
    assert_eq!(value["parentid"], "ev-0");
    assert_eq!(value["accesscontrol"], "xyz");
    assert_eq!(value["executionunits"], 3);
    assert!(value.get("domain").is_none(), "unset options stay off the wire");
}

#[test]
fn wire_round_trip() {
    let event = sample();
    let encoded = serde_json::to_string(&event).unwrap();
    let decoded: Event = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, event);
}
