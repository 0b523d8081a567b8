// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use crate::contract::ServiceContract;
use crate::event::Event;
use serde_json::json;

// ── Event factory functions ─────────────────────────────────────────────────

pub fn ping_event(subject: &str, to: &str) -> Event {
    Event::builder("com.test.ping")
        .source("com.test.caller")
        .to(to)
        .subject(subject)
        .data(json!({"n": 1}))
        .build()
        .unwrap()
}

pub fn init_event(subject: &str, to: &str, data: serde_json::Value) -> Event {
    Event::builder("com.test.init")
        .source("com.test.caller")
        .to(to)
        .subject(subject)
        .data(data)
        .build()
        .unwrap()
}

// ── Contract factories ──────────────────────────────────────────────────────

/// Contract accepting `{"expression": string}` and emitting
/// `{"result": number}` on the done type.
pub fn calculator_contract() -> ServiceContract {
    ServiceContract::new(
        "arvo.service.calculator",
        "com.calculator.run",
        json!({
            "type": "object",
            "properties": {"expression": {"type": "string"}},
            "required": ["expression"],
            "additionalProperties": false
        }),
        [(
            "com.calculator.run.done".to_string(),
            json!({
                "type": "object",
                "properties": {"result": {"type": "number"}},
                "required": ["result"]
            }),
        )],
    )
    .unwrap()
}

/// Contract with an open accepts schema, for handlers that take anything.
pub fn open_contract(uri: &str, accepts_type: &str) -> ServiceContract {
    ServiceContract::new(uri, accepts_type, json!({"type": "object"}), []).unwrap()
}
