// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event envelope routed by the brokers

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

crate::define_id! {
    /// Unique identifier of a single event.
    pub struct EventId;
}

crate::define_id! {
    /// Workflow-instance identifier, shared by every event of one
    /// workflow tree.
    pub struct Subject;
}

fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The unit of communication.
///
/// Wire names follow the lowercase extension-attribute convention
/// (`parentid`, `accesscontrol`, `executionunits`) so events survive
/// round-trips through the durable queue unchanged.
///
/// Invariants: `subject` is stable along a causal chain and replies carry
/// it unchanged; the triple (`subject`, `to`, `id`) is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Publisher identity.
    pub source: String,
    /// Destination handler identity. `None` for terminal/completion events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub subject: Subject,
    /// Causal parent event id, used for reply correlation.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "parentid")]
    pub parent_id: Option<EventId>,
    /// Out-of-band routing tag. A non-empty domain diverts the event to the
    /// registered domained-event listener instead of a handler queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Opaque authorization context propagated across the causal chain.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "accesscontrol"
    )]
    pub access_control: Option<String>,
    /// Structured payload, schema-validated by the receiving handler's
    /// contract.
    pub data: serde_json::Value,
    #[serde(default, rename = "executionunits")]
    pub execution_units: u64,
    /// Creation time as epoch milliseconds.
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<String>,
}

impl Event {
    /// Start building an event of the given type. `source` is the only
    /// other required field.
    pub fn builder(event_type: impl Into<String>) -> EventBuilder {
        EventBuilder::new(event_type)
    }

    /// Start building a reply to this event.
    ///
    /// The reply is addressed to this event's `source` and carries the same
    /// `subject`, `access_control`, and trace headers; `parent_id` is set to
    /// this event's `id`.
    pub fn reply(&self, event_type: impl Into<String>) -> EventBuilder {
        let mut builder = EventBuilder::new(event_type);
        builder.to = Some(self.source.clone());
        builder.subject = Some(self.subject.clone());
        builder.parent_id = Some(self.id.clone());
        builder.access_control = self.access_control.clone();
        builder.traceparent = self.traceparent.clone();
        builder.tracestate = self.tracestate.clone();
        builder
    }

    /// Terminal events have no destination and flow only to completion
    /// sinks or resolve captures.
    pub fn is_terminal(&self) -> bool {
        match &self.to {
            None => true,
            Some(to) => to.is_empty(),
        }
    }
}

/// Error from [`EventBuilder::build`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBuilderError {
    #[error("event source is required")]
    MissingSource,
}

/// Builds an [`Event`], minting `id`, `subject`, and `time` when the caller
/// does not provide them.
#[derive(Debug, Default)]
pub struct EventBuilder {
    id: Option<EventId>,
    event_type: String,
    source: Option<String>,
    to: Option<String>,
    subject: Option<Subject>,
    parent_id: Option<EventId>,
    domain: Option<String>,
    access_control: Option<String>,
    data: serde_json::Value,
    execution_units: u64,
    time: Option<u64>,
    traceparent: Option<String>,
    tracestate: Option<String>,
}

impl EventBuilder {
    fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<EventId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<Subject>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn parent_id(mut self, parent_id: impl Into<EventId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn access_control(mut self, access_control: impl Into<String>) -> Self {
        self.access_control = Some(access_control.into());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn execution_units(mut self, units: u64) -> Self {
        self.execution_units = units;
        self
    }

    pub fn time(mut self, epoch_ms: u64) -> Self {
        self.time = Some(epoch_ms);
        self
    }

    pub fn traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self
    }

    pub fn tracestate(mut self, tracestate: impl Into<String>) -> Self {
        self.tracestate = Some(tracestate.into());
        self
    }

    pub fn build(self) -> Result<Event, EventBuilderError> {
        let source = self.source.ok_or(EventBuilderError::MissingSource)?;
        Ok(Event {
            id: self.id.unwrap_or_else(EventId::random),
            event_type: self.event_type,
            source,
            to: self.to,
            subject: self.subject.unwrap_or_else(Subject::random),
            parent_id: self.parent_id,
            domain: self.domain,
            access_control: self.access_control,
            data: self.data,
            execution_units: self.execution_units,
            time: self.time.unwrap_or_else(epoch_ms_now),
            traceparent: self.traceparent,
            tracestate: self.tracestate,
        })
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
