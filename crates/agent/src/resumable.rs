// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resumable handler protocol and its machine-memory runner

use arvo_broker::{EventHandler, HandlerError, Publisher};
use arvo_core::{Event, Subject, PARENT_SUBJECT_KEY};
use arvo_memory::{DynMachineMemory, StateRecord, VersionedState, WriteMeta};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

const STATUS_SUSPENDED: &str = "suspended";
const STATUS_COMPLETE: &str = "complete";

/// What woke the handler up.
///
/// Exactly one of `input` (first run) or `service` (a reply) is set; the
/// runner classifies before calling `step`.
pub struct Trigger<C> {
    pub subject: Subject,
    pub input: Option<Event>,
    pub context: Option<C>,
    pub service: Option<Event>,
}

/// An external call the handler wants made while it suspends.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    /// Becomes the emitted event's id (`toolUseId`); the reply's
    /// `parentid` must match it.
    pub id: String,
    pub event_type: String,
    pub to: String,
    pub data: serde_json::Value,
    pub domain: Option<String>,
    pub execution_units: u64,
    /// Child-workflow subject for delegations; `None` keeps the caller's
    /// subject.
    pub subject: Option<Subject>,
}

/// Terminal output of a workflow instance.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDraft {
    pub event_type: String,
    pub data: serde_json::Value,
    pub execution_units: u64,
}

/// Result of one step.
#[derive(Debug)]
pub enum Step<C> {
    /// Final output; the runner emits it to the initiator and cleans up.
    Complete { context: C, output: OutputDraft },
    /// Request external calls and suspend until the replies arrive.
    Suspend {
        context: C,
        services: Vec<ServiceRequest>,
    },
    /// Still waiting on other replies; persist and stay suspended.
    Pending { context: C },
}

/// A step function whose state survives between events.
#[async_trait]
pub trait ResumableHandler: Send + Sync {
    type Context: Serialize + DeserializeOwned + Send + Sync;

    /// Handler identity: the topic it subscribes on and the `source` of
    /// every event it emits.
    fn source(&self) -> &str;

    async fn step(&self, trigger: Trigger<Self::Context>)
        -> Result<Step<Self::Context>, HandlerError>;
}

/// Protocol metadata the runner persists alongside the handler context.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InitRef {
    id: String,
    source: String,
    event_type: String,
    access_control: Option<String>,
    traceparent: Option<String>,
    tracestate: Option<String>,
}

impl InitRef {
    fn from_event(event: &Event) -> Self {
        Self {
            id: event.id.to_string(),
            source: event.source.clone(),
            event_type: event.event_type.clone(),
            access_control: event.access_control.clone(),
            traceparent: event.traceparent.clone(),
            tracestate: event.tracestate.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    context: serde_json::Value,
    init: InitRef,
}

/// Runs a [`ResumableHandler`] as a broker handler, implementing the
/// invocation contract: lock → read → classify → step → write(prev) →
/// unlock. A version mismatch on write aborts the invocation as fatal.
pub struct MachineExecutor<H: ResumableHandler> {
    handler: H,
    memory: DynMachineMemory,
}

impl<H: ResumableHandler> MachineExecutor<H> {
    pub fn new(handler: H, memory: DynMachineMemory) -> Self {
        Self { handler, memory }
    }

    pub fn source(&self) -> &str {
        self.handler.source()
    }

    fn build_record(
        &self,
        context: &H::Context,
        init: &InitRef,
        execution_status: &str,
        parent_subject: Option<Subject>,
    ) -> Result<StateRecord, HandlerError> {
        let context_value = serde_json::to_value(context)
            .map_err(|e| HandlerError::State(format!("context encode failed: {e}")))?;
        Ok(StateRecord {
            data: json!({ "context": context_value, "init": init }),
            execution_status: execution_status.to_string(),
            source: self.handler.source().to_string(),
            initiator: Some(init.source.clone()),
            parent_subject,
        })
    }

    async fn write_state(
        &self,
        subject: &Subject,
        record: StateRecord,
        prev: Option<&VersionedState>,
        traceparent: Option<String>,
    ) -> Result<VersionedState, HandlerError> {
        self.memory
            .write(subject, record, prev, WriteMeta { traceparent })
            .await
            .map_err(|e| HandlerError::State(e.to_string()))
    }

    /// Build the events for a suspension: one per requested service call,
    /// each with `id = toolUseId` and the causal parent set to the
    /// triggering event.
    fn service_events(
        &self,
        subject: &Subject,
        trigger_event: &Event,
        init: &InitRef,
        services: Vec<ServiceRequest>,
    ) -> Result<Vec<Event>, HandlerError> {
        services
            .into_iter()
            .map(|request| {
                let mut builder = Event::builder(request.event_type)
                    .id(request.id)
                    .source(self.handler.source())
                    .to(request.to)
                    .subject(request.subject.unwrap_or_else(|| subject.clone()))
                    .parent_id(trigger_event.id.clone())
                    .data(request.data)
                    .execution_units(request.execution_units);
                if let Some(domain) = request.domain {
                    builder = builder.domain(domain);
                }
                if let Some(access_control) = &init.access_control {
                    builder = builder.access_control(access_control.clone());
                }
                if let Some(traceparent) = &trigger_event.traceparent {
                    builder = builder.traceparent(traceparent.clone());
                }
                builder
                    .build()
                    .map_err(|e| HandlerError::failed(e.to_string()))
            })
            .collect()
    }

    async fn run_locked(
        &self,
        subject: &Subject,
        event: &Event,
    ) -> Result<Vec<Event>, HandlerError> {
        let prev = self
            .memory
            .read(subject)
            .await
            .map_err(|e| HandlerError::State(e.to_string()))?;

        // Classify the trigger: no stored state means init, otherwise the
        // event carries a service reply.
        let (trigger, init, parent_subject) = match &prev {
            None => {
                let parent_subject = event
                    .data
                    .get(PARENT_SUBJECT_KEY)
                    .and_then(|value| value.as_str())
                    .map(Subject::new);
                (
                    Trigger {
                        subject: subject.clone(),
                        input: Some(event.clone()),
                        context: None,
                        service: None,
                    },
                    InitRef::from_event(event),
                    parent_subject,
                )
            }
            Some(stored) => {
                let envelope: Envelope = serde_json::from_value(stored.record.data.clone())
                    .map_err(|e| HandlerError::State(format!("state decode failed: {e}")))?;
                let context: H::Context = serde_json::from_value(envelope.context)
                    .map_err(|e| HandlerError::State(format!("context decode failed: {e}")))?;
                (
                    Trigger {
                        subject: subject.clone(),
                        input: None,
                        context: Some(context),
                        service: Some(event.clone()),
                    },
                    envelope.init,
                    stored.record.parent_subject.clone(),
                )
            }
        };

        let step = self.handler.step(trigger).await?;

        match step {
            Step::Pending { context } => {
                let record =
                    self.build_record(&context, &init, STATUS_SUSPENDED, parent_subject)?;
                self.write_state(subject, record, prev.as_ref(), event.traceparent.clone())
                    .await?;
                Ok(Vec::new())
            }
            Step::Suspend { context, services } => {
                let record =
                    self.build_record(&context, &init, STATUS_SUSPENDED, parent_subject)?;
                self.write_state(subject, record, prev.as_ref(), event.traceparent.clone())
                    .await?;
                self.service_events(subject, event, &init, services)
            }
            Step::Complete { context, output } => {
                let record = self.build_record(
                    &context,
                    &init,
                    STATUS_COMPLETE,
                    parent_subject.clone(),
                )?;
                self.write_state(subject, record, prev.as_ref(), event.traceparent.clone())
                    .await?;
                self.memory
                    .cleanup(subject)
                    .await
                    .map_err(|e| HandlerError::State(e.to_string()))?;

                // Child workflows restore the caller's subject on their
                // completion event, keeping the parent's causal chain intact.
                let completion_subject =
                    parent_subject.unwrap_or_else(|| subject.clone());
                let mut builder = Event::builder(output.event_type)
                    .source(self.handler.source())
                    .to(init.source.clone())
                    .subject(completion_subject)
                    .parent_id(init.id.clone())
                    .data(output.data)
                    .execution_units(output.execution_units);
                if let Some(access_control) = &init.access_control {
                    builder = builder.access_control(access_control.clone());
                }
                if let Some(traceparent) = &init.traceparent {
                    builder = builder.traceparent(traceparent.clone());
                }
                let completion = builder
                    .build()
                    .map_err(|e| HandlerError::failed(e.to_string()))?;
                Ok(vec![completion])
            }
        }
    }
}

#[async_trait]
impl<H: ResumableHandler> EventHandler for MachineExecutor<H> {
    async fn handle(
        &self,
        event: Event,
        _publisher: Publisher,
    ) -> Result<Vec<Event>, HandlerError> {
        let subject = event.subject.clone();
        let locked = self
            .memory
            .lock(&subject)
            .await
            .map_err(|e| HandlerError::State(e.to_string()))?;
        if !locked {
            return Err(HandlerError::State(format!(
                "lock acquisition failed for subject '{subject}'"
            )));
        }

        let result = self.run_locked(&subject, &event).await;

        if let Err(err) = self.memory.unlock(&subject).await {
            tracing::warn!(subject = %subject, error = %err, "unlock failed");
        }
        result
    }
}

#[cfg(test)]
#[path = "resumable_tests.rs"]
mod tests;
