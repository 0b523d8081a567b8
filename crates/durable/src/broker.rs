// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable event broker over a job queue

use crate::queue::{
    Job, JobError, JobOptions, JobProcessor, JobQueue, QueueCounts, QueueError, QueueOptions,
    WorkerHandle, WorkerOptions,
};
use arvo_broker::{
    DomainedListener, DynHandler, HandlerConfig, HandlerPipeline, Publisher, RoutingSink,
};
use arvo_core::Event;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::Instrument;

/// Receives events addressed to a destination nobody registered.
pub type HandlerNotFoundListener = Arc<dyn Fn(Event) + Send + Sync>;

/// Errors from the durable broker
#[derive(Debug, Error)]
pub enum DurableBrokerError {
    #[error("no completion sink registered; call on_workflow_complete first")]
    NoCompletionSink,
    #[error("dispatch source '{actual}' does not match completion source '{expected}'")]
    SourceMismatch { expected: String, actual: String },
    #[error("no handler registered for destination '{0}'")]
    UnknownDestination(String),
    #[error("handler '{0}' is already registered")]
    DuplicateHandler(String),
    #[error("a completion sink is already registered for '{0}'")]
    CompletionAlreadyRegistered(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("event payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Broker-wide listeners.
#[derive(Clone, Default)]
pub struct DurableBrokerConfig {
    /// Receives events carrying a non-empty `domain` instead of a queue.
    pub on_domained_event: Option<DomainedListener>,
    /// Receives events whose destination matches no queue; the event is
    /// dropped either way.
    pub on_handler_not_found: Option<HandlerNotFoundListener>,
}

/// Everything needed to own a queue and work it.
#[derive(Clone)]
pub struct HandlerRegistration {
    /// Drop and re-create the queue before working it.
    pub recreate_queue: bool,
    pub queue_options: QueueOptions,
    pub worker_options: WorkerOptions,
    /// Defaults for jobs sent to this handler's queue.
    pub job_options: JobOptions,
    pub handler_config: HandlerConfig,
    pub handler: DynHandler,
}

impl HandlerRegistration {
    pub fn new(handler: DynHandler) -> Self {
        Self {
            recreate_queue: false,
            queue_options: QueueOptions::default(),
            worker_options: WorkerOptions::default(),
            job_options: JobOptions::default(),
            handler_config: HandlerConfig::default(),
            handler,
        }
    }
}

/// Completion-sink registration; the sink's queue is named after the
/// caller-supplied source.
pub type CompletionRegistration = HandlerRegistration;

struct SinkState {
    source: String,
    job_options: JobOptions,
}

struct Inner {
    handlers: Mutex<HashMap<String, JobOptions>>,
    completion: Mutex<Option<SinkState>>,
    on_domained_event: Option<DomainedListener>,
    on_handler_not_found: Option<HandlerNotFoundListener>,
}

impl Inner {
    fn job_options_for(&self, destination: &str) -> Option<JobOptions> {
        if let Some(options) = self.handlers.lock().get(destination) {
            return Some(options.clone());
        }
        let completion = self.completion.lock();
        completion
            .as_ref()
            .filter(|sink| sink.source == destination)
            .map(|sink| sink.job_options.clone())
    }

    fn drop_unrouteable(&self, event: Event) {
        tracing::warn!(
            event_id = %event.id,
            to = event.to.as_deref().unwrap_or(""),
            "no handler for event destination, dropping"
        );
        if let Some(listener) = &self.on_handler_not_found {
            listener(event);
        }
    }
}

/// Buffers mid-handler publishes; the worker routes them in publication
/// order once the job body returns.
#[derive(Default)]
struct BufferSink {
    events: Mutex<Vec<Event>>,
}

impl RoutingSink for BufferSink {
    fn route_event(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Persistent event broker (C7). Generic over the queue adapter.
pub struct DurableEventBroker<Q: JobQueue + 'static> {
    queue: Arc<Q>,
    inner: Arc<Inner>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl<Q: JobQueue + 'static> DurableEventBroker<Q> {
    pub fn new(queue: Arc<Q>, config: DurableBrokerConfig) -> Self {
        Self {
            queue,
            inner: Arc::new(Inner {
                handlers: Mutex::new(HashMap::new()),
                completion: Mutex::new(None),
                on_domained_event: config.on_domained_event,
                on_handler_not_found: config.on_handler_not_found,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    async fn install_queue(
        &self,
        name: &str,
        registration: &HandlerRegistration,
    ) -> Result<(), DurableBrokerError> {
        if registration.recreate_queue {
            self.queue.delete_queue(name).await?;
        }
        self.queue
            .create_queue(name, registration.queue_options.clone())
            .await?;
        Ok(())
    }

    async fn start_worker(
        &self,
        name: &str,
        registration: HandlerRegistration,
        is_sink: bool,
    ) -> Result<(), DurableBrokerError> {
        let pipeline = Arc::new(HandlerPipeline::new(
            name,
            registration.handler_config,
            registration.handler,
        ));
        let processor = Arc::new(EventJobProcessor {
            pipeline,
            queue: Arc::clone(&self.queue),
            inner: Arc::clone(&self.inner),
            is_sink,
        });
        let handle = self
            .queue
            .work(name, registration.worker_options, processor)
            .await?;
        self.workers.lock().push(handle);
        Ok(())
    }

    /// Register a handler under its queue name.
    pub async fn register_handler(
        &self,
        name: &str,
        registration: HandlerRegistration,
    ) -> Result<(), DurableBrokerError> {
        {
            let handlers = self.inner.handlers.lock();
            if handlers.contains_key(name) {
                return Err(DurableBrokerError::DuplicateHandler(name.to_string()));
            }
        }
        self.install_queue(name, &registration).await?;
        self.inner
            .handlers
            .lock()
            .insert(name.to_string(), registration.job_options.clone());
        self.start_worker(name, registration, false).await
    }

    /// Register the completion sink under the caller-supplied source.
    /// Terminal events and events addressed to `source` land here.
    pub async fn on_workflow_complete(
        &self,
        source: &str,
        registration: CompletionRegistration,
    ) -> Result<(), DurableBrokerError> {
        {
            let completion = self.inner.completion.lock();
            if let Some(existing) = completion.as_ref() {
                return Err(DurableBrokerError::CompletionAlreadyRegistered(
                    existing.source.clone(),
                ));
            }
        }
        self.install_queue(source, &registration).await?;
        *self.inner.completion.lock() = Some(SinkState {
            source: source.to_string(),
            job_options: registration.job_options.clone(),
        });
        self.start_worker(source, registration, true).await
    }

    /// Inject an external event (spec dispatch rules, enforced in order):
    /// a completion sink must exist, the event's source must be the
    /// completion source, and the destination must be a registered handler.
    pub async fn dispatch(&self, event: Event) -> Result<Option<String>, DurableBrokerError> {
        let completion_source = {
            let completion = self.inner.completion.lock();
            completion
                .as_ref()
                .map(|sink| sink.source.clone())
                .ok_or(DurableBrokerError::NoCompletionSink)?
        };
        if event.source != completion_source {
            return Err(DurableBrokerError::SourceMismatch {
                expected: completion_source,
                actual: event.source.clone(),
            });
        }
        let to = event
            .to
            .clone()
            .filter(|to| !to.is_empty())
            .ok_or_else(|| DurableBrokerError::UnknownDestination(String::new()))?;
        let job_options = {
            let handlers = self.inner.handlers.lock();
            handlers
                .get(&to)
                .cloned()
                .ok_or_else(|| DurableBrokerError::UnknownDestination(to.clone()))?
        };
        let payload = serde_json::to_value(&event)?;
        Ok(self.queue.send(&to, payload, job_options).await?)
    }

    /// Per-queue active and queued counts, completion sink included.
    pub async fn get_stats(&self) -> Result<HashMap<String, QueueCounts>, DurableBrokerError> {
        let mut names: Vec<String> = self.inner.handlers.lock().keys().cloned().collect();
        if let Some(sink) = self.inner.completion.lock().as_ref() {
            names.push(sink.source.clone());
        }
        let mut stats = HashMap::new();
        for name in names {
            let counts = self.queue.get_queue_stats(&name).await?;
            stats.insert(name, counts);
        }
        Ok(stats)
    }

    /// Stop all workers and the queue adapter.
    pub async fn shutdown(&self) -> Result<(), DurableBrokerError> {
        let workers: Vec<WorkerHandle> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.stop().await;
        }
        self.queue.shutdown().await?;
        Ok(())
    }
}

struct EventJobProcessor<Q: JobQueue + 'static> {
    pipeline: Arc<HandlerPipeline>,
    queue: Arc<Q>,
    inner: Arc<Inner>,
    is_sink: bool,
}

impl<Q: JobQueue + 'static> EventJobProcessor<Q> {
    /// Routing for worker-emitted events: domained listener first, then a
    /// registered queue, then the handler-not-found listener (drop).
    async fn route_output(&self, event: Event) -> Result<(), JobError> {
        if event.domain.is_some() {
            match &self.inner.on_domained_event {
                Some(listener) => listener(event),
                None => {
                    tracing::warn!(event_id = %event.id, "domained event with no listener, dropping")
                }
            }
            return Ok(());
        }

        let destination = match event.to.clone().filter(|to| !to.is_empty()) {
            Some(to) => to,
            None => {
                // Terminal events fall through to the completion sink.
                let completion = self.inner.completion.lock();
                match completion.as_ref() {
                    Some(sink) => sink.source.clone(),
                    None => {
                        drop(completion);
                        self.inner.drop_unrouteable(event);
                        return Ok(());
                    }
                }
            }
        };

        match self.inner.job_options_for(&destination) {
            Some(job_options) => {
                let payload = serde_json::to_value(&event)
                    .map_err(|e| JobError::new(format!("event encode failed: {e}")))?;
                self.queue
                    .send(&destination, payload, job_options)
                    .await
                    .map_err(|e| JobError::new(format!("forward to '{destination}' failed: {e}")))?;
                Ok(())
            }
            None => {
                self.inner.drop_unrouteable(event);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<Q: JobQueue + 'static> JobProcessor for EventJobProcessor<Q> {
    async fn process(&self, job: Job) -> Result<(), JobError> {
        let event: Event = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::new(format!("event decode failed: {e}")))?;

        // Re-enter the distributed trace the event carries.
        let span = tracing::info_span!(
            "durable_job",
            queue = %job.queue,
            job_id = %job.id,
            event_id = %event.id,
            event_type = %event.event_type,
            traceparent = event.traceparent.as_deref(),
        );

        let buffer = Arc::new(BufferSink::default());
        let buffer_dyn: Arc<dyn RoutingSink> = buffer.clone();
        let sink: Weak<dyn RoutingSink> = Arc::downgrade(&buffer_dyn);
        let publisher = Publisher::new(sink);

        let result = self
            .pipeline
            .run(event, &publisher)
            .instrument(span)
            .await;

        match result {
            Ok(outputs) => {
                let mut emitted = std::mem::take(&mut *buffer.events.lock());
                emitted.extend(outputs);
                if self.is_sink {
                    // The sink is terminal; anything it emits is discarded.
                    return Ok(());
                }
                for event in emitted {
                    self.route_output(event).await?;
                }
                Ok(())
            }
            Err(err) => Err(JobError::new(err.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
