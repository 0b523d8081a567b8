// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic-addressed event routing over bounded work queues

use crate::handler::{DynHandler, Publisher, RoutingSink};
use crate::pipeline::{HandlerConfig, HandlerPipeline};
use crate::work_queue::{QueueStats, Runner, WorkQueue};
use arvo_core::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::Instrument;

/// Errors surfaced by the broker and reported to its error hook
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("routing failed: no subscriber for '{to}' (event {event_id})")]
    RoutingFailed { to: String, event_id: String },
    #[error("event {event_id} has no destination")]
    MissingDestination { event_id: String },
    #[error("topic '{0}' already has a subscriber")]
    DuplicateTopic(String),
    #[error("wait for idle timed out after {0:?}")]
    IdleTimeout(Duration),
    #[error("handler on topic '{topic}' failed: {message}")]
    Handler { topic: String, message: String },
    #[error("resolve source '{0}' collides with a registered topic")]
    ResolveSourceCollision(String),
    #[error("a resolve is already in progress")]
    ResolveBusy,
}

pub type ErrorHook = Arc<dyn Fn(&BrokerError) + Send + Sync>;
pub type DomainedListener = Arc<dyn Fn(Event) + Send + Sync>;

/// Quiescence polling parameters.
#[derive(Debug, Clone, Copy)]
pub struct IdleConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Broker-wide configuration.
#[derive(Clone, Default)]
pub struct BrokerConfig {
    pub on_error: Option<ErrorHook>,
    /// Receives events carrying a non-empty `domain` instead of a queue.
    pub on_domained_event: Option<DomainedListener>,
    /// Applied to subscriptions that do not bring their own config.
    pub default_handler_config: HandlerConfig,
    pub idle: IdleConfig,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("has_error_hook", &self.on_error.is_some())
            .field("has_domained_listener", &self.on_domained_event.is_some())
            .field("idle", &self.idle)
            .finish()
    }
}

/// Per-subscription options.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub topic: String,
    /// Maximum concurrent invocations for this topic. Clamped to ≥ 1.
    pub prefetch: usize,
    /// Overrides the broker's default handler config when set.
    pub config: Option<HandlerConfig>,
}

impl SubscribeOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            prefetch: 1,
            config: None,
        }
    }

    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = Some(config);
        self
    }
}

pub(crate) struct ResolveCapture {
    pub(crate) source: String,
    pub(crate) output: Option<Event>,
    pub(crate) domained: Vec<Event>,
}

pub(crate) struct BrokerInner {
    topics: Mutex<HashMap<String, Arc<WorkQueue>>>,
    on_error: Option<ErrorHook>,
    on_domained_event: Option<DomainedListener>,
    default_handler_config: HandlerConfig,
    pub(crate) idle: IdleConfig,
    pub(crate) capture: Mutex<Option<ResolveCapture>>,
}

impl BrokerInner {
    pub(crate) fn report(&self, error: BrokerError) {
        tracing::warn!(error = %error, "broker error");
        if let Some(hook) = &self.on_error {
            hook(&error);
        }
    }

    /// Route an event produced inside the broker (handler outputs, cascades,
    /// resolve injections). Failures go to the error hook; the event drops.
    pub(crate) fn route(&self, event: Event) {
        // Resolve capture intercepts before any drop path.
        {
            let mut capture = self.capture.lock();
            if let Some(active) = capture.as_mut() {
                if event.domain.is_some() {
                    active.domained.push(event);
                    return;
                }
                let addressed_to_caller =
                    event.to.as_deref() == Some(active.source.as_str()) || event.is_terminal();
                if addressed_to_caller {
                    if active.output.is_none() {
                        active.output = Some(event);
                    }
                    return;
                }
            }
        }

        if event.domain.is_some() {
            if let Some(listener) = &self.on_domained_event {
                listener(event);
                return;
            }
            // No listener configured: fall through to destination routing.
        }

        let to = match event.to.as_deref() {
            Some(to) if !to.is_empty() => to.to_string(),
            _ => {
                self.report(BrokerError::MissingDestination {
                    event_id: event.id.to_string(),
                });
                return;
            }
        };

        let queue = self.topics.lock().get(&to).cloned();
        match queue {
            Some(queue) => queue.enqueue(event),
            None => self.report(BrokerError::RoutingFailed {
                to,
                event_id: event.id.to_string(),
            }),
        }
    }

    pub(crate) fn all_idle(&self) -> bool {
        self.topics.lock().values().all(|queue| queue.is_idle())
    }

    pub(crate) fn has_topic(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }
}

impl RoutingSink for BrokerInner {
    fn route_event(&self, event: Event) {
        self.route(event);
    }
}

/// Guard for one topic subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    inner: Weak<BrokerInner>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the subscription. Pending items for the topic are dropped;
    /// in-flight invocations run to completion.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(queue) = inner.topics.lock().remove(&self.topic) {
                queue.clear_pending();
            }
        }
    }
}

/// Concurrent in-process event broker (C3).
pub struct EventBroker {
    pub(crate) inner: Arc<BrokerInner>,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl EventBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: Mutex::new(HashMap::new()),
                on_error: config.on_error,
                on_domained_event: config.on_domained_event,
                default_handler_config: config.default_handler_config,
                idle: config.idle,
                capture: Mutex::new(None),
            }),
        }
    }

    /// Register a handler for a topic. Fails if the topic already has one.
    pub fn subscribe(
        &self,
        options: SubscribeOptions,
        handler: DynHandler,
    ) -> Result<Subscription, BrokerError> {
        let topic = options.topic.clone();
        let config = options
            .config
            .unwrap_or_else(|| self.inner.default_handler_config.clone());
        let pipeline = Arc::new(HandlerPipeline::new(topic.clone(), config, handler));

        let inner_weak = Arc::downgrade(&self.inner);
        let runner: Runner = Arc::new(move |event| {
            let pipeline = Arc::clone(&pipeline);
            let inner_weak = inner_weak.clone();
            Box::pin(async move {
                let Some(inner) = inner_weak.upgrade() else {
                    return;
                };
                let inner_dyn: Arc<dyn RoutingSink> = inner.clone();
                let sink: Weak<dyn RoutingSink> = Arc::downgrade(&inner_dyn);
                let publisher = Publisher::new(sink);
                let span = tracing::info_span!(
                    "handle_event",
                    topic = %pipeline.topic,
                    event_id = %event.id,
                    event_type = %event.event_type,
                );
                match pipeline.run(event, &publisher).instrument(span).await {
                    Ok(outputs) => {
                        for output in outputs {
                            inner.route(output);
                        }
                    }
                    Err(err) => inner.report(BrokerError::Handler {
                        topic: pipeline.topic.clone(),
                        message: err.to_string(),
                    }),
                }
            })
        });

        let mut topics = self.inner.topics.lock();
        if topics.contains_key(&topic) {
            return Err(BrokerError::DuplicateTopic(topic));
        }
        let queue = WorkQueue::new(topic.clone(), options.prefetch, runner);
        topics.insert(topic.clone(), queue);
        Ok(Subscription {
            topic,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Inject an event. Requires a destination (or a domain with a listener).
    pub fn publish(&self, event: Event) -> Result<(), BrokerError> {
        if event.is_terminal() && event.domain.is_none() && self.inner.capture.lock().is_none() {
            return Err(BrokerError::MissingDestination {
                event_id: event.id.to_string(),
            });
        }
        self.inner.route(event);
        Ok(())
    }

    /// A publisher handle for code outside handler bodies.
    pub fn publisher(&self) -> Publisher {
        let inner_dyn: Arc<dyn RoutingSink> = self.inner.clone();
        let sink: Weak<dyn RoutingSink> = Arc::downgrade(&inner_dyn);
        Publisher::new(sink)
    }

    /// Wait until no topic has pending or in-flight work, observed twice
    /// across a poll interval.
    ///
    /// A single zero observation is not quiescence: a handler can publish
    /// between its queue's in-flight decrement and the pending update of a
    /// sibling queue.
    pub async fn wait_for_idle(&self) -> Result<(), BrokerError> {
        let idle = self.inner.idle;
        self.wait_for_idle_with(idle.timeout, idle.poll_interval).await
    }

    pub async fn wait_for_idle_with(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut consecutive_idle = 0u32;
        loop {
            if self.inner.all_idle() {
                consecutive_idle += 1;
                if consecutive_idle >= 2 {
                    return Ok(());
                }
            } else {
                consecutive_idle = 0;
            }
            if Instant::now() >= deadline {
                return Err(BrokerError::IdleTimeout(timeout));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Per-topic occupancy snapshot.
    pub fn stats(&self) -> HashMap<String, QueueStats> {
        self.inner
            .topics
            .lock()
            .iter()
            .map(|(topic, queue)| (topic.clone(), queue.stats()))
            .collect()
    }

    /// Drop all subscriptions and pending work.
    pub fn clear(&self) {
        let mut topics = self.inner.topics.lock();
        for queue in topics.values() {
            queue.clear_pending();
        }
        topics.clear();
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
