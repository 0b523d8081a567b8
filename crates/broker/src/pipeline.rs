// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-handler middleware chain, retry, and error disposition

use crate::handler::{DynHandler, HandlerError, Publisher};
use arvo_core::{Event, RetryPolicy};
use std::sync::Arc;

/// Transforms an inbound event before the handler body sees it.
/// Returning `None` leaves the event unchanged.
pub type InputMiddleware = Arc<dyn Fn(&Event) -> Option<Event> + Send + Sync>;

/// Context handed to output middleware.
pub struct MiddlewareContext<'a> {
    pub topic: &'a str,
    /// The (input-middleware-transformed) event the handler was invoked with.
    pub input: &'a Event,
}

/// Exactly one form is chosen per handler.
#[derive(Clone)]
pub enum OutputMiddleware {
    /// Applied to each outbound event independently.
    PerEvent(Arc<dyn Fn(Event, &MiddlewareContext<'_>) -> Event + Send + Sync>),
    /// Applied once to the whole outbound batch.
    Bulk(Arc<dyn Fn(Vec<Event>, &MiddlewareContext<'_>) -> Vec<Event> + Send + Sync>),
}

/// What to do with a handler error after retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Swallow the error; the broker error hook is not invoked.
    Suppress,
    /// Re-throw to the broker error hook. The input stays consumed.
    Throw,
}

pub type OnError = Arc<dyn Fn(&HandlerError, &Event) -> ErrorDisposition + Send + Sync>;

/// Per-handler pipeline configuration.
#[derive(Clone, Default)]
pub struct HandlerConfig {
    pub input_middleware: Vec<InputMiddleware>,
    pub output_middleware: Option<OutputMiddleware>,
    /// Applied to the handler body only; input middleware is not re-run.
    pub retry: Option<RetryPolicy>,
    /// Defaults to [`ErrorDisposition::Throw`] when unset.
    pub on_error: Option<OnError>,
}

impl HandlerConfig {
    pub fn with_input(mut self, middleware: InputMiddleware) -> Self {
        self.input_middleware.push(middleware);
        self
    }

    pub fn with_output(mut self, middleware: OutputMiddleware) -> Self {
        self.output_middleware = Some(middleware);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = Some(on_error);
        self
    }
}

/// A handler composed with its middleware, retry, and disposition.
///
/// Shared by the in-process and durable brokers; `topic` is the handler's
/// queue name in both.
pub struct HandlerPipeline {
    pub(crate) topic: String,
    config: HandlerConfig,
    handler: DynHandler,
}

impl HandlerPipeline {
    pub fn new(topic: impl Into<String>, config: HandlerConfig, handler: DynHandler) -> Self {
        Self {
            topic: topic.into(),
            config,
            handler,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run one event through the full pipeline.
    ///
    /// `Ok(outputs)` includes the suppressed-error case (empty batch, no
    /// hook); `Err` means the disposition was `Throw` and the caller must
    /// report to the broker error hook.
    pub async fn run(
        &self,
        event: Event,
        publisher: &Publisher,
    ) -> Result<Vec<Event>, HandlerError> {
        let mut input = event;
        for middleware in &self.config.input_middleware {
            if let Some(transformed) = middleware(&input) {
                input = transformed;
            }
        }

        let mut attempt: u32 = 0;
        let body_result = loop {
            match self.handler.handle(input.clone(), publisher.clone()).await {
                Ok(outputs) => break Ok(outputs),
                Err(err) => {
                    let retry = self.config.retry.as_ref();
                    if let Some(policy) = retry {
                        if policy.should_retry(attempt) {
                            let delay = policy.delay(attempt);
                            tracing::debug!(
                                topic = %self.topic,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "handler failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    break Err(err);
                }
            }
        };

        match body_result {
            Ok(outputs) => {
                let context = MiddlewareContext {
                    topic: &self.topic,
                    input: &input,
                };
                Ok(match &self.config.output_middleware {
                    None => outputs,
                    Some(OutputMiddleware::PerEvent(map)) => outputs
                        .into_iter()
                        .map(|output| map(output, &context))
                        .collect(),
                    Some(OutputMiddleware::Bulk(map)) => map(outputs, &context),
                })
            }
            Err(err) => {
                let disposition = match &self.config.on_error {
                    Some(on_error) => on_error(&err, &input),
                    None => ErrorDisposition::Throw,
                };
                match disposition {
                    ErrorDisposition::Suppress => {
                        tracing::debug!(topic = %self.topic, error = %err, "handler error suppressed");
                        Ok(Vec::new())
                    }
                    ErrorDisposition::Throw => Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
