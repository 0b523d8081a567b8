// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler trait, routing seam, and error type

use arvo_core::{ContractError, Event};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Where published events go.
///
/// The in-process broker routes immediately; the durable broker buffers
/// until the job completes and then routes in publication order.
pub trait RoutingSink: Send + Sync {
    fn route_event(&self, event: Event);
}

/// Handle for publishing from inside a handler body.
///
/// Cheap to clone; becomes inert (publish errors) once its broker is gone.
#[derive(Clone)]
pub struct Publisher {
    sink: Weak<dyn RoutingSink>,
}

impl Publisher {
    pub fn new(sink: Weak<dyn RoutingSink>) -> Self {
        Self { sink }
    }

    pub fn publish(&self, event: Event) -> Result<(), HandlerError> {
        match self.sink.upgrade() {
            Some(sink) => {
                sink.route_event(event);
                Ok(())
            }
            None => Err(HandlerError::Publish("broker is closed".to_string())),
        }
    }

    /// A publisher wired to nothing; every publish fails.
    pub fn detached() -> Self {
        struct NullSink;
        impl RoutingSink for NullSink {
            fn route_event(&self, _event: Event) {}
        }
        Self {
            sink: Weak::<NullSink>::new(),
        }
    }
}

/// Errors a handler body may surface to the pipeline
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("state error: {0}")]
    State(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A subscriber body.
///
/// Returned events pass the handler's output middleware and are then routed
/// in emission order. The [`Publisher`] allows mid-body publishes that enter
/// the same routing pipeline immediately (bypassing output middleware).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event, publisher: Publisher)
        -> Result<Vec<Event>, HandlerError>;
}

/// Shared, dynamically dispatched handler.
pub type DynHandler = Arc<dyn EventHandler>;

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event, Publisher) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Event>, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        event: Event,
        publisher: Publisher,
    ) -> Result<Vec<Event>, HandlerError> {
        (self.0)(event, publisher).await
    }
}

/// Wrap an async closure as a [`DynHandler`].
pub fn handler_fn<F, Fut>(f: F) -> DynHandler
where
    F: Fn(Event, Publisher) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Event>, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
