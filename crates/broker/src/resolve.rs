// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolve mode: inject an event, wait for quiescence, collect the answer

use crate::broker::{BrokerError, EventBroker, ResolveCapture};
use arvo_core::Event;

/// What a resolve run observed.
#[derive(Debug)]
pub struct ResolveOutcome {
    /// First event addressed back to the injected event's source (or a
    /// terminal event), if any handler produced one before quiescence.
    pub output: Option<Event>,
    /// Every event that carried a non-empty `domain`, in observation order.
    pub domained: Vec<Event>,
}

impl EventBroker {
    /// Inject `event`, wait for the broker to go idle, and return the first
    /// event addressed to the caller plus any domained events observed.
    ///
    /// The injected event's `source` must not collide with a registered
    /// topic: a caller that is also a handler would capture its own traffic.
    pub async fn resolve(&self, event: Event) -> Result<ResolveOutcome, BrokerError> {
        if self.inner.has_topic(&event.source) {
            return Err(BrokerError::ResolveSourceCollision(event.source));
        }
        {
            let mut capture = self.inner.capture.lock();
            if capture.is_some() {
                return Err(BrokerError::ResolveBusy);
            }
            *capture = Some(ResolveCapture {
                source: event.source.clone(),
                output: None,
                domained: Vec::new(),
            });
        }

        let run = async {
            self.publish(event)?;
            self.wait_for_idle().await
        }
        .await;

        let capture = self.inner.capture.lock().take();
        run?;
        let capture = capture.unwrap_or(ResolveCapture {
            source: String::new(),
            output: None,
            domained: Vec::new(),
        });
        Ok(ResolveOutcome {
            output: capture.output,
            domained: capture.domained,
        })
    }
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;
