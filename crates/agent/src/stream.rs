// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-band observer for agent structural events
//!
//! Listeners observe; they never participate. A missing listener changes
//! nothing, and whatever a listener does with the event cannot affect the
//! loop.

use crate::context::TokenUsage;
use arvo_core::Subject;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStreamEventKind {
    Init,
    Resume,
    SelfCorrection,
    ToolRequest,
    ToolRequestDelegation,
    ToolPermissionBlocked,
    ToolPermissionRequested,
    OutputFinalization,
    Output,
    LlmDelta,
    LlmDeltaText,
    LlmDeltaTool,
}

impl AgentStreamEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "agent.init",
            Self::Resume => "agent.resume",
            Self::SelfCorrection => "agent.self.correction",
            Self::ToolRequest => "agent.tool.request",
            Self::ToolRequestDelegation => "agent.tool.request.delegation",
            Self::ToolPermissionBlocked => "agent.tool.permission.blocked",
            Self::ToolPermissionRequested => "agent.tool.permission.requested",
            Self::OutputFinalization => "agent.output.finalization",
            Self::Output => "agent.output",
            Self::LlmDelta => "agent.llm.delta",
            Self::LlmDeltaText => "agent.llm.delta.text",
            Self::LlmDeltaTool => "agent.llm.delta.tool",
        }
    }
}

/// A tagged structural event with its counters.
#[derive(Debug, Clone)]
pub struct AgentStreamEvent {
    pub kind: AgentStreamEventKind,
    pub data: serde_json::Value,
    pub usage: Option<TokenUsage>,
    pub execution_units: Option<u64>,
}

/// Where in the workflow the event was observed.
#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub source: String,
    pub subject: Subject,
    /// Tool-interaction turn counter at emission time.
    pub turn: u32,
}

pub type AgentStreamListener = Arc<dyn Fn(&AgentStreamEvent, &StreamMeta) + Send + Sync>;

/// Invoke the listener if present, logging instead when absent.
pub(crate) fn emit(
    listener: &Option<AgentStreamListener>,
    event: AgentStreamEvent,
    meta: &StreamMeta,
) {
    tracing::trace!(
        kind = event.kind.as_str(),
        subject = %meta.subject,
        turn = meta.turn,
        "agent stream event"
    );
    if let Some(listener) = listener {
        listener(&event, meta);
    }
}
