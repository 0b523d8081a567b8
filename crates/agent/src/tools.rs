// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool definitions, the per-turn catalog, and priority batching

use crate::llm::ToolSpec;
use arvo_core::ServiceContract;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

/// Error from an internal tool body
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Execution strategy of a tool, tagged by `kind`.
#[derive(Clone)]
pub enum ToolServerKind {
    /// Distributed event-driven service: the call suspends the workflow.
    Arvo {
        contract: Arc<ServiceContract>,
        /// Destination handler for the service event.
        to: String,
        /// Domain hint carried on the emitted event.
        domain: Option<String>,
        execution_units: u64,
    },
    /// External tool via the MCP client; awaited inline.
    Mcp,
    /// In-process function; awaited inline.
    Internal,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub kind: ToolServerKind,
    /// Only the highest-priority group of a turn's calls executes.
    pub priority: i32,
}

/// An addressable capability the agent may invoke.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub server: ServerConfig,
}

impl ToolDefinition {
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// In-process tool implementation.
#[async_trait]
pub trait InternalTool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;
    async fn run(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// A tool call extracted from an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One catalog entry: the definition plus the runner for internal tools.
#[derive(Clone)]
pub struct ToolCatalogEntry {
    pub definition: ToolDefinition,
    pub internal: Option<Arc<dyn InternalTool>>,
}

/// Name-addressed tool catalog, rebuilt per turn and never shared mutably
/// across turns.
#[derive(Default)]
pub struct ToolCatalog {
    entries: IndexMap<String, ToolCatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: ToolDefinition) {
        self.entries.insert(
            definition.name.clone(),
            ToolCatalogEntry {
                definition,
                internal: None,
            },
        );
    }

    pub fn insert_internal(&mut self, tool: Arc<dyn InternalTool>) {
        let definition = tool.definition().clone();
        self.entries.insert(
            definition.name.clone(),
            ToolCatalogEntry {
                definition,
                internal: Some(tool),
            },
        );
    }

    pub fn entry(&self, name: &str) -> Option<&ToolCatalogEntry> {
        self.entries.get(name)
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.entries.get(name).map(|entry| &entry.definition)
    }

    pub fn priority(&self, name: &str) -> i32 {
        self.definition(name)
            .map(|definition| definition.server.priority)
            .unwrap_or(0)
    }

    /// What the LLM sees this turn.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.entries
            .values()
            .map(|entry| entry.definition.spec())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The result of priority batching: the highest-priority group survives,
/// everything else is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityBatch {
    pub kept: Vec<ToolCallRequest>,
    pub dropped: Vec<ToolCallRequest>,
}

/// Keep only the calls whose tool has the turn's highest declared priority.
/// Order within the kept group is the LLM's emission order.
pub fn split_priority_batch(
    requests: Vec<ToolCallRequest>,
    catalog: &ToolCatalog,
) -> PriorityBatch {
    let top = requests
        .iter()
        .map(|request| catalog.priority(&request.name))
        .max()
        .unwrap_or(0);
    let (kept, dropped) = requests
        .into_iter()
        .partition(|request| catalog.priority(&request.name) == top);
    PriorityBatch { kept, dropped }
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
