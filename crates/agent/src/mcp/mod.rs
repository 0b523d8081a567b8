// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MCP client adapter
//!
//! The connected server's advertised tools join the agent's catalog each
//! turn; call failures are re-materialized as error tool results rather
//! than failing the workflow.

use async_trait::async_trait;
use thiserror::Error;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeMcpAdapter;

/// Errors from the MCP client
#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("mcp tool failed: {0}")]
    Failed(String),
    #[error("mcp server disconnected")]
    Disconnected,
}

/// A tool advertised by the connected server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Client seam injected by the caller.
#[async_trait]
pub trait McpAdapter: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError>;
    async fn call_tool(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, McpError>;
}
