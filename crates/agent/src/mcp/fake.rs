// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake MCP adapter for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{McpAdapter, McpError, McpTool};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct FakeState {
    tools: Vec<McpTool>,
    responses: HashMap<String, Result<serde_json::Value, McpError>>,
    calls: Vec<(String, serde_json::Value)>,
}

/// Fake MCP client: advertised tools and canned responses are set up
/// front, calls are recorded.
#[derive(Clone)]
pub struct FakeMcpAdapter {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeMcpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMcpAdapter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                tools: Vec::new(),
                responses: HashMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn advertise(&self, tool: McpTool) {
        self.inner.lock().tools.push(tool);
    }

    pub fn respond_with(&self, name: &str, response: serde_json::Value) {
        self.inner
            .lock()
            .responses
            .insert(name.to_string(), Ok(response));
    }

    pub fn fail_with(&self, name: &str, error: McpError) {
        self.inner.lock().responses.insert(name.to_string(), Err(error));
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.inner.lock().calls.clone()
    }
}

#[async_trait]
impl McpAdapter for FakeMcpAdapter {
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        Ok(self.inner.lock().tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let mut state = self.inner.lock();
        state.calls.push((name.to_string(), input));
        match state.responses.get(name) {
            Some(result) => result.clone(),
            None => Err(McpError::Failed(format!("no canned response for '{name}'"))),
        }
    }
}
