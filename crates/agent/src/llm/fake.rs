// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake LLM adapter for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{ContentBlock, LlmAdapter, LlmError, LlmRequest, LlmResponse, StopReason};
use crate::context::TokenUsage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct FakeState {
    turns: VecDeque<Result<LlmResponse, LlmError>>,
    requests: Vec<LlmRequest>,
}

/// Scripted LLM: turns are consumed front-to-back and every request is
/// recorded for assertions.
#[derive(Clone)]
pub struct FakeLlmAdapter {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeLlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLlmAdapter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                turns: VecDeque::new(),
                requests: Vec::new(),
            })),
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            prompt: 10,
            completion: 5,
        }
    }

    /// Queue a plain-text final turn.
    pub fn push_text(&self, text: impl Into<String>) {
        self.inner.lock().turns.push_back(Ok(LlmResponse {
            content: vec![ContentBlock::Text { text: text.into() }],
            usage: Self::usage(),
            stop_reason: StopReason::EndTurn,
        }));
    }

    /// Queue a turn of tool calls `(tool_use_id, name, input)`.
    pub fn push_tool_calls(&self, calls: Vec<(&str, &str, serde_json::Value)>) {
        let content = calls
            .into_iter()
            .map(|(tool_use_id, name, input)| ContentBlock::ToolUse {
                tool_use_id: tool_use_id.to_string(),
                name: name.to_string(),
                input,
            })
            .collect();
        self.inner.lock().turns.push_back(Ok(LlmResponse {
            content,
            usage: Self::usage(),
            stop_reason: StopReason::ToolUse,
        }));
    }

    /// Queue an arbitrary response.
    pub fn push_response(&self, response: LlmResponse) {
        self.inner.lock().turns.push_back(Ok(response));
    }

    /// Queue a provider failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.inner
            .lock()
            .turns
            .push_back(Err(LlmError::Provider(message.into())));
    }

    /// All requests seen so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.inner.lock().requests.clone()
    }

    pub fn remaining_turns(&self) -> usize {
        self.inner.lock().turns.len()
    }
}

#[async_trait]
impl LlmAdapter for FakeLlmAdapter {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut state = self.inner.lock();
        state.requests.push(request);
        state
            .turns
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Provider("fake llm script exhausted".to_string())))
    }
}
