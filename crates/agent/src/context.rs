// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable context document of an agent workflow instance

use arvo_core::Subject;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Prompt/completion token tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Typed message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    /// Image or file payload carried inline as base64.
    Media {
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        data: String,
    },
    ToolUse {
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
    },
}

/// One conversation entry.
///
/// `seen_count` is incremented every time the message has been presented
/// to the LLM; integrations may substitute a placeholder for large media
/// payloads once it is non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(flatten)]
    pub content: MessageContent,
    #[serde(default)]
    pub seen_count: u32,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text { text: text.into() },
            seen_count: 0,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text { text: text.into() },
            seen_count: 0,
        }
    }

    pub fn tool_use(
        tool_use_id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolUse {
                tool_use_id: tool_use_id.into(),
                name: name.into(),
                input,
            },
            seen_count: 0,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::ToolResult {
                tool_use_id: tool_use_id.into(),
                content,
            },
            seen_count: 0,
        }
    }
}

/// An outstanding service call awaiting its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitedCall {
    /// Event type of the request, used to flatten replies appropriately.
    pub call_type: String,
    /// The reply payload once it has arrived.
    pub data: Option<serde_json::Value>,
}

/// Turns spent / turns allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionBudget {
    pub current: u32,
    pub max: u32,
}

/// The agent loop's durable state (the payload inside machine memory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub current_subject: Subject,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tool_interactions: InteractionBudget,
    /// Keyed by tool-use id, in request order.
    pub awaiting_tool_calls: IndexMap<String, AwaitedCall>,
    pub total_execution_units: u64,
    pub total_token_usage: TokenUsage,
    /// Authorization context inherited from the init event and propagated
    /// to every event this instance emits.
    pub init_event_access_control: Option<String>,
}

impl AgentContext {
    pub fn new(
        current_subject: Subject,
        system: Option<String>,
        messages: Vec<Message>,
        max_tool_interactions: u32,
        init_event_access_control: Option<String>,
    ) -> Self {
        Self {
            current_subject,
            system,
            messages,
            tool_interactions: InteractionBudget {
                current: 0,
                max: max_tool_interactions,
            },
            awaiting_tool_calls: IndexMap::new(),
            total_execution_units: 0,
            total_token_usage: TokenUsage::default(),
            init_event_access_control,
        }
    }

    /// Every message has been presented once more.
    pub fn mark_all_seen(&mut self) {
        for message in &mut self.messages {
            message.seen_count += 1;
        }
    }

    /// Record a service reply against its request id. Returns false when no
    /// call with that id is awaited.
    pub fn record_reply(&mut self, request_id: &str, data: serde_json::Value) -> bool {
        match self.awaiting_tool_calls.get_mut(request_id) {
            Some(call) => {
                call.data = Some(data);
                true
            }
            None => false,
        }
    }

    /// All awaited calls have replies.
    pub fn awaiting_complete(&self) -> bool {
        self.awaiting_tool_calls.values().all(|call| call.data.is_some())
    }

    /// Remove and return the awaited calls in request (insertion) order.
    pub fn drain_awaited(&mut self) -> Vec<(String, AwaitedCall)> {
        self.awaiting_tool_calls.drain(..).collect()
    }

    /// The message list as presented to the LLM: media already seen once is
    /// replaced by a short placeholder to save tokens.
    pub fn presentation_view(&self) -> Vec<Message> {
        self.messages
            .iter()
            .map(|message| match &message.content {
                MessageContent::Media { media_type, name, .. } if message.seen_count > 0 => {
                    Message {
                        role: message.role,
                        content: MessageContent::Text {
                            text: format!(
                                "[{} {} omitted after first presentation]",
                                media_type,
                                name.as_deref().unwrap_or("attachment")
                            ),
                        },
                        seen_count: message.seen_count,
                    }
                }
                _ => message.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
