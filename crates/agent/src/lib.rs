// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! arvo-agent: resumable handlers and the agent orchestration loop
//!
//! The resumable-handler runner turns any step function into a broker
//! handler that persists its context in machine memory between events. The
//! agent loop is the flagship step function: it interleaves synchronous
//! tool calls with asynchronous service calls, suspending whenever a reply
//! has to travel through the broker.

mod agent_loop;
mod context;
pub mod llm;
pub mod mcp;
mod permission;
mod resumable;
mod stream;
mod tools;

pub use agent_loop::{
    AgentDefinition, AgentHandler, ContextSeed, MessageContextSeed, OutputBuilder, OutputVerdict,
    ServiceToolConfig, TextOutputBuilder, TOOL_LIMIT_INSTRUCTION,
};
pub use context::{
    AgentContext, AwaitedCall, InteractionBudget, Message, MessageContent, Role, TokenUsage,
};
pub use llm::{ContentBlock, LlmAdapter, LlmError, LlmRequest, LlmResponse, StopReason, ToolSpec};
pub use mcp::{McpAdapter, McpError, McpTool};
pub use permission::{
    permission_contract, PermissionDecision, PermissionManager, PermissionState,
    PolicyPermissionManager, PERMISSION_REQUEST_TYPE, PERMISSION_RESPONSE_TYPE,
};
pub use resumable::{
    MachineExecutor, OutputDraft, ResumableHandler, ServiceRequest, Step, Trigger,
};
pub use stream::{AgentStreamEvent, AgentStreamEventKind, AgentStreamListener, StreamMeta};
pub use tools::{
    split_priority_batch, InternalTool, PriorityBatch, ToolCallRequest, ToolCatalog,
    ToolCatalogEntry, ToolDefinition, ToolError, ToolServerKind, ServerConfig,
};
