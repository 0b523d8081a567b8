// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent orchestration loop
//!
//! A resumable handler that interleaves synchronous tool calls (internal,
//! MCP) with asynchronous service calls (`arvo`), suspending whenever a
//! reply has to travel through the broker. Tool batching is priority
//! based; a permission manager can gate execution; output validation
//! failures feed back as self-correction turns.

use crate::context::{AgentContext, AwaitedCall, Message};
use crate::llm::{ContentBlock, LlmAdapter, LlmRequest};
use crate::mcp::McpAdapter;
use crate::permission::{PermissionManager, PermissionState};
use crate::resumable::{OutputDraft, ResumableHandler, ServiceRequest, Step, Trigger};
use crate::stream::{emit, AgentStreamEvent, AgentStreamEventKind, AgentStreamListener, StreamMeta};
use crate::tools::{
    split_priority_batch, InternalTool, ServerConfig, ToolCallRequest, ToolCatalog, ToolDefinition,
    ToolServerKind,
};
use arvo_broker::HandlerError;
use arvo_core::{Event, ServiceContract, Subject, PARENT_SUBJECT_KEY};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Prepended to the system prompt on the budget's final turn, giving the
/// LLM one chance to synthesize from partial data before failure.
pub const TOOL_LIMIT_INSTRUCTION: &str = "Tool interaction limit reached: this is your final \
turn. Do not request any more tools; produce the best final answer you can from the \
information gathered so far.";

/// A distributed service exposed to the LLM as an `arvo` tool.
#[derive(Clone)]
pub struct ServiceToolConfig {
    pub name: String,
    pub description: String,
    pub contract: Arc<ServiceContract>,
    /// Destination handler of the service event.
    pub to: String,
    pub domain: Option<String>,
    pub priority: i32,
    pub execution_units: u64,
}

impl ServiceToolConfig {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.contract.accepts_schema().clone(),
            server: ServerConfig {
                kind: ToolServerKind::Arvo {
                    contract: Arc::clone(&self.contract),
                    to: self.to.clone(),
                    domain: self.domain.clone(),
                    execution_units: self.execution_units,
                },
                priority: self.priority,
            },
        }
    }
}

/// Version-specific context builder: derives the system prompt and initial
/// messages from the typed init event.
pub trait ContextSeed: Send + Sync {
    fn build(&self, input: &Event) -> Result<(Option<String>, Vec<Message>), HandlerError>;
}

/// Default seed: `data.message` becomes the first user message.
pub struct MessageContextSeed {
    pub system: Option<String>,
}

impl ContextSeed for MessageContextSeed {
    fn build(&self, input: &Event) -> Result<(Option<String>, Vec<Message>), HandlerError> {
        let text = input
            .data
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::failed("init event data has no 'message' field"))?;
        Ok((self.system.clone(), vec![Message::user_text(text)]))
    }
}

/// Verdict of the version-specific output builder.
pub enum OutputVerdict {
    Data(Value),
    /// Fed back to the LLM as a user message; the loop re-enters in
    /// self-correction.
    Error(String),
}

pub trait OutputBuilder: Send + Sync {
    fn build(&self, content: &[ContentBlock]) -> OutputVerdict;
}

/// Default builder: concatenated text blocks as `{content}`.
pub struct TextOutputBuilder;

impl OutputBuilder for TextOutputBuilder {
    fn build(&self, content: &[ContentBlock]) -> OutputVerdict {
        let text: Vec<&str> = content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolUse { .. } => None,
            })
            .collect();
        if text.is_empty() {
            OutputVerdict::Error("final response contained no text content".to_string())
        } else {
            OutputVerdict::Data(json!({ "content": text.join("\n") }))
        }
    }
}

/// Static shape of one agent.
pub struct AgentDefinition {
    /// Handler identity: subscription topic and emitted-event source.
    pub source: String,
    /// Event type of the completion event.
    pub completion_event_type: String,
    pub max_tool_interactions: u32,
    pub services: Vec<ServiceToolConfig>,
    pub internal_tools: Vec<Arc<dyn InternalTool>>,
}

/// The agent loop as a resumable handler (C8).
pub struct AgentHandler {
    definition: AgentDefinition,
    llm: Arc<dyn LlmAdapter>,
    mcp: Option<Arc<dyn McpAdapter>>,
    permissions: Option<Arc<dyn PermissionManager>>,
    context_seed: Arc<dyn ContextSeed>,
    output_builder: Arc<dyn OutputBuilder>,
    stream: Option<AgentStreamListener>,
}

impl AgentHandler {
    pub fn new(definition: AgentDefinition, llm: Arc<dyn LlmAdapter>) -> Self {
        Self {
            definition,
            llm,
            mcp: None,
            permissions: None,
            context_seed: Arc::new(MessageContextSeed { system: None }),
            output_builder: Arc::new(TextOutputBuilder),
            stream: None,
        }
    }

    pub fn with_mcp(mut self, mcp: Arc<dyn McpAdapter>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_context_seed(mut self, seed: Arc<dyn ContextSeed>) -> Self {
        self.context_seed = seed;
        self
    }

    pub fn with_output_builder(mut self, builder: Arc<dyn OutputBuilder>) -> Self {
        self.output_builder = builder;
        self
    }

    pub fn with_stream(mut self, listener: AgentStreamListener) -> Self {
        self.stream = Some(listener);
        self
    }

    fn meta(&self, context: &AgentContext) -> StreamMeta {
        StreamMeta {
            source: self.definition.source.clone(),
            subject: context.current_subject.clone(),
            turn: context.tool_interactions.current,
        }
    }

    fn emit_stream(
        &self,
        context: &AgentContext,
        kind: AgentStreamEventKind,
        data: Value,
        usage: Option<crate::context::TokenUsage>,
    ) {
        emit(
            &self.stream,
            AgentStreamEvent {
                kind,
                data,
                usage,
                execution_units: Some(context.total_execution_units),
            },
            &self.meta(context),
        );
    }

    /// Per-turn catalog: configured service contracts, the MCP server's
    /// advertised tools, and the declared internal tools.
    async fn build_catalog(&self) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        for service in &self.definition.services {
            catalog.insert(service.definition());
        }
        if let Some(mcp) = &self.mcp {
            match mcp.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        catalog.insert(ToolDefinition {
                            name: tool.name,
                            description: tool.description,
                            input_schema: tool.input_schema,
                            server: ServerConfig {
                                kind: ToolServerKind::Mcp,
                                priority: 0,
                            },
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "mcp tool listing failed, continuing without");
                }
            }
        }
        for tool in &self.definition.internal_tools {
            catalog.insert_internal(Arc::clone(tool));
        }
        catalog
    }

    /// One LLM round plus tool execution. Returns either the next step to
    /// take or `None` to loop again.
    async fn cognitive_loop(
        &self,
        mut context: AgentContext,
    ) -> Result<Step<AgentContext>, HandlerError> {
        loop {
            if context.tool_interactions.current >= context.tool_interactions.max {
                return Err(HandlerError::failed(format!(
                    "tool interaction budget of {} exhausted without output",
                    context.tool_interactions.max
                )));
            }
            let final_turn =
                context.tool_interactions.current + 1 == context.tool_interactions.max;

            let catalog = self.build_catalog().await;
            let system = match (&context.system, final_turn) {
                (Some(system), true) => Some(format!("{TOOL_LIMIT_INSTRUCTION}\n\n{system}")),
                (None, true) => Some(TOOL_LIMIT_INSTRUCTION.to_string()),
                (system, false) => system.clone(),
            };
            let request = LlmRequest {
                system,
                messages: context.presentation_view(),
                tools: catalog.specs(),
            };
            let response = self
                .llm
                .complete(request)
                .await
                .map_err(|e| HandlerError::failed(e.to_string()))?;

            context.mark_all_seen();
            context.tool_interactions.current += 1;
            context.total_token_usage.add(response.usage);

            let mut requests: Vec<ToolCallRequest> = Vec::new();
            for block in &response.content {
                match block {
                    ContentBlock::Text { text } => {
                        self.emit_stream(
                            &context,
                            AgentStreamEventKind::LlmDeltaText,
                            json!({ "text": text }),
                            Some(response.usage),
                        );
                        context.messages.push(Message::assistant_text(text.clone()));
                    }
                    ContentBlock::ToolUse {
                        tool_use_id,
                        name,
                        input,
                    } => {
                        self.emit_stream(
                            &context,
                            AgentStreamEventKind::LlmDeltaTool,
                            json!({ "tool_use_id": tool_use_id, "name": name }),
                            Some(response.usage),
                        );
                        context.messages.push(Message::tool_use(
                            tool_use_id.clone(),
                            name.clone(),
                            input.clone(),
                        ));
                        requests.push(ToolCallRequest {
                            tool_use_id: tool_use_id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        });
                    }
                }
            }

            if requests.is_empty() {
                self.emit_stream(
                    &context,
                    AgentStreamEventKind::OutputFinalization,
                    Value::Null,
                    Some(response.usage),
                );
                match self.output_builder.build(&response.content) {
                    OutputVerdict::Data(data) => {
                        self.emit_stream(
                            &context,
                            AgentStreamEventKind::Output,
                            data.clone(),
                            Some(context.total_token_usage),
                        );
                        return Ok(Step::Complete {
                            output: OutputDraft {
                                event_type: self.definition.completion_event_type.clone(),
                                data,
                                execution_units: context.total_execution_units,
                            },
                            context,
                        });
                    }
                    OutputVerdict::Error(error) => {
                        self.emit_stream(
                            &context,
                            AgentStreamEventKind::SelfCorrection,
                            json!({ "error": error }),
                            None,
                        );
                        context.messages.push(Message::user_text(format!(
                            "Your previous response was invalid: {error}. Correct it."
                        )));
                        continue;
                    }
                }
            }

            // Priority batching: only the highest-priority group executes;
            // the rest is silently discarded (surfaced to observers only).
            let batch = split_priority_batch(requests, &catalog);
            self.emit_stream(
                &context,
                AgentStreamEventKind::ToolRequest,
                json!({
                    "kept": batch.kept.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
                    "dropped": batch.dropped.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
                }),
                None,
            );

            let mut executable = batch.kept;
            let mut services: Vec<ServiceRequest> = Vec::new();

            if let Some(manager) = &self.permissions {
                let candidates: Vec<&ToolDefinition> = executable
                    .iter()
                    .filter_map(|request| catalog.definition(&request.name))
                    .collect();
                let decisions = manager.get(&context, &candidates);
                let state_of = |name: &str| {
                    decisions
                        .iter()
                        .find(|decision| decision.tool == name)
                        .map(|decision| decision.state)
                        .unwrap_or(PermissionState::Granted)
                };

                let mut requestable_names: Vec<String> = Vec::new();
                let mut gated: Vec<ToolCallRequest> = Vec::new();
                for request in executable {
                    match state_of(&request.name) {
                        PermissionState::Granted => gated.push(request),
                        PermissionState::Denied => {
                            self.emit_stream(
                                &context,
                                AgentStreamEventKind::ToolPermissionBlocked,
                                json!({ "tool": request.name }),
                                None,
                            );
                            context.messages.push(Message::tool_result(
                                request.tool_use_id,
                                error_result(&request.name, "permission denied"),
                            ));
                        }
                        PermissionState::Requestable => {
                            self.emit_stream(
                                &context,
                                AgentStreamEventKind::ToolPermissionRequested,
                                json!({ "tool": request.name }),
                                None,
                            );
                            context.messages.push(Message::tool_result(
                                request.tool_use_id,
                                error_result(
                                    &request.name,
                                    "permission not yet granted; requested",
                                ),
                            ));
                            if !requestable_names.contains(&request.name) {
                                requestable_names.push(request.name);
                            }
                        }
                    }
                }
                executable = gated;

                if !requestable_names.is_empty() {
                    let requestable_defs: Vec<&ToolDefinition> = requestable_names
                        .iter()
                        .filter_map(|name| catalog.definition(name))
                        .collect();
                    let contract = manager.contract();
                    let data = manager.request_data(&requestable_defs);
                    // Deduplicated by a fresh id per request event.
                    let request_id = uuid::Uuid::new_v4().to_string();
                    context.awaiting_tool_calls.insert(
                        request_id.clone(),
                        AwaitedCall {
                            call_type: contract.accepts_type().to_string(),
                            data: None,
                        },
                    );
                    services.push(ServiceRequest {
                        id: request_id,
                        event_type: contract.accepts_type().to_string(),
                        to: manager.to().to_string(),
                        data,
                        domain: manager.domain().map(str::to_string),
                        execution_units: 0,
                        subject: None,
                    });
                }
            }

            for request in executable {
                let Some(entry) = catalog.entry(&request.name) else {
                    context.messages.push(Message::tool_result(
                        request.tool_use_id,
                        error_result(&request.name, "unknown tool"),
                    ));
                    continue;
                };
                match &entry.definition.server.kind {
                    ToolServerKind::Internal => {
                        let outcome = match &entry.internal {
                            Some(tool) => tool.run(request.input.clone()).await,
                            None => Err(crate::tools::ToolError::new("internal tool has no body")),
                        };
                        let content = match outcome {
                            Ok(value) => value,
                            Err(err) => error_result(&request.name, &err.to_string()),
                        };
                        context
                            .messages
                            .push(Message::tool_result(request.tool_use_id, content));
                    }
                    ToolServerKind::Mcp => {
                        let content = match &self.mcp {
                            Some(mcp) => {
                                match mcp.call_tool(&request.name, request.input.clone()).await {
                                    Ok(value) => value,
                                    Err(err) => error_result(&request.name, &err.to_string()),
                                }
                            }
                            None => error_result(&request.name, "no mcp client connected"),
                        };
                        context
                            .messages
                            .push(Message::tool_result(request.tool_use_id, content));
                    }
                    ToolServerKind::Arvo {
                        contract,
                        to,
                        domain,
                        execution_units,
                    } => {
                        let delegation = request
                            .input
                            .get(PARENT_SUBJECT_KEY)
                            .is_some_and(|value| !value.is_null());
                        match contract.validate_accepts(&request.input) {
                            Ok(mut data) => {
                                let child_subject = if delegation {
                                    if let Some(map) = data.as_object_mut() {
                                        map.insert(
                                            PARENT_SUBJECT_KEY.to_string(),
                                            json!(context.current_subject.as_str()),
                                        );
                                    }
                                    self.emit_stream(
                                        &context,
                                        AgentStreamEventKind::ToolRequestDelegation,
                                        json!({ "tool": request.name }),
                                        None,
                                    );
                                    Some(Subject::random())
                                } else {
                                    None
                                };
                                context.awaiting_tool_calls.insert(
                                    request.tool_use_id.clone(),
                                    AwaitedCall {
                                        call_type: contract.accepts_type().to_string(),
                                        data: None,
                                    },
                                );
                                context.total_execution_units += execution_units;
                                services.push(ServiceRequest {
                                    id: request.tool_use_id,
                                    event_type: contract.accepts_type().to_string(),
                                    to: to.clone(),
                                    data,
                                    domain: domain.clone(),
                                    execution_units: *execution_units,
                                    subject: child_subject,
                                });
                            }
                            Err(err) => {
                                // Schema failure is recoverable: tell the
                                // LLM and keep going without emitting.
                                context.messages.push(Message::tool_result(
                                    request.tool_use_id,
                                    error_result(&request.name, &err.to_string()),
                                ));
                            }
                        }
                    }
                }
            }

            if !services.is_empty() {
                return Ok(Step::Suspend { context, services });
            }
        }
    }
}

fn error_result(name: &str, message: &str) -> Value {
    json!({ "type": "error", "name": name, "message": message })
}

#[async_trait]
impl ResumableHandler for AgentHandler {
    type Context = AgentContext;

    fn source(&self) -> &str {
        &self.definition.source
    }

    async fn step(
        &self,
        trigger: Trigger<AgentContext>,
    ) -> Result<Step<AgentContext>, HandlerError> {
        match (trigger.input, trigger.context, trigger.service) {
            // Init: derive system and messages from the typed input event.
            (Some(input), None, _) => {
                let (system, messages) = self.context_seed.build(&input)?;
                let context = AgentContext::new(
                    trigger.subject,
                    system,
                    messages,
                    self.definition.max_tool_interactions,
                    input.access_control.clone(),
                );
                self.emit_stream(
                    &context,
                    AgentStreamEventKind::Init,
                    json!({ "event_id": input.id.as_str(), "type": input.event_type }),
                    None,
                );
                self.cognitive_loop(context).await
            }
            // Resume: a service reply arrived.
            (None, Some(mut context), Some(service)) => {
                let parent_id = service
                    .parent_id
                    .as_ref()
                    .ok_or_else(|| HandlerError::failed("service reply carries no parentid"))?;

                if let Some(manager) = &self.permissions {
                    if manager.contract().emits(&service.event_type) {
                        manager.set(&service.data);
                    }
                }

                if !context.record_reply(parent_id.as_str(), service.data.clone()) {
                    tracing::warn!(
                        parent_id = %parent_id,
                        "service reply does not match any awaited call"
                    );
                }
                if !context.awaiting_complete() {
                    return Ok(Step::Pending { context });
                }

                // All awaited replies arrived: flatten them into the log in
                // request order, permission updates as plain user messages.
                let permission_type = self
                    .permissions
                    .as_ref()
                    .map(|manager| manager.contract().accepts_type().to_string());
                for (id, call) in context.drain_awaited() {
                    let data = call.data.unwrap_or(Value::Null);
                    if Some(&call.call_type) == permission_type.as_ref() {
                        context.messages.push(Message::user_text(format!(
                            "Permission update: {data}"
                        )));
                    } else {
                        context.messages.push(Message::tool_result(id, data));
                    }
                }
                self.emit_stream(
                    &context,
                    AgentStreamEventKind::Resume,
                    json!({ "reply_type": service.event_type }),
                    None,
                );
                self.cognitive_loop(context).await
            }
            _ => Err(HandlerError::failed(
                "unexpected invocation: neither init input nor stored context",
            )),
        }
    }
}

#[cfg(test)]
#[path = "agent_loop_tests.rs"]
mod tests;
