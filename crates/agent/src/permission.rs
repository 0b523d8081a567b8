// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Permission gating for tool execution

use crate::context::AgentContext;
use crate::tools::ToolDefinition;
use arvo_core::{ContractError, ServiceContract};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const PERMISSION_REQUEST_TYPE: &str = "arvo.default.simple.permission.request";
pub const PERMISSION_RESPONSE_TYPE: &str = "arvo.default.simple.permission.response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not yet decided; the loop emits a permission request and suspends.
    Requestable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub tool: String,
    pub state: PermissionState,
}

/// Authorization gate consulted before tool execution.
///
/// Keyed by full tool definitions rather than bare names so policies can
/// discriminate on the server kind or schema.
pub trait PermissionManager: Send + Sync {
    /// Decide for each candidate tool of this turn.
    fn get(&self, context: &AgentContext, tools: &[&ToolDefinition]) -> Vec<PermissionDecision>;

    /// Feed a permission reply (`{granted: [...], denied: [...]}`) back
    /// into the authorization map.
    fn set(&self, reply: &Value);

    /// Payload for the permission-request event covering `requestable`.
    fn request_data(&self, requestable: &[&ToolDefinition]) -> Value;

    /// The contract the request event is emitted against.
    fn contract(&self) -> Arc<ServiceContract>;

    /// Destination handler for permission requests.
    fn to(&self) -> &str;

    /// Domain hint for permission requests (e.g. a human-approval surface).
    fn domain(&self) -> Option<&str>;
}

/// The default permission contract: request carries tool names, the reply
/// splits them into granted and denied.
pub fn permission_contract() -> Result<Arc<ServiceContract>, ContractError> {
    Ok(Arc::new(ServiceContract::new(
        "arvo.default.simple.permission",
        PERMISSION_REQUEST_TYPE,
        json!({
            "type": "object",
            "properties": {
                "tools": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["tools"]
        }),
        [(
            PERMISSION_RESPONSE_TYPE.to_string(),
            json!({
                "type": "object",
                "properties": {
                    "granted": {"type": "array", "items": {"type": "string"}},
                    "denied": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["granted", "denied"]
            }),
        )],
    )?))
}

/// Static-policy manager: tools on the approval list are `Requestable`
/// until a reply grants or denies them; everything else is granted.
pub struct PolicyPermissionManager {
    requires_approval: HashSet<String>,
    decisions: Mutex<HashMap<String, PermissionState>>,
    contract: Arc<ServiceContract>,
    to: String,
    domain: Option<String>,
}

impl PolicyPermissionManager {
    pub fn new(
        requires_approval: impl IntoIterator<Item = String>,
        contract: Arc<ServiceContract>,
        to: impl Into<String>,
        domain: Option<String>,
    ) -> Self {
        Self {
            requires_approval: requires_approval.into_iter().collect(),
            decisions: Mutex::new(HashMap::new()),
            contract,
            to: to.into(),
            domain,
        }
    }
}

impl PermissionManager for PolicyPermissionManager {
    fn get(&self, _context: &AgentContext, tools: &[&ToolDefinition]) -> Vec<PermissionDecision> {
        let decisions = self.decisions.lock();
        tools
            .iter()
            .map(|tool| {
                let state = if !self.requires_approval.contains(&tool.name) {
                    PermissionState::Granted
                } else {
                    decisions
                        .get(&tool.name)
                        .copied()
                        .unwrap_or(PermissionState::Requestable)
                };
                PermissionDecision {
                    tool: tool.name.clone(),
                    state,
                }
            })
            .collect()
    }

    fn set(&self, reply: &Value) {
        let mut decisions = self.decisions.lock();
        for name in string_list(reply, "granted") {
            decisions.insert(name, PermissionState::Granted);
        }
        for name in string_list(reply, "denied") {
            decisions.insert(name, PermissionState::Denied);
        }
    }

    fn request_data(&self, requestable: &[&ToolDefinition]) -> Value {
        let tools: Vec<&str> = requestable.iter().map(|tool| tool.name.as_str()).collect();
        json!({ "tools": tools })
    }

    fn contract(&self) -> Arc<ServiceContract> {
        Arc::clone(&self.contract)
    }

    fn to(&self) -> &str {
        &self.to
    }

    fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "permission_tests.rs"]
mod tests;
