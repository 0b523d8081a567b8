// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::tools::{ServerConfig, ToolServerKind};
use arvo_core::Subject;
use serde_json::json;

fn tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: String::new(),
        input_schema: json!({"type": "object"}),
        server: ServerConfig {
            kind: ToolServerKind::Internal,
            priority: 0,
        },
    }
}

fn manager(approval: &[&str]) -> PolicyPermissionManager {
    PolicyPermissionManager::new(
        approval.iter().map(|s| s.to_string()),
        permission_contract().unwrap(),
        "com.permission.service",
        Some("external.permission".to_string()),
    )
}

fn context() -> AgentContext {
    AgentContext::new(Subject::new("s"), None, Vec::new(), 5, None)
}

#[test]
fn unlisted_tools_are_granted() {
    let manager = manager(&["calculator"]);
    let weather = tool("weather");
    let decisions = manager.get(&context(), &[&weather]);
    assert_eq!(decisions[0].state, PermissionState::Granted);
}

#[test]
fn listed_tools_start_requestable() {
    let manager = manager(&["calculator"]);
    let calculator = tool("calculator");
    let decisions = manager.get(&context(), &[&calculator]);
    assert_eq!(decisions[0].state, PermissionState::Requestable);
}

#[test]
fn set_reply_updates_decisions() {
    let manager = manager(&["calculator", "search_astro_docs"]);
    manager.set(&json!({
        "granted": ["calculator"],
        "denied": ["search_astro_docs"]
    }));
    let calculator = tool("calculator");
    let search = tool("search_astro_docs");
    let decisions = manager.get(&context(), &[&calculator, &search]);
    assert_eq!(decisions[0].state, PermissionState::Granted);
    assert_eq!(decisions[1].state, PermissionState::Denied);
}

#[test]
fn request_data_lists_tool_names_and_validates() {
    let manager = manager(&["calculator"]);
    let calculator = tool("calculator");
    let data = manager.request_data(&[&calculator]);
    assert_eq!(data, json!({"tools": ["calculator"]}));
    manager.contract().validate_accepts(&data).unwrap();
}

#[test]
fn reply_payload_validates_against_contract() {
    let contract = permission_contract().unwrap();
    contract
        .validate_emits(
            PERMISSION_RESPONSE_TYPE,
            &json!({"granted": [], "denied": ["x"]}),
        )
        .unwrap();
    assert!(contract
        .validate_emits(PERMISSION_RESPONSE_TYPE, &json!({"granted": []}))
        .is_err());
}

#[test]
fn malformed_reply_is_ignored() {
    let manager = manager(&["calculator"]);
    manager.set(&json!("nonsense"));
    let calculator = tool("calculator");
    let decisions = manager.get(&context(), &[&calculator]);
    assert_eq!(decisions[0].state, PermissionState::Requestable);
}
