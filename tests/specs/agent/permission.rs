// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S6: permission gating with a manager in the loop.

use crate::agent_suspend_resume::{
    calculator_service, domained_broker, init_event, reply_to, review_service,
    subscribe_agent, subscribe_calculator, AGENT,
};
use crate::prelude::*;
use arvo_agent::llm::FakeLlmAdapter;
use arvo_agent::{
    permission_contract, AgentDefinition, AgentHandler, PolicyPermissionManager,
    ServiceToolConfig, PERMISSION_REQUEST_TYPE, PERMISSION_RESPONSE_TYPE,
};
use arvo_broker::SubscribeOptions;
use arvo_core::test_support::open_contract;
use serde_json::json;
use std::sync::Arc;

const CALLER: &str = "com.spec.caller";

fn search_service() -> ServiceToolConfig {
    ServiceToolConfig {
        name: "search_astro_docs".to_string(),
        description: "search the astronomy documentation".to_string(),
        contract: Arc::new(open_contract("arvo.service.search", "com.search.run")),
        to: "com.search.service".to_string(),
        domain: None,
        priority: 0,
        execution_units: 1,
    }
}

#[tokio::test]
async fn permission_gating_with_manager() {
    let (broker, domained) = domained_broker();
    let caller_log = event_log();
    let calc_log = event_log();
    broker
        .subscribe(
            SubscribeOptions::new(CALLER),
            recording_handler(Arc::clone(&caller_log)),
        )
        .unwrap();
    subscribe_calculator(&broker, Arc::clone(&calc_log));

    // Turn 1: review. Turn 2: calculator + search (both gated). Turn 3:
    // the LLM reissues both once permission resolves. Turn 4: final text.
    let llm = FakeLlmAdapter::new();
    llm.push_tool_calls(vec![("tu-review", "human_review", json!({"plan": "steps"}))]);
    llm.push_tool_calls(vec![
        ("tu-calc-1", "calculator", json!({"expression": "1+1"})),
        ("tu-search-1", "search_astro_docs", json!({"q": "nebula"})),
    ]);
    llm.push_tool_calls(vec![
        ("tu-calc-2", "calculator", json!({"expression": "1+1"})),
        ("tu-search-2", "search_astro_docs", json!({"q": "nebula"})),
    ]);
    llm.push_text("2, and the search was not permitted");

    let manager = Arc::new(PolicyPermissionManager::new(
        ["calculator".to_string(), "search_astro_docs".to_string()],
        permission_contract().unwrap(),
        "com.permission.service",
        Some("external.permission".to_string()),
    ));
    let handler = AgentHandler::new(
        AgentDefinition {
            source: AGENT.to_string(),
            completion_event_type: "com.spec.agent.done".to_string(),
            max_tool_interactions: 10,
            services: vec![calculator_service(), search_service(), review_service()],
            internal_tools: vec![],
        },
        Arc::new(llm),
    )
    .with_permissions(manager);
    subscribe_agent(&broker, handler);

    broker.publish(init_event("plan and then act")).unwrap();
    broker.wait_for_idle().await.unwrap();

    // Review request went out first.
    assert_eq!(domained.lock().len(), 1);
    let review_request = domained.lock()[0].clone();
    broker
        .publish(reply_to(
            &review_request,
            "com.review.run.done",
            "com.review.human",
            json!({"approved": true}),
        ))
        .unwrap();
    broker.wait_for_idle().await.unwrap();

    // The gated turn produced exactly one new outbound event: the
    // permission request against the manager's contract.
    let permission_request = {
        let domained = domained.lock();
        assert_eq!(domained.len(), 2);
        let request = domained[1].clone();
        assert_eq!(request.event_type, PERMISSION_REQUEST_TYPE);
        assert_eq!(request.domain.as_deref(), Some("external.permission"));
        assert_eq!(request.access_control.as_deref(), Some("xyz"));
        let mut tools: Vec<String> = request.data["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool.as_str().unwrap().to_string())
            .collect();
        tools.sort();
        assert_eq!(tools, vec!["calculator", "search_astro_docs"]);
        request
    };
    assert!(calc_log.lock().is_empty(), "nothing executes while gated");

    // Grant the calculator, deny the search.
    broker
        .publish(reply_to(
            &permission_request,
            PERMISSION_RESPONSE_TYPE,
            "com.permission.service",
            json!({"granted": ["calculator"], "denied": ["search_astro_docs"]}),
        ))
        .unwrap();
    broker.wait_for_idle().await.unwrap();

    // Only the calculator event was emitted; its reply completed the run.
    assert_eq!(calc_log.lock().len(), 1);
    assert_eq!(calc_log.lock()[0].id, "tu-calc-2");
    let completions = caller_log.lock();
    assert_eq!(completions.len(), 1);
    let completion = &completions[0];
    assert_eq!(completion.subject, "subj-s5");
    assert_eq!(
        completion.access_control.as_deref(),
        Some("xyz"),
        "authorization context survives the whole chain"
    );
}
