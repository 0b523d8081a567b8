// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S5: the agent suspends on a service call and resumes on its reply.

use crate::prelude::*;
use arvo_agent::llm::FakeLlmAdapter;
use arvo_agent::{
    AgentDefinition, AgentHandler, MachineExecutor, MessageContextSeed, ServiceToolConfig,
};
use arvo_broker::{handler_fn, BrokerConfig, EventBroker, HandlerError, SubscribeOptions};
use arvo_core::test_support::{calculator_contract, open_contract};
use arvo_core::Event;
use arvo_memory::{InMemoryMachineMemory, LockConfig};
use serde_json::json;
use std::sync::Arc;

pub(crate) const AGENT: &str = "com.spec.agent";
const CALLER: &str = "com.spec.caller";

pub(crate) fn calculator_service() -> ServiceToolConfig {
    ServiceToolConfig {
        name: "calculator".to_string(),
        description: "evaluate an arithmetic expression".to_string(),
        contract: Arc::new(calculator_contract()),
        to: "com.calc.service".to_string(),
        domain: None,
        priority: 0,
        execution_units: 1,
    }
}

pub(crate) fn review_service() -> ServiceToolConfig {
    ServiceToolConfig {
        name: "human_review".to_string(),
        description: "ask a human to review the plan before acting".to_string(),
        contract: Arc::new(open_contract("arvo.service.review", "com.review.run")),
        to: "com.review.human".to_string(),
        domain: Some("external.human".to_string()),
        priority: 100,
        execution_units: 0,
    }
}

pub(crate) fn domained_broker() -> (EventBroker, EventLog) {
    let domained = event_log();
    let sink = Arc::clone(&domained);
    let broker = EventBroker::new(BrokerConfig {
        on_domained_event: Some(Arc::new(move |event| sink.lock().push(event))),
        ..BrokerConfig::default()
    });
    (broker, domained)
}

/// Calculator service double: replies `{"result": 2.0}` to whatever asked.
pub(crate) fn subscribe_calculator(broker: &EventBroker, log: EventLog) {
    let echo = handler_fn(move |event: Event, _publisher| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(event.clone());
            let reply = event
                .reply("com.calculator.run.done")
                .source("com.calc.service")
                .data(json!({"result": 2.0}))
                .build()
                .map_err(|e| HandlerError::failed(e.to_string()))?;
            Ok(vec![reply])
        }
    });
    broker
        .subscribe(SubscribeOptions::new("com.calc.service"), echo)
        .unwrap();
}

pub(crate) fn subscribe_agent(
    broker: &EventBroker,
    handler: AgentHandler,
) {
    let memory = Arc::new(InMemoryMachineMemory::new(LockConfig {
        max_retries: 2,
        initial_delay_ms: 5,
        backoff_exponent: 2.0,
        ttl_ms: 5_000,
    }));
    let executor = MachineExecutor::new(handler, memory);
    broker
        .subscribe(SubscribeOptions::new(AGENT), Arc::new(executor))
        .unwrap();
}

pub(crate) fn init_event(message: &str) -> Event {
    Event::builder("com.spec.agent.run")
        .source(CALLER)
        .to(AGENT)
        .subject("subj-s5")
        .access_control("xyz")
        .data(json!({ "message": message }))
        .build()
        .unwrap()
}

pub(crate) fn reply_to(event: &Event, event_type: &str, source: &str, data: serde_json::Value) -> Event {
    Event::builder(event_type)
        .source(source)
        .to(AGENT)
        .subject(event.subject.clone())
        .parent_id(event.id.clone())
        .data(data)
        .build()
        .unwrap()
}

#[tokio::test]
async fn agent_service_call_suspend_resume() {
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

    // Turn 1: human review (priority 100) and calculator (priority 0) —
    // only the review survives the batch. Turn 2: calculator. Turn 3: text.
    let llm = FakeLlmAdapter::new();
    llm.push_tool_calls(vec![
        ("tu-review", "human_review", json!({"plan": "steps"})),
        ("tu-calc-early", "calculator", json!({"expression": "1+1"})),
    ]);
    llm.push_tool_calls(vec![("tu-calc", "calculator", json!({"expression": "1+1"}))]);
    llm.push_text("the result is 2");

    let handler = AgentHandler::new(
        AgentDefinition {
            source: AGENT.to_string(),
            completion_event_type: "com.spec.agent.done".to_string(),
            max_tool_interactions: 10,
            services: vec![calculator_service(), review_service()],
            internal_tools: vec![],
        },
        Arc::new(llm),
    )
    .with_context_seed(Arc::new(MessageContextSeed {
        system: Some("plan first, then act".to_string()),
    }));
    subscribe_agent(&broker, handler);

    broker.publish(init_event("plan and then act")).unwrap();
    broker.wait_for_idle().await.unwrap();

    // Exactly one event left the workflow: the domained review request.
    {
        let domained = domained.lock();
        assert_eq!(domained.len(), 1);
        let review = &domained[0];
        assert_eq!(review.id, "tu-review");
        assert_eq!(review.domain.as_deref(), Some("external.human"));
        assert_eq!(review.access_control.as_deref(), Some("xyz"));
        assert_eq!(review.subject, "subj-s5");
    }
    assert!(calc_log.lock().is_empty(), "dropped call must not execute");
    assert!(caller_log.lock().is_empty());

    // Human approves: the agent wakes, issues the calculator call, the
    // calculator replies, and the workflow completes.
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

    assert_eq!(calc_log.lock().len(), 1, "calculator ran exactly once");
    let completions = caller_log.lock();
    assert_eq!(completions.len(), 1);
    let completion = &completions[0];
    assert_eq!(completion.event_type, "com.spec.agent.done");
    assert_eq!(completion.subject, "subj-s5", "completion keeps the init subject");
    assert_eq!(completion.access_control.as_deref(), Some("xyz"));
    assert_eq!(completion.data, json!({"content": "the result is 2"}));
}
