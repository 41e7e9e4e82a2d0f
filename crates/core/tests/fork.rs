//! Fork semantics: lineage crosses the session boundary, later activity in
//! the parent stays out of the fork.

mod common;

use std::sync::Arc;

use common::*;
use sb_core::runtime::turn::TurnOptions;
use sb_core::tools::{Tool, ToolOutcome};
use sb_domain::event::{EventBody, EventType};
use sb_domain::message::ToolDefinition;
use sb_domain::stream::RawUsage;
use sb_domain::token::ProviderKind;
use sb_events::AppendEvent;

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "echoes its arguments".into(),
            parameters: serde_json::json!({"type": "object"}),
            independent: false,
        }
    }
    async fn run(
        &self,
        arguments: serde_json::Value,
        _cancel: sb_core::runtime::cancel::CancelToken,
    ) -> sb_domain::Result<ToolOutcome> {
        Ok(ToolOutcome::ok(arguments.to_string()))
    }
}

async fn run_tool_turn(h: &Harness, session_id: &str) {
    h.provider.push_tool_turn(
        "checking",
        "call-1",
        "echo",
        serde_json::json!({"q": 1}),
        RawUsage {
            input_tokens: 40,
            output_tokens: 8,
            ..Default::default()
        },
    );
    h.provider.push_text_turn("all done", 60, 10);
    h.orchestrator
        .prompt(session_id, "use the tool", TurnOptions::default())
        .await
        .unwrap();
    wait_for_event(h, session_id, EventType::StreamTurnEnd).await;
}

// ── Scenario: fork after a tool result ───────────────────────────────

#[tokio::test]
async fn fork_at_tool_result_carries_lineage_but_not_later_events() {
    let h = harness(ProviderKind::Openai, 100_000, vec![Arc::new(EchoTool)]);
    let parent = create_session(&h, ProviderKind::Openai).await;
    run_tool_turn(&h, &parent.id).await;

    let result_event = events_of_type(&h, &parent.id, EventType::ToolResult)
        .pop()
        .unwrap();
    let assistant_event = events_of_type(&h, &parent.id, EventType::MessageAssistant)
        .into_iter()
        .next()
        .unwrap();

    let fork = h
        .orchestrator
        .fork_session(&result_event.id, Some("branch".into()))
        .await
        .unwrap();
    assert_eq!(fork.parent_session_id.as_deref(), Some(parent.id.as_str()));

    let fork_root = all_events(&h, &fork.id).into_iter().next().unwrap();
    assert_eq!(fork_root.event_type(), EventType::SessionFork);
    assert_eq!(fork_root.parent_id, Some(result_event.id));

    let ancestors = h
        .orchestrator
        .state()
        .store
        .get_ancestors(&fork_root.id)
        .unwrap();
    assert!(ancestors.iter().any(|e| e.id == assistant_event.id));
    assert!(ancestors.iter().any(|e| e.id == result_event.id));

    // New results in the parent after the fork never join the fork's chain.
    let late = h
        .orchestrator
        .state()
        .store
        .append(AppendEvent {
            session_id: parent.id.clone(),
            body: EventBody::ToolResult {
                tool_call_id: "call-2".into(),
                content: "late".into(),
                is_error: false,
            },
            parent_id: None,
        })
        .unwrap();
    let ancestors = h
        .orchestrator
        .state()
        .store
        .get_ancestors(&fork_root.id)
        .unwrap();
    assert!(!ancestors.iter().any(|e| e.id == late.id));
}

// ── Fork at a tool-use assistant before any result ───────────────────

#[tokio::test]
async fn fork_at_pending_tool_use_sees_no_results() {
    let h = harness(ProviderKind::Openai, 100_000, vec![Arc::new(EchoTool)]);
    let parent = create_session(&h, ProviderKind::Openai).await;
    run_tool_turn(&h, &parent.id).await;

    // The tool-use assistant message predates its tool.result in the chain.
    let assistant_event = events_of_type(&h, &parent.id, EventType::MessageAssistant)
        .into_iter()
        .next()
        .unwrap();
    let fork = h
        .orchestrator
        .fork_session(&assistant_event.id, None)
        .await
        .unwrap();
    let fork_root = all_events(&h, &fork.id).into_iter().next().unwrap();

    let ancestors = h
        .orchestrator
        .state()
        .store
        .get_ancestors(&fork_root.id)
        .unwrap();
    assert!(ancestors
        .iter()
        .all(|e| e.event_type() != EventType::ToolResult));

    // Results recorded in the parent afterwards stay invisible.
    let ancestors_after = h
        .orchestrator
        .state()
        .store
        .get_ancestors(&fork_root.id)
        .unwrap();
    assert!(ancestors_after
        .iter()
        .all(|e| e.event_type() != EventType::ToolResult));
}

// ── Fork buffer is the ancestors' projection ─────────────────────────

#[tokio::test]
async fn fork_buffer_matches_projection() {
    let h = harness(ProviderKind::Openai, 100_000, vec![]);
    let parent = create_session(&h, ProviderKind::Openai).await;

    h.provider.push_text_turn("reply one", 30, 5);
    h.orchestrator
        .prompt(&parent.id, "question one", TurnOptions::default())
        .await
        .unwrap();
    wait_for_event(&h, &parent.id, EventType::StreamTurnEnd).await;

    let pivot = events_of_type(&h, &parent.id, EventType::MessageAssistant)
        .pop()
        .unwrap();
    let fork = h.orchestrator.fork_session(&pivot.id, None).await.unwrap();

    let active = h.orchestrator.require_active(&fork.id).await.unwrap();
    let ctx = active.context.lock();
    let messages = ctx.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content.text(), Some("question one"));
    assert_eq!(messages[1].content.extract_all_text(), "reply one");
}
