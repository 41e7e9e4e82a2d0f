//! Event-log replay into an in-memory buffer.
//!
//! Used on resume and fork: the ancestor events are folded, in order, into
//! the message sequence the next turn will send to the provider. Deleted
//! messages are hidden; a compaction summary restarts the buffer; a context
//! clear empties it.

use std::collections::HashSet;

use uuid::Uuid;

use sb_domain::event::{Event, EventBody};
use sb_domain::message::Message;

/// The rebuilt per-session view.
#[derive(Debug, Default)]
pub struct Projection {
    pub messages: Vec<Message>,
    /// Latest model, following `session.start` and any `config.model_switch`.
    pub model: Option<String>,
    /// Latest system prompt from `config.prompt_update`, if any.
    pub system_prompt: Option<String>,
}

pub fn project(events: &[Event]) -> Projection {
    let deleted: HashSet<Uuid> = events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::MessageDeleted {
                target_event_id, ..
            } => Some(*target_event_id),
            _ => None,
        })
        .collect();

    let mut projection = Projection::default();

    for event in events {
        if deleted.contains(&event.id) {
            continue;
        }
        match &event.body {
            EventBody::SessionStart { model, .. } => {
                projection.model = Some(model.clone());
            }
            EventBody::ConfigModelSwitch { to_model, .. } => {
                projection.model = Some(to_model.clone());
            }
            EventBody::ConfigPromptUpdate { prompt } => {
                projection.system_prompt = Some(prompt.clone());
            }
            EventBody::MessageUser { content } => {
                projection.messages.push(Message::user(content.clone()));
            }
            EventBody::MessageAssistant { blocks, .. } => {
                projection
                    .messages
                    .push(Message::assistant_parts(blocks.clone()));
            }
            EventBody::MessageSystem { content } => {
                projection.messages.push(Message::system(content.clone()));
            }
            EventBody::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                projection
                    .messages
                    .push(Message::tool_result(tool_call_id.clone(), content.clone(), *is_error));
            }
            // The summary replaces everything before it.
            EventBody::CompactSummary { summary, .. } => {
                projection.messages.clear();
                projection.messages.push(Message::system(summary.clone()));
            }
            EventBody::ContextCleared {} => {
                projection.messages.clear();
            }
            _ => {}
        }
    }

    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sb_domain::event::DeleteMode;
    use sb_domain::stream::{RawUsage, StopReason};
    use sb_domain::Role;

    fn event(sequence: i64, body: EventBody) -> Event {
        Event {
            id: Uuid::now_v7(),
            parent_id: None,
            session_id: "s1".into(),
            workspace_id: "w1".into(),
            timestamp: Utc::now(),
            sequence,
            body,
            checksum: None,
        }
    }

    fn assistant(text: &str) -> EventBody {
        EventBody::MessageAssistant {
            blocks: vec![sb_domain::ContentPart::Text { text: text.into() }],
            usage: RawUsage::default(),
            stop_reason: StopReason::EndTurn,
        }
    }

    #[test]
    fn replays_conversation_in_order() {
        let events = vec![
            event(0, EventBody::SessionStart {
                workspace_id: "w1".into(),
                working_directory: "/w".into(),
                model: "openai/gpt".into(),
                title: None,
            }),
            event(1, EventBody::MessageUser { content: "hi".into() }),
            event(2, assistant("hello")),
        ];
        let projection = project(&events);
        assert_eq!(projection.messages.len(), 2);
        assert_eq!(projection.messages[0].role, Role::User);
        assert_eq!(projection.model.as_deref(), Some("openai/gpt"));
    }

    #[test]
    fn deleted_messages_are_hidden() {
        let target = event(1, EventBody::MessageUser { content: "oops".into() });
        let marker = event(
            2,
            EventBody::MessageDeleted {
                target_event_id: target.id,
                mode: DeleteMode::Soft,
            },
        );
        let projection = project(&[target, marker]);
        assert!(projection.messages.is_empty());
    }

    #[test]
    fn compaction_summary_restarts_the_buffer() {
        let boundary_id = Uuid::now_v7();
        let events = vec![
            event(0, EventBody::MessageUser { content: "old".into() }),
            event(1, assistant("old reply")),
            event(
                2,
                EventBody::CompactSummary {
                    summary: "earlier: user greeted".into(),
                    boundary_event_id: boundary_id,
                },
            ),
            event(3, EventBody::MessageUser { content: "new".into() }),
        ];
        let projection = project(&events);
        assert_eq!(projection.messages.len(), 2);
        assert_eq!(projection.messages[0].role, Role::System);
        assert_eq!(
            projection.messages[1].content.text(),
            Some("new")
        );
    }

    #[test]
    fn context_cleared_empties_buffer() {
        let events = vec![
            event(0, EventBody::MessageUser { content: "a".into() }),
            event(1, EventBody::ContextCleared {}),
            event(2, EventBody::MessageUser { content: "b".into() }),
        ];
        let projection = project(&events);
        assert_eq!(projection.messages.len(), 1);
        assert_eq!(projection.messages[0].content.text(), Some("b"));
    }

    #[test]
    fn model_switch_updates_model() {
        let events = vec![
            event(0, EventBody::SessionStart {
                workspace_id: "w1".into(),
                working_directory: "/w".into(),
                model: "openai/gpt".into(),
                title: None,
            }),
            event(
                1,
                EventBody::ConfigModelSwitch {
                    from_model: Some("openai/gpt".into()),
                    to_model: "anthropic/claude".into(),
                },
            ),
        ];
        assert_eq!(project(&events).model.as_deref(), Some("anthropic/claude"));
    }
}
