//! Core runtime: the orchestrator that ties sessions, the event log,
//! provider streaming, tool dispatch, and hooks into one linearized loop
//! per session.
//!
//! Entry points: [`orchestrator::Orchestrator`] for session lifecycle and
//! [`turn::spawn_turn`] for driving one prompt end-to-end.

pub mod active;
pub mod cancel;
pub mod compaction;
pub mod orchestrator;
pub mod projection;
pub mod trackers;
pub mod turn;

use sb_domain::event::{Event, EventBody};
use sb_events::AppendEvent;
use sb_hooks::{BlockingOutcome, HookSink, HookType};
use sb_protocol::{ServerEvent, ServerEventKind};

use crate::runtime::active::ActiveSession;
use crate::state::CoreState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fan-out helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Push a persisted event to subscribers as `event.new`.
pub(crate) fn emit_event(state: &CoreState, event: &Event) {
    let data = serde_json::to_value(event).unwrap_or_default();
    state.fanout.emit(ServerEvent::new(
        ServerEventKind::EventNew,
        Some(event.session_id.clone()),
        data,
    ));
}

/// Push a typed agent event to subscribers.
pub(crate) fn emit(
    state: &CoreState,
    kind: ServerEventKind,
    session_id: &str,
    data: serde_json::Value,
) {
    state
        .fanout
        .emit(ServerEvent::new(kind, Some(session_id.to_owned()), data));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Record a blocking chain's lifecycle into the log (`hook.triggered` +
/// `hook.completed` per executed hook). Best-effort: a failed append is
/// logged, not fatal.
pub(crate) fn record_hook_chain(
    state: &CoreState,
    session: &ActiveSession,
    hook_type: HookType,
    outcome: &BlockingOutcome,
) {
    for (i, name) in outcome.triggered.iter().enumerate() {
        let is_last = i + 1 == outcome.triggered.len();
        let result = if is_last && outcome.blocked.is_some() {
            "block"
        } else {
            "continue"
        };

        for body in [
            EventBody::HookTriggered {
                hook_name: name.clone(),
                hook_type: hook_type.as_str().to_owned(),
            },
            EventBody::HookCompleted {
                hook_name: name.clone(),
                outcome: result.to_owned(),
            },
        ] {
            match session.append_event(&state.store, body, None) {
                Ok(ev) => emit_event(state, &ev),
                Err(e) => {
                    tracing::warn!(hook = %name, error = %e, "failed to record hook lifecycle")
                }
            }
        }
    }
}

/// Sink that turns background hook lifecycle into persisted events plus
/// fan-out pushes.
pub(crate) struct EventHookSink {
    pub state: CoreState,
}

impl EventHookSink {
    fn record(&self, session_id: &str, body: EventBody, kind: ServerEventKind) {
        match self.state.store.append(AppendEvent {
            session_id: session_id.to_owned(),
            body,
            parent_id: None,
        }) {
            Ok(ev) => {
                emit_event(&self.state, &ev);
                emit(
                    &self.state,
                    kind,
                    session_id,
                    serde_json::to_value(&ev.body).unwrap_or_default(),
                );
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to record background hook event")
            }
        }
    }
}

impl HookSink for EventHookSink {
    fn background_started(&self, session_id: &str, hook_name: &str) {
        self.record(
            session_id,
            EventBody::HookBackgroundStarted {
                hook_name: hook_name.to_owned(),
            },
            ServerEventKind::HookBackgroundStarted,
        );
    }

    fn background_completed(&self, session_id: &str, hook_name: &str, error: Option<String>) {
        self.record(
            session_id,
            EventBody::HookBackgroundCompleted {
                hook_name: hook_name.to_owned(),
                error,
            },
            ServerEventKind::HookBackgroundCompleted,
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Small helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Truncate to at most `max` bytes on a char boundary.
pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
