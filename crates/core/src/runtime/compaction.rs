//! Compaction orchestration: summarize the stale prefix of a session's
//! buffer via its provider, write the `compact.boundary` + `compact.summary`
//! event pair, and splice the buffer.
//!
//! Callers must hold the session's turn write lock; that is what makes
//! "at most one concurrent confirm per session" true and keeps compaction
//! from interleaving with a streaming turn.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;

use sb_context::compact;
use sb_domain::error::{Error, Result};
use sb_domain::event::EventBody;
use sb_domain::message::Message;
use sb_domain::stream::StreamChunk;
use sb_providers::{open_stream_with_retry, Provider, ProviderRequest};
use sb_hooks::{HookContext, HookType};
use sb_protocol::ServerEventKind;

use crate::runtime::active::ActiveSession;
use crate::runtime::{emit, emit_event, record_hook_chain};
use crate::state::CoreState;

/// Outcome of one confirm.
#[derive(Debug, Clone, Serialize)]
pub struct CompactionResult {
    pub success: bool,
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub summary: String,
}

/// Run a full compaction for a session whose turn write lock the caller
/// already holds.
///
/// A buffer with nothing to compact is a successful no-op: no events are
/// written and the token figures come back unchanged.
pub async fn run_compaction_locked(
    state: &CoreState,
    session: &Arc<ActiveSession>,
) -> Result<CompactionResult> {
    // Pre-compaction hooks may veto.
    let hook_ctx = HookContext {
        hook_type: HookType::PreCompact,
        session_id: session.id.clone(),
        data: serde_json::json!({}),
    };
    let outcome = state.hooks.run_blocking(&hook_ctx).await;
    record_hook_chain(state, session, HookType::PreCompact, &outcome);
    if let Some(reason) = outcome.blocked {
        return Err(Error::Blocked(reason));
    }

    let Some(to_compact) = session.context.lock().compaction_input() else {
        let snap = session.snapshot();
        return Ok(CompactionResult {
            success: true,
            tokens_before: snap.current_tokens,
            tokens_after: snap.current_tokens,
            summary: String::new(),
        });
    };

    // Summarize through the session's own provider.
    let model_spec = session.model();
    let (provider, model) = state.providers.resolve(&model_spec)?;
    let summary = generate_summary(
        state,
        &provider,
        &model,
        &to_compact,
        Duration::from_secs(state.config.timeouts.provider_secs),
    )
    .await?;

    // Compaction range: everything after the previous boundary, up to the
    // current tip.
    let events = state
        .store
        .get_events_by_session(&session.id, &Default::default())
        .map_err(sb_domain::Error::from)?;
    let range_start = events
        .iter()
        .rposition(|e| matches!(e.body, EventBody::CompactBoundary { .. }))
        .map(|i| (i + 1).min(events.len() - 1))
        .unwrap_or(0);
    let from_event_id = events[range_start].id;
    let to_event_id = events.last().map(|e| e.id).unwrap_or(from_event_id);

    let applied = session.context.lock().apply_compaction(&summary);

    let boundary = session.append_event(
        &state.store,
        EventBody::CompactBoundary {
            from_event_id,
            to_event_id,
            original_tokens: applied.tokens_before,
            compacted_tokens: applied.tokens_after,
        },
        None,
    )?;
    emit_event(state, &boundary);

    let summary_ev = session.append_event(
        &state.store,
        EventBody::CompactSummary {
            summary: summary.clone(),
            boundary_event_id: boundary.id,
        },
        None,
    )?;
    emit_event(state, &summary_ev);

    emit(
        state,
        ServerEventKind::AgentCompaction,
        &session.id,
        serde_json::json!({
            "tokens_before": applied.tokens_before,
            "tokens_after": applied.tokens_after,
            "messages_compacted": applied.messages_compacted,
        }),
    );

    tracing::info!(
        session_id = %session.id,
        tokens_before = applied.tokens_before,
        tokens_after = applied.tokens_after,
        messages_compacted = applied.messages_compacted,
        "session compacted"
    );

    Ok(CompactionResult {
        success: true,
        tokens_before: applied.tokens_before,
        tokens_after: applied.tokens_after,
        summary,
    })
}

/// Non-streaming style summary generation: drain the provider stream into
/// one string.
async fn generate_summary(
    _state: &CoreState,
    provider: &Arc<dyn Provider>,
    model: &str,
    to_compact: &[Message],
    timeout: Duration,
) -> Result<String> {
    let conversation = compact::build_conversation_text(to_compact);
    let req = ProviderRequest {
        model: model.to_owned(),
        messages: vec![Message::user(compact::summary_prompt(&conversation))],
        tools: vec![],
        max_tokens: Some(2000),
        temperature: Some(0.1),
    };

    let collect = async {
        let mut stream = open_stream_with_retry(provider, &req).await?;
        let mut summary = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::TextDelta { text } => summary.push_str(&text),
                StreamChunk::Error { message, retryable } => {
                    return Err(Error::Provider {
                        provider: provider.provider_id().to_owned(),
                        message,
                        retryable,
                    });
                }
                _ => {}
            }
        }
        Ok(summary)
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "summarizer exceeded {timeout:?}"
        ))),
    }
}
