//! Turn execution: the driver for one prompt end-to-end.
//!
//! A turn moves through preflight (capacity, auto-compaction, prompt hooks),
//! provider streaming (deltas persisted and fanned out), tool execution
//! (hooks, guardrails, dispatch), and loops back to the provider until a
//! terminal stop reason. Cancellation is checked between chunks and between
//! tool calls; an aborted turn still writes its terminal `error.agent`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::Instrument;
use uuid::Uuid;

use sb_domain::error::Result;
use sb_domain::event::{Event, EventBody};
use sb_domain::message::{ContentPart, ToolCall};
use sb_domain::stream::{RawUsage, StopReason, StreamChunk};
use sb_hooks::{HookContext, HookType};
use sb_protocol::ServerEventKind;
use sb_providers::{open_stream_with_retry, Provider, ProviderRequest};

use crate::guardrail::{evaluate_all, GuardrailInput};
use crate::runtime::active::ActiveSession;
use crate::runtime::cancel::CancelToken;
use crate::runtime::compaction::run_compaction_locked;
use crate::runtime::{emit, emit_event, record_hook_chain, EventHookSink};
use crate::state::CoreState;
use crate::tools::{dispatch_tool, ToolOutcome};

/// Assumed response size for capacity checks when the caller does not pass
/// its own estimate.
const DEFAULT_RESPONSE_ESTIMATE: u64 = 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Model override for this turn (e.g. `"openai/gpt-4o"`). `None` uses
    /// the session model.
    pub model: Option<String>,
    pub estimated_response_tokens: u64,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            model: None,
            estimated_response_tokens: DEFAULT_RESPONSE_ESTIMATE,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// spawn_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Start one agent turn. Acknowledges immediately with the turn id; results
/// flow as persisted events plus fan-out pushes.
///
/// The spawned task takes the session's turn write lock for its whole
/// duration, so turns on one session are totally ordered and compaction
/// cannot interleave.
pub fn spawn_turn(
    state: CoreState,
    session: Arc<ActiveSession>,
    prompt: String,
    opts: TurnOptions,
) -> Uuid {
    let turn_id = Uuid::new_v4();
    let span = tracing::info_span!("turn", %turn_id, session_id = %session.id);

    tokio::spawn(
        async move {
            let _turn_guard = session.turn_lock.write().await;
            let cancel = state.cancel_map.register(&session.id);

            tracing::debug!("turn started");
            let result = run_turn_inner(&state, &session, prompt, opts, &cancel).await;
            state.cancel_map.remove(&session.id);

            if let Err(e) = result {
                // Anything that escapes here was not yet recorded in the log.
                tracing::warn!(error = %e, "turn failed");
                if let Ok(ev) = session.append_event(
                    &state.store,
                    EventBody::ErrorAgent {
                        message: e.to_string(),
                        recoverable: false,
                    },
                    None,
                ) {
                    emit_event(&state, &ev);
                }
                emit(
                    &state,
                    ServerEventKind::AgentError,
                    &session.id,
                    serde_json::json!({"message": e.to_string()}),
                );
            }
        }
        .instrument(span),
    );

    turn_id
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn_inner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &CoreState,
    session: &Arc<ActiveSession>,
    prompt: String,
    opts: TurnOptions,
    cancel: &CancelToken,
) -> Result<()> {
    let cfg = &state.config;

    // ── Preflight: capacity, then compaction if needed ────────────
    let decision = {
        let ctx = session.context.lock();
        ctx.can_accept_turn(opts.estimated_response_tokens)
    };
    if decision.needs_compaction && cfg.compaction.auto {
        if let Err(e) = run_compaction_locked(state, session).await {
            tracing::warn!(error = %e, "auto-compaction failed, continuing with full buffer");
        }
    }
    let decision = {
        let ctx = session.context.lock();
        ctx.can_accept_turn(opts.estimated_response_tokens)
    };
    if !decision.can_proceed {
        let reason = decision
            .reason
            .unwrap_or_else(|| "context window exceeded".into());
        let ev = session.append_event(
            &state.store,
            EventBody::ErrorAgent {
                message: reason.clone(),
                recoverable: false,
            },
            None,
        )?;
        emit_event(state, &ev);
        emit(
            state,
            ServerEventKind::AgentError,
            &session.id,
            serde_json::json!({"message": reason}),
        );
        return Ok(());
    }

    // ── Preflight: record the user message ────────────────────────
    let user_ev = session.append_event(
        &state.store,
        EventBody::MessageUser {
            content: prompt.clone(),
        },
        None,
    )?;
    session.context.lock().append_user(&prompt);
    emit_event(state, &user_ev);

    // ── Preflight: prompt hooks ───────────────────────────────────
    let hook_outcome = state
        .hooks
        .run_blocking(&HookContext {
            hook_type: HookType::UserPromptSubmit,
            session_id: session.id.clone(),
            data: serde_json::json!({"prompt": prompt}),
        })
        .await;
    record_hook_chain(state, session, HookType::UserPromptSubmit, &hook_outcome);
    if let Some(reason) = hook_outcome.blocked {
        let ev = session.append_event(
            &state.store,
            EventBody::ErrorAgent {
                message: format!("prompt blocked by hook: {reason}"),
                recoverable: true,
            },
            None,
        )?;
        emit_event(state, &ev);
        return Ok(());
    }
    if let Some(mods) = &hook_outcome.modifications {
        if let Some(p) = mods.get("prompt").and_then(|v| v.as_str()) {
            session.context.lock().amend_last_user(p);
        }
    }

    let turn_no = session.tokens.lock().turn() + 1;
    let start_ev = session.append_event(
        &state.store,
        EventBody::StreamTurnStart { turn: turn_no },
        None,
    )?;
    emit_event(state, &start_ev);
    emit(
        state,
        ServerEventKind::AgentTurn,
        &session.id,
        serde_json::json!({"turn": turn_no, "status": "started"}),
    );

    // ── Provider/tool loop ────────────────────────────────────────
    let mut final_stop = StopReason::EndTurn;
    let provider_timeout = Duration::from_secs(cfg.timeouts.provider_secs);

    for loop_idx in 0..cfg.limits.max_tool_loops {
        tracing::debug!(loop_idx, "provider loop iteration");

        if cancel.is_cancelled() {
            return abort_turn(state, session, turn_no).await;
        }

        let model_spec = opts.model.clone().unwrap_or_else(|| session.model());
        let (provider, model) = state.providers.resolve(&model_spec)?;

        let req = ProviderRequest {
            model,
            messages: session.context.lock().messages().to_vec(),
            tools: state.tools.definitions(),
            max_tokens: None,
            temperature: None,
        };

        let streamed = match tokio::time::timeout(
            provider_timeout,
            consume_stream(state, session, &provider, &req, cancel),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                record_provider_failure(
                    state,
                    session,
                    provider.provider_id(),
                    &format!("provider request exceeded {provider_timeout:?}"),
                    false,
                    turn_no,
                )
                .await?;
                return Ok(());
            }
        };

        if streamed.cancelled {
            return abort_turn(state, session, turn_no).await;
        }
        if let Some((message, retryable)) = streamed.provider_error {
            record_provider_failure(
                state,
                session,
                provider.provider_id(),
                &message,
                retryable,
                turn_no,
            )
            .await?;
            return Ok(());
        }

        // ── Finalize the assistant message ────────────────────────
        let usage = streamed.usage.unwrap_or_default();
        let stop = streamed.stop_reason.unwrap_or(StopReason::EndTurn);
        let mut blocks = streamed.blocks;
        for call in &streamed.tool_calls {
            blocks.push(ContentPart::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }

        let assistant_ev = session.append_event(
            &state.store,
            EventBody::MessageAssistant {
                blocks: blocks.clone(),
                usage,
                stop_reason: stop,
            },
            None,
        )?;
        session.context.lock().append_assistant(blocks);
        emit_event(state, &assistant_ev);

        // ── Fold usage through the normalizer ─────────────────────
        let context_tokens = {
            let mut tokens = session.tokens.lock();
            tokens
                .record_turn(provider.kind(), &usage, &session.id)
                .computed
                .context_window_tokens
        };
        session.context.lock().set_current_tokens(context_tokens);

        // ── Terminal? ─────────────────────────────────────────────
        if streamed.tool_calls.is_empty() || stop.is_terminal() {
            final_stop = stop;
            break;
        }

        // ── Tool execution ────────────────────────────────────────
        let stop_requested =
            execute_tools(state, session, &assistant_ev, streamed.tool_calls, cancel).await?;
        if cancel.is_cancelled() {
            return abort_turn(state, session, turn_no).await;
        }
        if stop_requested {
            final_stop = StopReason::EndTurn;
            break;
        }

        if loop_idx == cfg.limits.max_tool_loops - 1 {
            let ev = session.append_event(
                &state.store,
                EventBody::ErrorAgent {
                    message: format!(
                        "tool loop limit reached ({} iterations)",
                        cfg.limits.max_tool_loops
                    ),
                    recoverable: true,
                },
                None,
            )?;
            emit_event(state, &ev);
            final_stop = StopReason::EndTurn;
        }
    }

    finish_turn(state, session, turn_no, Some(final_stop)).await;
    Ok(())
}

/// Close the turn: `stream.turn_end`, `agent.turn` push, Stop hooks.
async fn finish_turn(
    state: &CoreState,
    session: &Arc<ActiveSession>,
    turn_no: u32,
    stop_reason: Option<StopReason>,
) {
    if let Ok(ev) = session.append_event(
        &state.store,
        EventBody::StreamTurnEnd {
            turn: turn_no,
            stop_reason,
        },
        None,
    ) {
        emit_event(state, &ev);
    }
    emit(
        state,
        ServerEventKind::AgentTurn,
        &session.id,
        serde_json::json!({"turn": turn_no, "status": "completed"}),
    );

    let hook_ctx = HookContext {
        hook_type: HookType::Stop,
        session_id: session.id.clone(),
        data: serde_json::json!({"turn": turn_no}),
    };
    let outcome = state.hooks.run_blocking(&hook_ctx).await;
    record_hook_chain(state, session, HookType::Stop, &outcome);
    state.hooks.spawn_background(
        hook_ctx,
        Arc::new(EventHookSink {
            state: state.clone(),
        }),
    );
}

/// Cancellation epilogue: the terminal `error.agent { recoverable: true }`.
async fn abort_turn(
    state: &CoreState,
    session: &Arc<ActiveSession>,
    turn_no: u32,
) -> Result<()> {
    let ev = session.append_event(
        &state.store,
        EventBody::ErrorAgent {
            message: "aborted".into(),
            recoverable: true,
        },
        None,
    )?;
    emit_event(state, &ev);
    emit(
        state,
        ServerEventKind::AgentError,
        &session.id,
        serde_json::json!({"message": "aborted", "recoverable": true}),
    );
    finish_turn(state, session, turn_no, None).await;
    tracing::info!(session_id = %session.id, "turn aborted");
    Ok(())
}

/// Terminal provider failure: `error.provider` then `error.agent`.
async fn record_provider_failure(
    state: &CoreState,
    session: &Arc<ActiveSession>,
    provider_id: &str,
    message: &str,
    retryable: bool,
    turn_no: u32,
) -> Result<()> {
    let ev = session.append_event(
        &state.store,
        EventBody::ErrorProvider {
            provider: provider_id.to_owned(),
            message: message.to_owned(),
            retryable,
        },
        None,
    )?;
    emit_event(state, &ev);

    let ev = session.append_event(
        &state.store,
        EventBody::ErrorAgent {
            message: format!("provider {provider_id} failed: {message}"),
            recoverable: false,
        },
        None,
    )?;
    emit_event(state, &ev);
    emit(
        state,
        ServerEventKind::AgentError,
        &session.id,
        serde_json::json!({"message": message, "provider": provider_id}),
    );
    finish_turn(state, session, turn_no, None).await;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream consumption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one provider call produced.
struct StreamedTurn {
    /// Thinking + text blocks, in arrival order.
    blocks: Vec<ContentPart>,
    tool_calls: Vec<ToolCall>,
    usage: Option<RawUsage>,
    stop_reason: Option<StopReason>,
    cancelled: bool,
    /// `(message, retryable)` if the stream itself failed.
    provider_error: Option<(String, bool)>,
}

async fn consume_stream(
    state: &CoreState,
    session: &Arc<ActiveSession>,
    provider: &Arc<dyn Provider>,
    req: &ProviderRequest,
    cancel: &CancelToken,
) -> Result<StreamedTurn> {
    let mut stream = open_stream_with_retry(provider, req).await?;

    let mut text_buf = String::new();
    let mut thinking_buf = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut usage = None;
    let mut stop_reason = None;
    let mut cancelled = false;
    let mut provider_error = None;

    // Tool call assembly for providers that only send start + deltas.
    let mut tc_bufs: std::collections::HashMap<String, (String, String)> =
        std::collections::HashMap::new();

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                provider_error = Some((e.to_string(), e.is_retryable()));
                break;
            }
        };

        match chunk {
            StreamChunk::TextDelta { text } => {
                text_buf.push_str(&text);
                let ev = session.append_event(
                    &state.store,
                    EventBody::StreamTextDelta { text: text.clone() },
                    None,
                )?;
                emit_event(state, &ev);
                emit(
                    state,
                    ServerEventKind::AgentTextDelta,
                    &session.id,
                    serde_json::json!({"text": text}),
                );
            }
            StreamChunk::ThinkingDelta { text } => {
                thinking_buf.push_str(&text);
                let ev = session.append_event(
                    &state.store,
                    EventBody::StreamThinkingDelta { text: text.clone() },
                    None,
                )?;
                emit_event(state, &ev);
                emit(
                    state,
                    ServerEventKind::AgentThinkingDelta,
                    &session.id,
                    serde_json::json!({"text": text}),
                );
            }
            StreamChunk::ToolCallStart { call_id, tool_name } => {
                tc_bufs.insert(call_id, (tool_name, String::new()));
            }
            StreamChunk::ToolCallDelta { call_id, delta } => {
                if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            StreamChunk::ToolCallEnd {
                call_id,
                tool_name,
                arguments,
            } => {
                tc_bufs.remove(&call_id);
                let independent = state.tools.is_independent(&tool_name);
                tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                    independent,
                });
            }
            StreamChunk::Done {
                usage: u,
                stop_reason: s,
            } => {
                usage = Some(u);
                stop_reason = Some(s);
            }
            StreamChunk::Error { message, retryable } => {
                provider_error = Some((message, retryable));
                break;
            }
            StreamChunk::Start
            | StreamChunk::TextStart
            | StreamChunk::TextEnd
            | StreamChunk::ThinkingStart
            | StreamChunk::ThinkingEnd => {}
        }
    }

    // Assemble calls that never saw an explicit end chunk.
    for (call_id, (name, args_str)) in tc_bufs.drain() {
        let arguments = if args_str.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&args_str) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        let independent = state.tools.is_independent(&name);
        tool_calls.push(ToolCall {
            call_id,
            tool_name: name,
            arguments,
            independent,
        });
    }

    let mut blocks = Vec::new();
    if !thinking_buf.is_empty() {
        blocks.push(ContentPart::Thinking { text: thinking_buf });
    }
    if !text_buf.is_empty() {
        blocks.push(ContentPart::Text { text: text_buf });
    }

    Ok(StreamedTurn {
        blocks,
        tool_calls,
        usage,
        stop_reason,
        cancelled,
        provider_error,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one assistant message's tool calls.
///
/// Every `tool.call` and `tool.result` is its own event parented on the
/// assistant message, so a fork taken at any of them carries exactly the
/// results that existed at that point. Calls run in declaration order; a
/// batch where every call is declared independent runs concurrently.
///
/// Returns `true` when a tool asked to stop the turn.
async fn execute_tools(
    state: &CoreState,
    session: &Arc<ActiveSession>,
    assistant_ev: &Event,
    calls: Vec<ToolCall>,
    cancel: &CancelToken,
) -> Result<bool> {
    // Record all calls up front.
    for call in &calls {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let ev = session.append_event(
            &state.store,
            EventBody::ToolCall {
                tool_call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            },
            Some(assistant_ev.id),
        )?;
        emit_event(state, &ev);
        emit(
            state,
            ServerEventKind::AgentToolStart,
            &session.id,
            serde_json::json!({
                "call_id": call.call_id,
                "tool_name": call.tool_name,
                "arguments": call.arguments,
            }),
        );
    }

    if cancel.is_cancelled() {
        return Ok(false);
    }

    // Dispatch: concurrent only when the whole batch is independent.
    let all_independent = calls.len() > 1 && calls.iter().all(|c| c.independent);
    let outcomes: Vec<ToolOutcome> = if all_independent {
        let futures: Vec<_> = calls
            .iter()
            .map(|call| run_one_tool(state, session, call, cancel))
            .collect();
        futures_util::future::join_all(futures).await
    } else {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in &calls {
            if cancel.is_cancelled() {
                // Unexecuted calls still need results for the model; mark
                // them aborted without invoking the tool.
                outcomes.push(ToolOutcome::error("aborted before execution"));
                continue;
            }
            outcomes.push(run_one_tool(state, session, call, cancel).await);
        }
        outcomes
    };

    // Record results, in declaration order.
    let mut stop_requested = false;
    for (call, outcome) in calls.iter().zip(&outcomes) {
        tracing::debug!(
            tool = %call.tool_name,
            call_id = %call.call_id,
            is_error = outcome.is_error,
            preview = %crate::runtime::truncate_str(&outcome.content, 200),
            "tool finished"
        );
        let ev = session.append_event(
            &state.store,
            EventBody::ToolResult {
                tool_call_id: call.call_id.clone(),
                content: outcome.content.clone(),
                is_error: outcome.is_error,
            },
            Some(assistant_ev.id),
        )?;
        session
            .context
            .lock()
            .append_tool_result(&call.call_id, &outcome.content, outcome.is_error);
        emit_event(state, &ev);
        emit(
            state,
            ServerEventKind::AgentToolResult,
            &session.id,
            serde_json::json!({
                "call_id": call.call_id,
                "tool_name": call.tool_name,
                "content": outcome.content,
                "is_error": outcome.is_error,
            }),
        );

        if outcome.is_error {
            let ev = session.append_event(
                &state.store,
                EventBody::ErrorTool {
                    tool_call_id: Some(call.call_id.clone()),
                    message: outcome.content.clone(),
                },
                None,
            )?;
            emit_event(state, &ev);
        }
        stop_requested |= outcome.stop_turn;
    }

    // Post-tool hooks observe in the background.
    state.hooks.spawn_background(
        HookContext {
            hook_type: HookType::PostToolUse,
            session_id: session.id.clone(),
            data: serde_json::json!({
                "calls": calls
                    .iter()
                    .zip(&outcomes)
                    .map(|(c, o)| serde_json::json!({
                        "tool_name": c.tool_name,
                        "call_id": c.call_id,
                        "is_error": o.is_error,
                    }))
                    .collect::<Vec<_>>(),
            }),
        },
        Arc::new(EventHookSink {
            state: state.clone(),
        }),
    );

    Ok(stop_requested)
}

/// One call: pre-tool hooks, guardrails, then the tool itself.
async fn run_one_tool(
    state: &CoreState,
    session: &Arc<ActiveSession>,
    call: &ToolCall,
    cancel: &CancelToken,
) -> ToolOutcome {
    // Pre-tool hooks may block or rewrite the arguments.
    let hook_outcome = state
        .hooks
        .run_blocking(&HookContext {
            hook_type: HookType::PreToolUse,
            session_id: session.id.clone(),
            data: serde_json::json!({
                "tool_name": call.tool_name,
                "arguments": call.arguments,
            }),
        })
        .await;
    record_hook_chain(state, session, HookType::PreToolUse, &hook_outcome);
    if let Some(reason) = hook_outcome.blocked {
        return ToolOutcome::error(format!("blocked by hook: {reason}"));
    }
    let arguments = hook_outcome
        .modifications
        .as_ref()
        .and_then(|m| m.get("arguments").cloned())
        .unwrap_or_else(|| call.arguments.clone());

    // Guardrails.
    let info = session.info();
    let verdict = evaluate_all(
        &state.guardrails,
        &GuardrailInput {
            tool_name: &call.tool_name,
            arguments: &arguments,
            session_id: &session.id,
            workspace_id: &info.workspace_id,
        },
    );
    for warning in &verdict.warnings {
        tracing::warn!(tool = %call.tool_name, warning = %warning, "guardrail warning");
    }
    if verdict.blocked {
        let reason = verdict
            .reason
            .unwrap_or_else(|| "blocked by guardrail".into());
        return ToolOutcome::error(reason);
    }

    dispatch_tool(
        &state.tools,
        &call.tool_name,
        arguments,
        Duration::from_secs(state.config.timeouts.tool_secs),
        cancel.clone(),
    )
    .await
}
