//! The RPC method table: every method the surface exposes, with its
//! required params and managers, wired to the orchestrator.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use sb_domain::event::{EventBody, EventType};
use sb_events::{EventFilter, SinceQuery};
use sb_protocol::{ErrorCode, ServerEventKind};

use crate::runtime::orchestrator::CreateSessionOpts;
use crate::runtime::turn::TurnOptions;
use crate::runtime::{emit, emit_event};
use crate::rpc::registry::{
    handler, opt_bool_param, opt_str_param, opt_u64_param, str_param, uuid_param, Manager,
    MethodCtx, MethodDef, MethodError, MethodRegistry,
};

fn json<T: Serialize>(value: T) -> Result<serde_json::Value, MethodError> {
    serde_json::to_value(value)
        .map_err(|e| MethodError::new(ErrorCode::InternalError, e.to_string()))
}

pub fn build_registry(available: HashSet<Manager>) -> MethodRegistry {
    let mut reg = MethodRegistry::new(available);

    // ── session.* ─────────────────────────────────────────────────
    reg.register(MethodDef {
        name: "session.create",
        required_params: &["workspace_id", "working_directory", "model"],
        required_managers: &[Manager::Store, Manager::Orchestrator],
        handler: handler(session_create),
    });
    reg.register(MethodDef {
        name: "session.resume",
        required_params: &["session_id"],
        required_managers: &[Manager::Store, Manager::Orchestrator],
        handler: handler(session_resume),
    });
    reg.register(MethodDef {
        name: "session.list",
        required_params: &[],
        required_managers: &[Manager::Store],
        handler: handler(session_list),
    });
    reg.register(MethodDef {
        name: "session.delete",
        required_params: &["session_id"],
        required_managers: &[Manager::Store, Manager::Orchestrator],
        handler: handler(session_delete),
    });
    reg.register(MethodDef {
        name: "session.fork",
        required_params: &["from_event_id"],
        required_managers: &[Manager::Store, Manager::Orchestrator],
        handler: handler(session_fork),
    });
    reg.register(MethodDef {
        name: "session.archive",
        required_params: &["session_id"],
        required_managers: &[Manager::Store],
        handler: handler(session_archive),
    });
    reg.register(MethodDef {
        name: "session.unarchive",
        required_params: &["session_id"],
        required_managers: &[Manager::Store],
        handler: handler(session_unarchive),
    });

    // ── agent.* ───────────────────────────────────────────────────
    reg.register(MethodDef {
        name: "agent.prompt",
        required_params: &["session_id", "prompt"],
        required_managers: &[Manager::Store, Manager::Orchestrator, Manager::Providers],
        handler: handler(agent_prompt),
    });
    reg.register(MethodDef {
        name: "agent.abort",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(agent_abort),
    });
    reg.register(MethodDef {
        name: "agent.getState",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(agent_get_state),
    });

    // ── events.* ──────────────────────────────────────────────────
    reg.register(MethodDef {
        name: "events.getHistory",
        required_params: &["session_id"],
        required_managers: &[Manager::Store],
        handler: handler(events_get_history),
    });
    reg.register(MethodDef {
        name: "events.getSince",
        required_params: &[],
        required_managers: &[Manager::Store],
        handler: handler(events_get_since),
    });
    reg.register(MethodDef {
        name: "events.append",
        required_params: &["session_id", "event"],
        required_managers: &[Manager::Store],
        handler: handler(events_append),
    });

    // ── model.* ───────────────────────────────────────────────────
    reg.register(MethodDef {
        name: "model.switch",
        required_params: &["session_id", "model"],
        required_managers: &[Manager::Store, Manager::Orchestrator],
        handler: handler(model_switch),
    });
    reg.register(MethodDef {
        name: "model.list",
        required_params: &[],
        required_managers: &[Manager::Providers],
        handler: handler(model_list),
    });

    // ── context.* ─────────────────────────────────────────────────
    reg.register(MethodDef {
        name: "context.getSnapshot",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(context_get_snapshot),
    });
    reg.register(MethodDef {
        name: "context.getDetailed",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(context_get_detailed),
    });
    reg.register(MethodDef {
        name: "context.shouldCompact",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(context_should_compact),
    });
    reg.register(MethodDef {
        name: "context.previewCompaction",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(context_preview_compaction),
    });
    reg.register(MethodDef {
        name: "context.confirmCompaction",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator, Manager::Providers],
        handler: handler(context_confirm_compaction),
    });
    reg.register(MethodDef {
        name: "context.canAcceptTurn",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(context_can_accept_turn),
    });
    reg.register(MethodDef {
        name: "context.clear",
        required_params: &["session_id"],
        required_managers: &[Manager::Orchestrator],
        handler: handler(context_clear),
    });

    // ── memory.* ──────────────────────────────────────────────────
    reg.register(MethodDef {
        name: "memory.addEntry",
        required_params: &["session_id", "content"],
        required_managers: &[Manager::Store],
        handler: handler(memory_add_entry),
    });
    reg.register(MethodDef {
        name: "memory.search",
        required_params: &["query"],
        required_managers: &[Manager::Store],
        handler: handler(memory_search),
    });
    reg.register(MethodDef {
        name: "memory.getHandoffs",
        required_params: &["session_id"],
        required_managers: &[Manager::Store],
        handler: handler(memory_get_handoffs),
    });

    // ── file.* / filesystem.* ─────────────────────────────────────
    reg.register(MethodDef {
        name: "file.read",
        required_params: &["path"],
        required_managers: &[],
        handler: handler(file_read),
    });
    reg.register(MethodDef {
        name: "filesystem.createDir",
        required_params: &["path"],
        required_managers: &[],
        handler: handler(filesystem_create_dir),
    });

    // ── device.* / client.* ───────────────────────────────────────
    reg.register(MethodDef {
        name: "device.register",
        required_params: &["device_id"],
        required_managers: &[],
        handler: handler(device_register),
    });
    reg.register(MethodDef {
        name: "device.unregister",
        required_params: &["device_id"],
        required_managers: &[],
        handler: handler(device_unregister),
    });
    reg.register(MethodDef {
        name: "client.identify",
        required_params: &[],
        required_managers: &[],
        handler: handler(client_identify),
    });
    reg.register(MethodDef {
        name: "client.list",
        required_params: &[],
        required_managers: &[],
        handler: handler(client_list),
    });

    // ── system.* / tool.* ─────────────────────────────────────────
    reg.register(MethodDef {
        name: "system.ping",
        required_params: &[],
        required_managers: &[],
        handler: handler(system_ping),
    });
    reg.register(MethodDef {
        name: "system.getInfo",
        required_params: &[],
        required_managers: &[],
        handler: handler(system_get_info),
    });
    reg.register(MethodDef {
        name: "tool.result",
        required_params: &["session_id", "tool_call_id", "content"],
        required_managers: &[Manager::Store, Manager::Orchestrator],
        handler: handler(tool_result),
    });

    reg
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// session.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn session_create(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let info = ctx
        .orchestrator
        .create_session(CreateSessionOpts {
            workspace_id: str_param(&ctx.params, "workspace_id")?,
            working_directory: str_param(&ctx.params, "working_directory")?,
            model: str_param(&ctx.params, "model")?,
            title: opt_str_param(&ctx.params, "title"),
        })
        .await?;
    json(info)
}

async fn session_resume(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let info = ctx.orchestrator.resume_session(&session_id).await?;
    json(info)
}

async fn session_list(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let workspace = opt_str_param(&ctx.params, "workspace_id");
    let include_archived = opt_bool_param(&ctx.params, "include_archived").unwrap_or(false);
    let sessions = ctx
        .orchestrator
        .list_sessions(workspace.as_deref(), include_archived)?;
    json(sessions)
}

async fn session_delete(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    ctx.orchestrator.delete_session(&session_id).await?;
    Ok(serde_json::json!({"deleted": session_id}))
}

async fn session_fork(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let from_event_id = uuid_param(&ctx.params, "from_event_id")?;
    let name = opt_str_param(&ctx.params, "name");
    let info = ctx.orchestrator.fork_session(&from_event_id, name).await?;
    json(info)
}

async fn session_archive(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    ctx.orchestrator.set_archived(&session_id, true)?;
    Ok(serde_json::json!({"archived": session_id}))
}

async fn session_unarchive(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    ctx.orchestrator.set_archived(&session_id, false)?;
    Ok(serde_json::json!({"unarchived": session_id}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn agent_prompt(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let prompt = str_param(&ctx.params, "prompt")?;
    let mut opts = TurnOptions {
        model: opt_str_param(&ctx.params, "model"),
        ..Default::default()
    };
    if let Some(est) = opt_u64_param(&ctx.params, "estimated_response_tokens") {
        opts.estimated_response_tokens = est;
    }
    let turn_id = ctx.orchestrator.prompt(&session_id, prompt, opts).await?;
    Ok(serde_json::json!({"turn_id": turn_id, "accepted": true}))
}

async fn agent_abort(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let aborted = ctx.orchestrator.abort(&session_id);
    Ok(serde_json::json!({"aborted": aborted}))
}

async fn agent_get_state(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let state = ctx.orchestrator.get_state(&session_id).await?;
    json(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// events.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_types(params: &serde_json::Value) -> Result<Option<Vec<EventType>>, MethodError> {
    let Some(raw) = params.get("types").and_then(|v| v.as_array()) else {
        return Ok(None);
    };
    let mut types = Vec::with_capacity(raw.len());
    for item in raw {
        let s = item
            .as_str()
            .ok_or_else(|| MethodError::invalid_params("types must be an array of strings"))?;
        let ty = EventType::from_str(s)
            .map_err(|_| MethodError::invalid_params(format!("unknown event type: {s}")))?;
        types.push(ty);
    }
    Ok(Some(types))
}

async fn events_get_history(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let filter = EventFilter {
        types: parse_types(&ctx.params)?,
        limit: opt_u64_param(&ctx.params, "limit").map(|n| n as usize),
        before_event_id: opt_str_param(&ctx.params, "before_event_id")
            .map(|s| {
                s.parse()
                    .map_err(|_| MethodError::invalid_params("before_event_id must be a UUID"))
            })
            .transpose()?,
    };
    let events = ctx.orchestrator.get_history(&session_id, &filter)?;
    json(events)
}

async fn events_get_since(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let after_timestamp: Option<DateTime<Utc>> = opt_str_param(&ctx.params, "after_timestamp")
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| MethodError::invalid_params("after_timestamp must be RFC 3339"))
        })
        .transpose()?;
    let query = SinceQuery {
        session_id: opt_str_param(&ctx.params, "session_id"),
        workspace_id: opt_str_param(&ctx.params, "workspace_id"),
        after_event_id: opt_str_param(&ctx.params, "after_event_id")
            .map(|s| {
                s.parse()
                    .map_err(|_| MethodError::invalid_params("after_event_id must be a UUID"))
            })
            .transpose()?,
        after_timestamp,
        limit: opt_u64_param(&ctx.params, "limit").map(|n| n as usize),
    };
    let events = ctx.orchestrator.get_events_since(&query)?;
    json(events)
}

async fn events_append(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let body: EventBody = serde_json::from_value(
        ctx.params
            .get("event")
            .cloned()
            .ok_or_else(|| MethodError::invalid_params("missing event"))?,
    )
    .map_err(|e| MethodError::invalid_params(format!("bad event payload: {e}")))?;
    let parent_id = opt_str_param(&ctx.params, "parent_id")
        .map(|s| {
            s.parse()
                .map_err(|_| MethodError::invalid_params("parent_id must be a UUID"))
        })
        .transpose()?;
    let event = ctx.orchestrator.append_event(&session_id, body, parent_id)?;
    json(event)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// model.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn model_switch(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let model = str_param(&ctx.params, "model")?;
    ctx.orchestrator.switch_model(&session_id, &model).await?;
    Ok(serde_json::json!({"session_id": session_id, "model": model}))
}

async fn model_list(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let providers = ctx.orchestrator.state().providers.ids();
    Ok(serde_json::json!({"providers": providers}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// context.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn context_get_snapshot(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let snapshot = ctx.orchestrator.get_context_snapshot(&session_id).await?;
    json(snapshot)
}

async fn context_get_detailed(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let detailed = ctx
        .orchestrator
        .get_detailed_context_snapshot(&session_id)
        .await?;
    Ok(detailed)
}

async fn context_should_compact(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let should = ctx.orchestrator.should_compact(&session_id).await?;
    Ok(serde_json::json!({"should_compact": should}))
}

async fn context_preview_compaction(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let preview = ctx.orchestrator.preview_compaction(&session_id).await?;
    json(preview)
}

async fn context_confirm_compaction(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let result = ctx.orchestrator.confirm_compaction(&session_id).await?;
    json(result)
}

async fn context_can_accept_turn(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let estimate = opt_u64_param(&ctx.params, "estimated_response_tokens").unwrap_or(1024);
    let decision = ctx
        .orchestrator
        .can_accept_turn(&session_id, estimate)
        .await?;
    json(decision)
}

async fn context_clear(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    ctx.orchestrator.clear_context(&session_id).await?;
    Ok(serde_json::json!({"cleared": session_id}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memory.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn memory_add_entry(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let content = str_param(&ctx.params, "content")?;
    let source = opt_str_param(&ctx.params, "source");
    let event = ctx.orchestrator.append_event(
        &session_id,
        EventBody::MemoryCaptured { content, source },
        None,
    )?;
    json(event)
}

fn memory_hits(
    events: Vec<sb_domain::Event>,
    query: &str,
    limit: usize,
) -> Vec<serde_json::Value> {
    let needle = query.to_lowercase();
    events
        .into_iter()
        .filter_map(|e| match &e.body {
            EventBody::MemoryCaptured { content, source } => {
                if content.to_lowercase().contains(&needle) {
                    Some(serde_json::json!({
                        "event_id": e.id,
                        "session_id": e.session_id,
                        "content": content,
                        "source": source,
                        "timestamp": e.timestamp,
                    }))
                } else {
                    None
                }
            }
            _ => None,
        })
        .take(limit)
        .collect()
}

async fn memory_search(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let query = str_param(&ctx.params, "query")?;
    let limit = opt_u64_param(&ctx.params, "limit").unwrap_or(20) as usize;

    let events = match opt_str_param(&ctx.params, "session_id") {
        Some(session_id) => ctx.orchestrator.get_history(
            &session_id,
            &EventFilter {
                types: Some(vec![EventType::MemoryCaptured]),
                limit: None,
                before_event_id: None,
            },
        )?,
        None => ctx.orchestrator.get_events_since(&SinceQuery {
            workspace_id: opt_str_param(&ctx.params, "workspace_id"),
            ..Default::default()
        })?,
    };
    Ok(serde_json::json!({"hits": memory_hits(events, &query, limit)}))
}

async fn memory_get_handoffs(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let limit = opt_u64_param(&ctx.params, "limit").unwrap_or(10) as usize;
    let mut events = ctx.orchestrator.get_history(
        &session_id,
        &EventFilter {
            types: Some(vec![EventType::MemoryCaptured]),
            limit: None,
            before_event_id: None,
        },
    )?;
    events.reverse();
    events.truncate(limit);
    json(events)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file.* / filesystem.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn file_read(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let path = str_param(&ctx.params, "path")?;
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(serde_json::json!({"path": path, "content": content})),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MethodError::new(
            ErrorCode::FileNotFound,
            format!("no such file: {path}"),
        )),
        Err(e) => Err(MethodError::new(ErrorCode::FileError, e.to_string())),
    }
}

async fn filesystem_create_dir(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let path = str_param(&ctx.params, "path")?;
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|e| MethodError::new(ErrorCode::FileError, e.to_string()))?;
    Ok(serde_json::json!({"created": path}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// device.* / client.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn device_register(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let device_id = str_param(&ctx.params, "device_id")?;
    ctx.extras
        .devices
        .lock()
        .insert(device_id.clone(), ctx.params.clone());
    Ok(serde_json::json!({"registered": device_id}))
}

async fn device_unregister(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let device_id = str_param(&ctx.params, "device_id")?;
    let removed = ctx.extras.devices.lock().remove(&device_id).is_some();
    Ok(serde_json::json!({"removed": removed}))
}

async fn client_identify(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    ctx.extras
        .clients
        .lock()
        .insert(ctx.connection_id.clone(), ctx.params.clone());
    Ok(serde_json::json!({"connection_id": ctx.connection_id}))
}

async fn client_list(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let clients: Vec<serde_json::Value> = ctx
        .extras
        .clients
        .lock()
        .iter()
        .map(|(id, info)| serde_json::json!({"connection_id": id, "info": info}))
        .collect();
    Ok(serde_json::json!({"clients": clients}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// system.* / tool.*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn system_ping(_ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    Ok(serde_json::json!({"pong": true, "timestamp": Utc::now()}))
}

async fn system_get_info(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let state = ctx.orchestrator.state();
    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": ctx.orchestrator.active_count(),
        "connections": state.fanout.connection_count(),
        "uptime_secs": ctx.extras.started_at.elapsed().as_secs(),
    }))
}

/// Out-of-band tool completion (a remote node finished a tool call after
/// the turn moved on).
async fn tool_result(ctx: MethodCtx) -> Result<serde_json::Value, MethodError> {
    let session_id = str_param(&ctx.params, "session_id")?;
    let tool_call_id = str_param(&ctx.params, "tool_call_id")?;
    let content = str_param(&ctx.params, "content")?;
    let is_error = opt_bool_param(&ctx.params, "is_error").unwrap_or(false);

    let session = ctx.orchestrator.require_active(&session_id).await?;
    let state = ctx.orchestrator.state();
    let event = session.append_event(
        &state.store,
        EventBody::ToolResult {
            tool_call_id: tool_call_id.clone(),
            content: content.clone(),
            is_error,
        },
        None,
    )?;
    session
        .context
        .lock()
        .append_tool_result(&tool_call_id, &content, is_error);
    emit_event(state, &event);
    emit(
        state,
        ServerEventKind::AgentToolResult,
        &session_id,
        serde_json::json!({
            "call_id": tool_call_id,
            "content": content,
            "is_error": is_error,
        }),
    );
    json(event)
}
