//! Session registry and lifecycle.
//!
//! The orchestrator exclusively owns the active-session map. Registry
//! mutations take its lock briefly; per-session operations run under the
//! session's own linearization and never hold the registry lock, so
//! sessions progress independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use sb_context::manager::{CanAcceptTurn, CompactionPreview, ContextManager, ContextSnapshot};
use sb_domain::error::{Error, Result};
use sb_domain::event::{DeleteMode, Event, EventBody};
use sb_domain::session::{SessionInfo, SessionStats};
use sb_events::{EventFilter, NewSession, SinceQuery};
use sb_hooks::{HookContext, HookType};
use sb_protocol::ServerEventKind;

use crate::runtime::active::ActiveSession;
use crate::runtime::compaction::{run_compaction_locked, CompactionResult};
use crate::runtime::turn::{spawn_turn, TurnOptions};
use crate::runtime::{emit, emit_event, projection, record_hook_chain, EventHookSink};
use crate::state::CoreState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request/response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct CreateSessionOpts {
    pub workspace_id: String,
    pub working_directory: String,
    pub model: String,
    pub title: Option<String>,
}

/// What `agent.getState` reports.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub session_id: String,
    pub is_running: bool,
    pub snapshot: ContextSnapshot,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    state: CoreState,
    sessions: RwLock<HashMap<String, Arc<ActiveSession>>>,
    shutdown: AtomicBool,
}

impl Orchestrator {
    pub fn new(state: CoreState) -> Arc<Self> {
        Arc::new(Self {
            state,
            sessions: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> &CoreState {
        &self.state
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    fn window_for(&self, model: &str) -> u64 {
        self.state
            .providers
            .context_window(model, self.state.config.compaction.default_context_window)
    }

    fn build_active(
        &self,
        info: SessionInfo,
        messages: Vec<sb_domain::Message>,
    ) -> Arc<ActiveSession> {
        let mut manager = ContextManager::new(
            self.window_for(&info.model),
            self.state.config.compaction.clone(),
        );
        if !messages.is_empty() {
            manager.set_messages(messages);
        }
        Arc::new(ActiveSession::new(info, manager))
    }

    fn active(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.read().get(session_id).cloned()
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    pub async fn create_session(&self, opts: CreateSessionOpts) -> Result<SessionInfo> {
        self.ensure_open()?;

        let (info, root) = self
            .state
            .store
            .create_session(NewSession {
                workspace_id: opts.workspace_id,
                working_directory: opts.working_directory,
                model: opts.model,
                title: opts.title,
            })
            .map_err(sb_domain::Error::from)?;
        emit_event(&self.state, &root);

        let session = self.build_active(info.clone(), Vec::new());
        self.sessions.write().insert(info.id.clone(), session.clone());

        emit(
            &self.state,
            ServerEventKind::SessionCreated,
            &info.id,
            serde_json::to_value(&info).unwrap_or_default(),
        );

        // Session-start hooks: blocking chain first, observers behind it.
        let hook_ctx = HookContext {
            hook_type: HookType::SessionStart,
            session_id: info.id.clone(),
            data: serde_json::json!({"workspace_id": info.workspace_id}),
        };
        let outcome = self.state.hooks.run_blocking(&hook_ctx).await;
        record_hook_chain(&self.state, &session, HookType::SessionStart, &outcome);
        self.state.hooks.spawn_background(
            hook_ctx,
            Arc::new(EventHookSink {
                state: self.state.clone(),
            }),
        );

        Ok(info)
    }

    /// Load a session into memory, replaying its log into a fresh context.
    pub async fn resume_session(&self, session_id: &str) -> Result<SessionInfo> {
        self.ensure_open()?;

        if let Some(session) = self.active(session_id) {
            session.touch();
            return Ok(session.info());
        }

        let info = self
            .state
            .store
            .get_session(session_id)
            .map_err(sb_domain::Error::from)?;
        let events = self
            .state
            .store
            .get_events_by_session(session_id, &EventFilter::default())
            .map_err(sb_domain::Error::from)?;

        let projected = projection::project(&events);
        let session = self.build_active(info.clone(), projected.messages);
        {
            let mut skills = session.skills.lock();
            let mut subagents = session.subagents.lock();
            for event in &events {
                skills.replay(event);
                subagents.replay(event);
            }
        }
        self.state.store.set_active(session_id, true).map_err(sb_domain::Error::from)?;
        self.sessions
            .write()
            .insert(session_id.to_owned(), session.clone());

        tracing::info!(
            session_id,
            events = events.len(),
            messages = session.context.lock().messages().len(),
            "session resumed"
        );
        Ok(session.info())
    }

    /// The active record, resuming from the store when needed.
    pub async fn require_active(&self, session_id: &str) -> Result<Arc<ActiveSession>> {
        if let Some(session) = self.active(session_id) {
            return Ok(session);
        }
        self.resume_session(session_id).await?;
        self.active(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))
    }

    /// Explicit close: terminal `session.end`, then unload.
    pub async fn close_session(&self, session_id: &str, reason: Option<String>) -> Result<()> {
        let session = self.require_active(session_id).await?;
        let ev = session.append_event(
            &self.state.store,
            EventBody::SessionEnd { reason },
            None,
        )?;
        emit_event(&self.state, &ev);
        self.state
            .store
            .set_active(session_id, false)
            .map_err(sb_domain::Error::from)?;
        self.sessions.write().remove(session_id);
        emit(
            &self.state,
            ServerEventKind::SessionEnded,
            session_id,
            serde_json::json!({"session_id": session_id}),
        );
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.state.cancel_map.cancel(session_id);
        self.sessions.write().remove(session_id);
        self.state
            .store
            .delete_session(session_id)
            .map_err(sb_domain::Error::from)?;
        Ok(())
    }

    pub fn list_sessions(
        &self,
        workspace_id: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<SessionInfo>> {
        self.state
            .store
            .list_sessions(workspace_id, include_archived)
            .map_err(Into::into)
    }

    pub fn set_archived(&self, session_id: &str, archived: bool) -> Result<()> {
        if archived {
            self.sessions.write().remove(session_id);
        }
        self.state
            .store
            .set_archived(session_id, archived)
            .map_err(Into::into)
    }

    pub fn session_stats(&self, session_id: &str) -> Result<SessionStats> {
        self.state
            .store
            .session_stats(session_id)
            .map_err(Into::into)
    }

    // ── Fork ──────────────────────────────────────────────────────

    /// Create a new session rooted at an existing event and load it with the
    /// ancestors' projection (eager replay).
    pub async fn fork_session(
        &self,
        from_event_id: &Uuid,
        name: Option<String>,
    ) -> Result<SessionInfo> {
        self.ensure_open()?;

        let (info, root) = self
            .state
            .store
            .fork(from_event_id, name)
            .map_err(sb_domain::Error::from)?;
        emit_event(&self.state, &root);

        let ancestors = self
            .state
            .store
            .get_ancestors(&root.id)
            .map_err(sb_domain::Error::from)?;
        let projected = projection::project(&ancestors);

        let session = self.build_active(info.clone(), projected.messages);
        self.sessions.write().insert(info.id.clone(), session);

        emit(
            &self.state,
            ServerEventKind::SessionForked,
            &info.id,
            serde_json::json!({
                "session_id": info.id,
                "source_session_id": info.parent_session_id,
                "fork_event_id": from_event_id,
            }),
        );
        Ok(info)
    }

    // ── Context operations ────────────────────────────────────────

    pub async fn get_context_snapshot(&self, session_id: &str) -> Result<ContextSnapshot> {
        Ok(self.require_active(session_id).await?.snapshot())
    }

    pub async fn get_detailed_context_snapshot(
        &self,
        session_id: &str,
    ) -> Result<serde_json::Value> {
        let session = self.require_active(session_id).await?;
        let snapshot = session.snapshot();
        let stats = self.session_stats(session_id)?;
        let (history, totals) = {
            let tokens = session.tokens.lock();
            (
                serde_json::to_value(tokens.history()).unwrap_or_default(),
                serde_json::json!({
                    "input_tokens": tokens.total_input_tokens(),
                    "output_tokens": tokens.total_output_tokens(),
                }),
            )
        };
        Ok(serde_json::json!({
            "snapshot": snapshot,
            "stats": stats,
            "token_history": history,
            "accumulated": totals,
            "skills": session.skills.lock().list(),
            "subagents_running": session.subagents.lock().running().len(),
        }))
    }

    pub async fn should_compact(&self, session_id: &str) -> Result<bool> {
        let session = self.require_active(session_id).await?;
        let result = session.context.lock().should_compact();
        Ok(result)
    }

    /// Read-style acquire: previews share with each other but exclude a
    /// running turn or confirm.
    pub async fn preview_compaction(&self, session_id: &str) -> Result<CompactionPreview> {
        let session = self.require_active(session_id).await?;
        let _shared = session.turn_lock.read().await;
        let result = session.context.lock().preview_compaction();
        Ok(result)
    }

    pub async fn confirm_compaction(&self, session_id: &str) -> Result<CompactionResult> {
        let session = self.require_active(session_id).await?;
        let _exclusive = session.turn_lock.write().await;
        run_compaction_locked(&self.state, &session).await
    }

    pub async fn can_accept_turn(
        &self,
        session_id: &str,
        estimated_response_tokens: u64,
    ) -> Result<CanAcceptTurn> {
        let session = self.require_active(session_id).await?;
        let result = session.context.lock().can_accept_turn(estimated_response_tokens);
        Ok(result)
    }

    /// Drop the buffer and record `context.cleared`.
    pub async fn clear_context(&self, session_id: &str) -> Result<()> {
        let session = self.require_active(session_id).await?;
        let ev = session
            .with_turn_lock(|| async {
                let ev =
                    session.append_event(&self.state.store, EventBody::ContextCleared {}, None)?;
                session.context.lock().clear();
                Ok::<_, Error>(ev)
            })
            .await?;
        emit_event(&self.state, &ev);
        emit(
            &self.state,
            ServerEventKind::AgentContextCleared,
            session_id,
            serde_json::json!({}),
        );
        Ok(())
    }

    // ── Turns ─────────────────────────────────────────────────────

    /// Start a turn. Acknowledges immediately with the turn id; output flows
    /// as events.
    pub async fn prompt(
        &self,
        session_id: &str,
        prompt: impl Into<String>,
        opts: TurnOptions,
    ) -> Result<Uuid> {
        self.ensure_open()?;
        let session = self.require_active(session_id).await?;
        Ok(spawn_turn(self.state.clone(), session, prompt.into(), opts))
    }

    /// Signal the session's cancellation token. Returns whether a turn was
    /// running.
    pub fn abort(&self, session_id: &str) -> bool {
        self.state.cancel_map.cancel(session_id)
    }

    pub async fn get_state(&self, session_id: &str) -> Result<AgentState> {
        let session = self.require_active(session_id).await?;
        Ok(AgentState {
            session_id: session_id.to_owned(),
            is_running: self.state.cancel_map.is_running(session_id),
            snapshot: session.snapshot(),
        })
    }

    // ── Config mutations ──────────────────────────────────────────

    /// Record a model switch; the pipeline consults it on the next turn.
    pub async fn switch_model(&self, session_id: &str, model_spec: &str) -> Result<()> {
        let session = self.require_active(session_id).await?;
        let from_model = session.model();
        let ev = session.append_event(
            &self.state.store,
            EventBody::ConfigModelSwitch {
                from_model: Some(from_model),
                to_model: model_spec.to_owned(),
            },
            None,
        )?;
        emit_event(&self.state, &ev);

        self.state
            .store
            .set_model(session_id, model_spec)
            .map_err(sb_domain::Error::from)?;
        session.set_model(model_spec);
        session
            .context
            .lock()
            .resize_window(self.window_for(model_spec));
        Ok(())
    }

    // ── Events passthrough ────────────────────────────────────────

    pub fn get_history(
        &self,
        session_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<Event>> {
        self.state
            .store
            .get_events_by_session(session_id, filter)
            .map_err(Into::into)
    }

    pub fn get_events_since(&self, query: &SinceQuery) -> Result<Vec<Event>> {
        self.state.store.get_events_since(query).map_err(Into::into)
    }

    pub fn append_event(
        &self,
        session_id: &str,
        body: EventBody,
        parent_id: Option<Uuid>,
    ) -> Result<Event> {
        let ev = self
            .state
            .store
            .append(sb_events::AppendEvent {
                session_id: session_id.to_owned(),
                body,
                parent_id,
            })
            .map_err(sb_domain::Error::from)?;
        emit_event(&self.state, &ev);
        Ok(ev)
    }

    pub async fn delete_message(
        &self,
        event_id: &Uuid,
        mode: DeleteMode,
    ) -> Result<Event> {
        let marker = self
            .state
            .store
            .delete_message(event_id, mode)
            .map_err(sb_domain::Error::from)?;
        emit_event(&self.state, &marker);
        emit(
            &self.state,
            ServerEventKind::AgentMessageDeleted,
            &marker.session_id,
            serde_json::json!({"target_event_id": event_id}),
        );

        // Refresh the in-memory buffer if the session is loaded. Takes the
        // turn lock so a streaming turn never observes a half-applied buffer.
        if let Some(session) = self.active(&marker.session_id) {
            let _exclusive = session.turn_lock.write().await;
            let events = self
                .state
                .store
                .get_events_by_session(&marker.session_id, &EventFilter::default())
                .map_err(sb_domain::Error::from)?;
            let projected = projection::project(&events);
            session.context.lock().set_messages(projected.messages);
        }
        Ok(marker)
    }

    // ── Maintenance ───────────────────────────────────────────────

    /// Unload sessions idle beyond the configured limit. The journal stays.
    pub fn evict_idle(&self) -> usize {
        let Some(limit_min) = self.state.config.limits.idle_evict_minutes else {
            return 0;
        };
        let cutoff = chrono::Utc::now() - chrono::Duration::minutes(limit_min as i64);

        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, session| {
            if self.state.cancel_map.is_running(id) {
                return true;
            }
            let keep = session.info().last_activity > cutoff;
            if !keep {
                let _ = self.state.store.set_active(id, false);
                tracing::info!(session_id = %id, "evicting idle session");
            }
            keep
        });
        before - sessions.len()
    }

    /// Stop intake, cancel running turns, wait for background hooks, and
    /// unload every session. Journals remain on disk.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.state.cancel_map.cancel_all();

        let grace = Duration::from_secs(self.state.config.timeouts.shutdown_grace_secs);
        if !self.state.hooks.tracker().wait_idle(grace).await {
            tracing::warn!(
                pending = self.state.hooks.tracker().pending(),
                "background hooks still pending at shutdown"
            );
        }

        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for id in &ids {
            let _ = self.state.store.set_active(id, false);
        }
        self.sessions.write().clear();
        tracing::info!(sessions = ids.len(), "orchestrator shut down");
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }
}
