//! The in-memory half of a session: the linearization context.
//!
//! An `ActiveSession` exclusively owns its context manager, token state, and
//! trackers. The turn lock is the per-session linearization point: a
//! streaming turn or a compaction confirm takes the write side; previews
//! share the read side. Cross-session operations never touch each other's
//! locks.

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use sb_context::manager::{ContextManager, ContextSnapshot};
use sb_context::tokens::TokenState;
use sb_domain::error::Result;
use sb_domain::event::{Event, EventBody};
use sb_domain::session::SessionInfo;
use sb_events::{AppendEvent, EventStore};

use crate::runtime::trackers::{SkillTracker, SubagentTracker};

pub struct ActiveSession {
    pub id: String,
    info: RwLock<SessionInfo>,
    pub context: Mutex<ContextManager>,
    pub tokens: Mutex<TokenState>,
    pub skills: Mutex<SkillTracker>,
    pub subagents: Mutex<SubagentTracker>,
    /// Write = streaming turn or compaction confirm; read = preview.
    pub turn_lock: tokio::sync::RwLock<()>,
}

impl ActiveSession {
    pub fn new(info: SessionInfo, context: ContextManager) -> Self {
        Self {
            id: info.id.clone(),
            info: RwLock::new(info),
            context: Mutex::new(context),
            tokens: Mutex::new(TokenState::new()),
            skills: Mutex::new(SkillTracker::new()),
            subagents: Mutex::new(SubagentTracker::new()),
            turn_lock: tokio::sync::RwLock::new(()),
        }
    }

    pub fn info(&self) -> SessionInfo {
        self.info.read().clone()
    }

    pub fn model(&self) -> String {
        self.info.read().model.clone()
    }

    pub fn set_model(&self, model: &str) {
        self.info.write().model = model.to_owned();
    }

    pub fn touch(&self) {
        self.info.write().last_activity = chrono::Utc::now();
    }

    /// Whether a new turn could start right now (nothing holds the lock).
    pub fn accepts_turn(&self) -> bool {
        self.turn_lock.try_write().is_ok()
    }

    /// Run `f` holding the exclusive side of the turn lock. Only one turn
    /// (or compaction confirm) runs at a time per session; previews take the
    /// shared side directly.
    pub async fn with_turn_lock<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _exclusive = self.turn_lock.write().await;
        f().await
    }

    /// Append one event for this session through the shared store.
    pub fn append_event(
        &self,
        store: &EventStore,
        body: EventBody,
        parent_id: Option<Uuid>,
    ) -> Result<Event> {
        self.touch();
        store
            .append(AppendEvent {
                session_id: self.id.clone(),
                body,
                parent_id,
            })
            .map_err(Into::into)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        self.context.lock().snapshot()
    }
}
