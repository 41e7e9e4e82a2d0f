use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle points a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookType {
    PreToolUse,
    PostToolUse,
    SessionStart,
    Stop,
    PreCompact,
    UserPromptSubmit,
    Notification,
}

impl HookType {
    /// Hook types that gate an action the turn is about to take. These are
    /// forced blocking at registration, even if registered as background.
    pub fn forced_blocking(&self) -> bool {
        matches!(
            self,
            HookType::PreToolUse | HookType::UserPromptSubmit | HookType::PreCompact
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::PreToolUse => "PreToolUse",
            HookType::PostToolUse => "PostToolUse",
            HookType::SessionStart => "SessionStart",
            HookType::Stop => "Stop",
            HookType::PreCompact => "PreCompact",
            HookType::UserPromptSubmit => "UserPromptSubmit",
            HookType::Notification => "Notification",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookMode {
    Blocking,
    Background,
}

/// What a blocking hook wants done with the action it gated.
#[derive(Debug, Clone)]
pub enum HookDecision {
    Continue,
    /// Shallow-merged with other hooks' modifications; the caller applies
    /// the merged object.
    Modify { modifications: serde_json::Value },
    /// Skips remaining blocking hooks; the caller receives the reason.
    Block { reason: String },
}

/// Payload handed to a hook handler.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub hook_type: HookType,
    pub session_id: String,
    /// Point-specific data: tool name + arguments for tool hooks, the
    /// prompt for UserPromptSubmit, and so on.
    pub data: serde_json::Value,
}

#[async_trait::async_trait]
pub trait HookHandler: Send + Sync {
    async fn run(&self, ctx: &HookContext) -> sb_domain::Result<HookDecision>;
}

/// A registered hook.
pub struct HookRegistration {
    pub name: String,
    pub hook_type: HookType,
    /// Hooks of one type run in descending priority.
    pub priority: i32,
    /// Per-hook override; the engine default applies when `None`.
    pub timeout: Option<Duration>,
    pub mode: HookMode,
    pub handler: Arc<dyn HookHandler>,
}
