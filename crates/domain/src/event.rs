//! The event catalogue: every semantic change to a session is one immutable
//! event appended to the log.
//!
//! Two views of the same catalogue:
//! - [`EventType`], a field-less discriminator used for query filters and the
//!   store's indexed `type` column;
//! - [`EventBody`], the serde-tagged payload enum. Each variant serializes to
//!   `{"type": "<dotted.name>", ...payload fields}` in one blob per event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ContentPart;
use crate::stream::{RawUsage, StopReason};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One immutable record in the session log.
///
/// `parent_id` is the only structural pointer: child points at parent, never
/// the reverse, so the ancestor walk is a pure chase with no back-pointers.
/// `sequence` is dense and strictly increasing within a session; it is a
/// performance aid, the parent chain is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub session_id: String,
    pub workspace_id: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: i64,
    #[serde(flatten)]
    pub body: EventBody,
    /// Hex SHA-256 of `parent_id ∥ payload`, when integrity auditing is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.body.event_type()
    }
}

/// How a deleted message is treated by projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Hidden from projections; the event remains in the log.
    Soft,
    /// Hidden and excluded from exports as well.
    Purge,
}

/// One entry in a `todo.updated` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBody — tagged payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The typed payload of an event. Serializes with a `type` tag holding the
/// dotted event name, payload fields inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventBody {
    // ── Session lifecycle ─────────────────────────────────────────
    #[serde(rename = "session.start")]
    SessionStart {
        workspace_id: String,
        working_directory: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    #[serde(rename = "session.end")]
    SessionEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "session.fork")]
    SessionFork {
        source_session_id: String,
        fork_event_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    // ── Conversation ──────────────────────────────────────────────
    #[serde(rename = "message.user")]
    MessageUser { content: String },
    #[serde(rename = "message.assistant")]
    MessageAssistant {
        blocks: Vec<ContentPart>,
        usage: RawUsage,
        stop_reason: StopReason,
    },
    #[serde(rename = "message.system")]
    MessageSystem { content: String },
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        target_event_id: Uuid,
        mode: DeleteMode,
    },

    // ── Tools ─────────────────────────────────────────────────────
    #[serde(rename = "tool.call")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename = "tool.result")]
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },

    // ── Streaming reconstruction ──────────────────────────────────
    #[serde(rename = "stream.text_delta")]
    StreamTextDelta { text: String },
    #[serde(rename = "stream.thinking_delta")]
    StreamThinkingDelta { text: String },
    #[serde(rename = "stream.turn_start")]
    StreamTurnStart { turn: u32 },
    #[serde(rename = "stream.turn_end")]
    StreamTurnEnd {
        turn: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
    },

    // ── Config ────────────────────────────────────────────────────
    #[serde(rename = "config.model_switch")]
    ConfigModelSwitch {
        #[serde(skip_serializing_if = "Option::is_none")]
        from_model: Option<String>,
        to_model: String,
    },
    #[serde(rename = "config.prompt_update")]
    ConfigPromptUpdate { prompt: String },
    #[serde(rename = "config.reasoning_level")]
    ConfigReasoningLevel { level: String },

    // ── Compaction ────────────────────────────────────────────────
    #[serde(rename = "compact.boundary")]
    CompactBoundary {
        from_event_id: Uuid,
        to_event_id: Uuid,
        original_tokens: u64,
        compacted_tokens: u64,
    },
    #[serde(rename = "compact.summary")]
    CompactSummary {
        summary: String,
        boundary_event_id: Uuid,
    },
    #[serde(rename = "context.cleared")]
    ContextCleared {},

    // ── Worktree ──────────────────────────────────────────────────
    #[serde(rename = "worktree.acquired")]
    WorktreeAcquired { path: String, branch: String },
    #[serde(rename = "worktree.commit")]
    WorktreeCommit { sha: String, message: String },
    #[serde(rename = "worktree.released")]
    WorktreeReleased { path: String },
    #[serde(rename = "worktree.merged")]
    WorktreeMerged { target_branch: String },

    // ── Hooks ─────────────────────────────────────────────────────
    #[serde(rename = "hook.triggered")]
    HookTriggered { hook_name: String, hook_type: String },
    #[serde(rename = "hook.completed")]
    HookCompleted { hook_name: String, outcome: String },
    #[serde(rename = "hook.background_started")]
    HookBackgroundStarted { hook_name: String },
    #[serde(rename = "hook.background_completed")]
    HookBackgroundCompleted {
        hook_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // ── Errors ────────────────────────────────────────────────────
    #[serde(rename = "error.agent")]
    ErrorAgent { message: String, recoverable: bool },
    #[serde(rename = "error.tool")]
    ErrorTool {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        message: String,
    },
    #[serde(rename = "error.provider")]
    ErrorProvider {
        provider: String,
        message: String,
        retryable: bool,
    },

    // ── Subagents ─────────────────────────────────────────────────
    #[serde(rename = "subagent.started")]
    SubagentStarted { subagent_id: String, task: String },
    #[serde(rename = "subagent.completed")]
    SubagentCompleted {
        subagent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },

    // ── Skills ────────────────────────────────────────────────────
    #[serde(rename = "skill.added")]
    SkillAdded { name: String },
    #[serde(rename = "skill.removed")]
    SkillRemoved { name: String },

    // ── Todos / memory / files ────────────────────────────────────
    #[serde(rename = "todo.updated")]
    TodoUpdated { items: Vec<TodoItem> },
    #[serde(rename = "memory.captured")]
    MemoryCaptured {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    #[serde(rename = "file.read")]
    FileRead { path: String },
    #[serde(rename = "file.write")]
    FileWrite { path: String },
    #[serde(rename = "file.edit")]
    FileEdit { path: String },
}

impl EventBody {
    pub fn event_type(&self) -> EventType {
        match self {
            EventBody::SessionStart { .. } => EventType::SessionStart,
            EventBody::SessionEnd { .. } => EventType::SessionEnd,
            EventBody::SessionFork { .. } => EventType::SessionFork,
            EventBody::MessageUser { .. } => EventType::MessageUser,
            EventBody::MessageAssistant { .. } => EventType::MessageAssistant,
            EventBody::MessageSystem { .. } => EventType::MessageSystem,
            EventBody::MessageDeleted { .. } => EventType::MessageDeleted,
            EventBody::ToolCall { .. } => EventType::ToolCall,
            EventBody::ToolResult { .. } => EventType::ToolResult,
            EventBody::StreamTextDelta { .. } => EventType::StreamTextDelta,
            EventBody::StreamThinkingDelta { .. } => EventType::StreamThinkingDelta,
            EventBody::StreamTurnStart { .. } => EventType::StreamTurnStart,
            EventBody::StreamTurnEnd { .. } => EventType::StreamTurnEnd,
            EventBody::ConfigModelSwitch { .. } => EventType::ConfigModelSwitch,
            EventBody::ConfigPromptUpdate { .. } => EventType::ConfigPromptUpdate,
            EventBody::ConfigReasoningLevel { .. } => EventType::ConfigReasoningLevel,
            EventBody::CompactBoundary { .. } => EventType::CompactBoundary,
            EventBody::CompactSummary { .. } => EventType::CompactSummary,
            EventBody::ContextCleared {} => EventType::ContextCleared,
            EventBody::WorktreeAcquired { .. } => EventType::WorktreeAcquired,
            EventBody::WorktreeCommit { .. } => EventType::WorktreeCommit,
            EventBody::WorktreeReleased { .. } => EventType::WorktreeReleased,
            EventBody::WorktreeMerged { .. } => EventType::WorktreeMerged,
            EventBody::HookTriggered { .. } => EventType::HookTriggered,
            EventBody::HookCompleted { .. } => EventType::HookCompleted,
            EventBody::HookBackgroundStarted { .. } => EventType::HookBackgroundStarted,
            EventBody::HookBackgroundCompleted { .. } => EventType::HookBackgroundCompleted,
            EventBody::ErrorAgent { .. } => EventType::ErrorAgent,
            EventBody::ErrorTool { .. } => EventType::ErrorTool,
            EventBody::ErrorProvider { .. } => EventType::ErrorProvider,
            EventBody::SubagentStarted { .. } => EventType::SubagentStarted,
            EventBody::SubagentCompleted { .. } => EventType::SubagentCompleted,
            EventBody::SkillAdded { .. } => EventType::SkillAdded,
            EventBody::SkillRemoved { .. } => EventType::SkillRemoved,
            EventBody::TodoUpdated { .. } => EventType::TodoUpdated,
            EventBody::MemoryCaptured { .. } => EventType::MemoryCaptured,
            EventBody::FileRead { .. } => EventType::FileRead,
            EventBody::FileWrite { .. } => EventType::FileWrite,
            EventBody::FileEdit { .. } => EventType::FileEdit,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventType — field-less discriminator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All event type discriminators, serialized as the dotted names clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.end")]
    SessionEnd,
    #[serde(rename = "session.fork")]
    SessionFork,
    #[serde(rename = "message.user")]
    MessageUser,
    #[serde(rename = "message.assistant")]
    MessageAssistant,
    #[serde(rename = "message.system")]
    MessageSystem,
    #[serde(rename = "message.deleted")]
    MessageDeleted,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,
    #[serde(rename = "stream.text_delta")]
    StreamTextDelta,
    #[serde(rename = "stream.thinking_delta")]
    StreamThinkingDelta,
    #[serde(rename = "stream.turn_start")]
    StreamTurnStart,
    #[serde(rename = "stream.turn_end")]
    StreamTurnEnd,
    #[serde(rename = "config.model_switch")]
    ConfigModelSwitch,
    #[serde(rename = "config.prompt_update")]
    ConfigPromptUpdate,
    #[serde(rename = "config.reasoning_level")]
    ConfigReasoningLevel,
    #[serde(rename = "compact.boundary")]
    CompactBoundary,
    #[serde(rename = "compact.summary")]
    CompactSummary,
    #[serde(rename = "context.cleared")]
    ContextCleared,
    #[serde(rename = "worktree.acquired")]
    WorktreeAcquired,
    #[serde(rename = "worktree.commit")]
    WorktreeCommit,
    #[serde(rename = "worktree.released")]
    WorktreeReleased,
    #[serde(rename = "worktree.merged")]
    WorktreeMerged,
    #[serde(rename = "hook.triggered")]
    HookTriggered,
    #[serde(rename = "hook.completed")]
    HookCompleted,
    #[serde(rename = "hook.background_started")]
    HookBackgroundStarted,
    #[serde(rename = "hook.background_completed")]
    HookBackgroundCompleted,
    #[serde(rename = "error.agent")]
    ErrorAgent,
    #[serde(rename = "error.tool")]
    ErrorTool,
    #[serde(rename = "error.provider")]
    ErrorProvider,
    #[serde(rename = "subagent.started")]
    SubagentStarted,
    #[serde(rename = "subagent.completed")]
    SubagentCompleted,
    #[serde(rename = "skill.added")]
    SkillAdded,
    #[serde(rename = "skill.removed")]
    SkillRemoved,
    #[serde(rename = "todo.updated")]
    TodoUpdated,
    #[serde(rename = "memory.captured")]
    MemoryCaptured,
    #[serde(rename = "file.read")]
    FileRead,
    #[serde(rename = "file.write")]
    FileWrite,
    #[serde(rename = "file.edit")]
    FileEdit,
}

impl EventType {
    /// The dotted wire name (also the store's `type` column value).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "session.start",
            EventType::SessionEnd => "session.end",
            EventType::SessionFork => "session.fork",
            EventType::MessageUser => "message.user",
            EventType::MessageAssistant => "message.assistant",
            EventType::MessageSystem => "message.system",
            EventType::MessageDeleted => "message.deleted",
            EventType::ToolCall => "tool.call",
            EventType::ToolResult => "tool.result",
            EventType::StreamTextDelta => "stream.text_delta",
            EventType::StreamThinkingDelta => "stream.thinking_delta",
            EventType::StreamTurnStart => "stream.turn_start",
            EventType::StreamTurnEnd => "stream.turn_end",
            EventType::ConfigModelSwitch => "config.model_switch",
            EventType::ConfigPromptUpdate => "config.prompt_update",
            EventType::ConfigReasoningLevel => "config.reasoning_level",
            EventType::CompactBoundary => "compact.boundary",
            EventType::CompactSummary => "compact.summary",
            EventType::ContextCleared => "context.cleared",
            EventType::WorktreeAcquired => "worktree.acquired",
            EventType::WorktreeCommit => "worktree.commit",
            EventType::WorktreeReleased => "worktree.released",
            EventType::WorktreeMerged => "worktree.merged",
            EventType::HookTriggered => "hook.triggered",
            EventType::HookCompleted => "hook.completed",
            EventType::HookBackgroundStarted => "hook.background_started",
            EventType::HookBackgroundCompleted => "hook.background_completed",
            EventType::ErrorAgent => "error.agent",
            EventType::ErrorTool => "error.tool",
            EventType::ErrorProvider => "error.provider",
            EventType::SubagentStarted => "subagent.started",
            EventType::SubagentCompleted => "subagent.completed",
            EventType::SkillAdded => "skill.added",
            EventType::SkillRemoved => "skill.removed",
            EventType::TodoUpdated => "todo.updated",
            EventType::MemoryCaptured => "memory.captured",
            EventType::FileRead => "file.read",
            EventType::FileWrite => "file.write",
            EventType::FileEdit => "file.edit",
        }
    }

    /// Conversation-level message events (drive the `message_count` stat).
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            EventType::MessageUser | EventType::MessageAssistant | EventType::MessageSystem
        )
    }

    /// High-frequency streaming deltas, persisted for resume but excluded
    /// from message projections.
    pub fn is_stream_delta(&self) -> bool {
        matches!(
            self,
            EventType::StreamTextDelta | EventType::StreamThinkingDelta
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EventType::ErrorAgent | EventType::ErrorTool | EventType::ErrorProvider
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| crate::error::Error::Other(format!("unknown event type: {s}")))
    }
}
