//! RPC wire model: request/response envelopes, the error code taxonomy, and
//! the server-to-client event envelope.
//!
//! The core is transport-agnostic; the surrounding host wires these types to
//! WebSocket frames, HTTP push, or any other bidirectional channel. All
//! payloads are language-neutral JSON records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests & responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client → server request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    /// Dotted method name, e.g. `"session.create"`.
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// When present, repeated requests with the same key from the same
    /// connection return the cached response without re-dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Server → client response. Exactly one per request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

/// The client-visible error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParams,
    MethodNotFound,
    /// A manager the method requires was not wired into the dispatch context.
    NotAvailable,
    SessionNotFound,
    AlreadyExists,
    ParentNotFound,
    PermissionDenied,
    FileNotFound,
    FileError,
    InternalError,
    Blocked,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server → client push event, fanned out to every connection subscribed to
/// the event's session. Delivery is best-effort per connection; ordering per
/// `(connection, session)` is preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: ServerEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl ServerEvent {
    pub fn new(kind: ServerEventKind, session_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            session_id,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Push event discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerEventKind {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.ended")]
    SessionEnded,
    #[serde(rename = "session.forked")]
    SessionForked,

    #[serde(rename = "agent.turn")]
    AgentTurn,
    #[serde(rename = "agent.text_delta")]
    AgentTextDelta,
    #[serde(rename = "agent.thinking_delta")]
    AgentThinkingDelta,
    #[serde(rename = "agent.tool_start")]
    AgentToolStart,
    #[serde(rename = "agent.tool_result")]
    AgentToolResult,
    #[serde(rename = "agent.message_deleted")]
    AgentMessageDeleted,
    #[serde(rename = "agent.context_cleared")]
    AgentContextCleared,
    #[serde(rename = "agent.compaction")]
    AgentCompaction,
    #[serde(rename = "agent.error")]
    AgentError,

    /// A raw log event was appended (delta-sync feed for clients).
    #[serde(rename = "event.new")]
    EventNew,

    #[serde(rename = "browser.frame")]
    BrowserFrame,
    #[serde(rename = "browser.closed")]
    BrowserClosed,

    #[serde(rename = "hook.triggered")]
    HookTriggered,
    #[serde(rename = "hook.completed")]
    HookCompleted,
    #[serde(rename = "hook.background_started")]
    HookBackgroundStarted,
    #[serde(rename = "hook.background_completed")]
    HookBackgroundCompleted,
}
