use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Raw token usage as reported by a provider at stream end.
///
/// For Anthropic, `input_tokens`, `cache_read_tokens`, and
/// `cache_creation_tokens` are mutually exclusive slices of the context
/// window; other providers report the whole window in `input_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl StopReason {
    /// Terminal stop reasons end the turn; `ToolUse` loops back through
    /// tool execution.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StopReason::ToolUse)
    }
}

/// Typed chunks yielded by a provider's streaming generator.
///
/// Any concrete implementation satisfies this: thread + channel, task +
/// stream, callback pump. The pipeline only consumes "next chunk or done
/// or error".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamChunk {
    #[serde(rename = "start")]
    Start,

    #[serde(rename = "text_start")]
    TextStart,
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "text_end")]
    TextEnd,

    #[serde(rename = "thinking_start")]
    ThinkingStart,
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { text: String },
    #[serde(rename = "thinking_end")]
    ThinkingEnd,

    #[serde(rename = "toolcall_start")]
    ToolCallStart { call_id: String, tool_name: String },
    #[serde(rename = "toolcall_delta")]
    ToolCallDelta { call_id: String, delta: String },
    #[serde(rename = "toolcall_end")]
    ToolCallEnd {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "done")]
    Done {
        usage: RawUsage,
        stop_reason: StopReason,
    },

    #[serde(rename = "error")]
    Error { message: String, retryable: bool },
}
