//! A deterministic provider that plays back canned chunk sequences.
//!
//! Used by the test suites across the workspace and usable by hosts that
//! want an offline dry-run mode. Each `stream()` call pops the next scripted
//! turn; an exhausted script yields a terminal error chunk so a test that
//! under-arms its script fails loudly.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use sb_domain::error::Result;
use sb_domain::stream::{RawUsage, StopReason, StreamChunk};
use sb_domain::token::ProviderKind;

use crate::traits::{ChunkStream, Provider, ProviderRequest};

pub struct ScriptedProvider {
    id: String,
    kind: ProviderKind,
    turns: Mutex<VecDeque<Vec<StreamChunk>>>,
    chunk_delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<ProviderRequest>>,
    window: Mutex<Option<u64>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            kind,
            turns: Mutex::new(VecDeque::new()),
            chunk_delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            window: Mutex::new(None),
        }
    }

    /// Delay between chunks, for tests that need time to interleave aborts.
    pub fn set_chunk_delay(&self, delay: Duration) {
        *self.chunk_delay.lock() = Some(delay);
    }

    /// Advertise a fixed context window for every model.
    pub fn set_context_window(&self, tokens: u64) {
        *self.window.lock() = Some(tokens);
    }

    /// Queue a raw chunk sequence as the next turn.
    pub fn push_turn(&self, chunks: Vec<StreamChunk>) {
        self.turns.lock().push_back(chunks);
    }

    /// Queue a plain text turn ending in `end_turn`.
    pub fn push_text_turn(&self, text: &str, input_tokens: u64, output_tokens: u64) {
        self.push_usage_turn(
            text,
            RawUsage {
                input_tokens,
                output_tokens,
                ..Default::default()
            },
        );
    }

    /// Queue a text turn with full usage control (cache counters included).
    pub fn push_usage_turn(&self, text: &str, usage: RawUsage) {
        self.push_turn(vec![
            StreamChunk::Start,
            StreamChunk::TextStart,
            StreamChunk::TextDelta { text: text.into() },
            StreamChunk::TextEnd,
            StreamChunk::Done {
                usage,
                stop_reason: StopReason::EndTurn,
            },
        ]);
    }

    /// Queue a turn that requests one tool call, then stops for tool use.
    pub fn push_tool_turn(
        &self,
        text: &str,
        call_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
        usage: RawUsage,
    ) {
        self.push_turn(vec![
            StreamChunk::Start,
            StreamChunk::TextStart,
            StreamChunk::TextDelta { text: text.into() },
            StreamChunk::TextEnd,
            StreamChunk::ToolCallStart {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
            },
            StreamChunk::ToolCallEnd {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
                arguments,
            },
            StreamChunk::Done {
                usage,
                stop_reason: StopReason::ToolUse,
            },
        ]);
    }

    /// Every request this provider has served, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn context_window(&self, _model: &str) -> Option<u64> {
        *self.window.lock()
    }

    async fn stream(&self, req: &ProviderRequest) -> Result<ChunkStream> {
        self.requests.lock().push(req.clone());

        let chunks = self.turns.lock().pop_front().unwrap_or_else(|| {
            vec![StreamChunk::Error {
                message: "scripted provider exhausted".into(),
                retryable: false,
            }]
        });
        let delay = *self.chunk_delay.lock();

        let stream = async_stream::stream! {
            for chunk in chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn req() -> ProviderRequest {
        ProviderRequest {
            model: "m".into(),
            messages: vec![],
            tools: vec![],
            max_tokens: None,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn plays_back_turns_in_order() {
        let provider = ScriptedProvider::new("test", ProviderKind::Openai);
        provider.push_text_turn("first", 10, 2);
        provider.push_text_turn("second", 20, 3);

        for expected in ["first", "second"] {
            let mut stream = provider.stream(&req()).await.unwrap();
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                if let StreamChunk::TextDelta { text: t } = chunk.unwrap() {
                    text.push_str(&t);
                }
            }
            assert_eq!(text, expected);
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_yields_error_chunk() {
        let provider = ScriptedProvider::new("test", ProviderKind::Openai);
        let mut stream = provider.stream(&req()).await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert!(matches!(chunk, StreamChunk::Error { .. }));
    }

    #[tokio::test]
    async fn tool_turn_ends_with_tool_use_stop() {
        let provider = ScriptedProvider::new("test", ProviderKind::Anthropic);
        provider.push_tool_turn(
            "let me check",
            "c1",
            "read_file",
            serde_json::json!({"path": "a.txt"}),
            RawUsage {
                input_tokens: 50,
                output_tokens: 10,
                ..Default::default()
            },
        );

        let mut stream = provider.stream(&req()).await.unwrap();
        let mut saw_tool = false;
        let mut stop = None;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                StreamChunk::ToolCallEnd { tool_name, .. } => {
                    saw_tool = true;
                    assert_eq!(tool_name, "read_file");
                }
                StreamChunk::Done { stop_reason, .. } => stop = Some(stop_reason),
                _ => {}
            }
        }
        assert!(saw_tool);
        assert_eq!(stop, Some(StopReason::ToolUse));
    }
}
