//! The per-session context manager.
//!
//! Owns the in-memory message sequence used to build each provider request
//! and the context-window occupancy derived from it. Compaction here is the
//! buffer-side half: the pipeline generates the summary and writes the event
//! pair under the session turn lock, then calls [`ContextManager::apply_compaction`].

use serde::{Deserialize, Serialize};

use sb_domain::config::CompactionConfig;
use sb_domain::message::{ContentPart, Message};
use sb_domain::token::ContextWindow;

use crate::compact;

/// Token estimate charged to a future summary in previews, before the real
/// summary text exists.
const SUMMARY_PREVIEW_TOKENS: u64 = 512;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdState {
    Normal,
    Elevated,
    Critical,
    Exceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub current_tokens: u64,
    pub max_tokens: u64,
    pub usage_percent: f64,
    pub message_count: usize,
    pub threshold_state: ThresholdState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanAcceptTurn {
    pub can_proceed: bool,
    pub needs_compaction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Idempotent compaction estimate. Calling twice with no intervening turn
/// returns identical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionPreview {
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub compression_ratio: f64,
}

/// Result of a buffer-side compaction apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedCompaction {
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub messages_compacted: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ContextManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextManager {
    messages: Vec<Message>,
    window: ContextWindow,
    compaction: CompactionConfig,
}

impl ContextManager {
    pub fn new(max_tokens: u64, compaction: CompactionConfig) -> Self {
        Self {
            messages: Vec::new(),
            window: ContextWindow::new(max_tokens),
            compaction,
        }
    }

    // ── Buffer mutation ───────────────────────────────────────────

    /// Replace the buffer wholesale (resume / fork). Occupancy is
    /// re-estimated until the next provider report overrides it.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        let estimate = compact::estimate_buffer_tokens(&self.messages);
        self.window.update(estimate);
    }

    pub fn append_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn append_assistant(&mut self, parts: Vec<ContentPart>) {
        self.messages.push(Message::assistant_parts(parts));
    }

    pub fn append_system(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn append_tool_result(
        &mut self,
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) {
        self.messages
            .push(Message::tool_result(tool_use_id, content, is_error));
    }

    /// Rewrite the trailing user message (prompt-submit hook modification).
    pub fn amend_last_user(&mut self, content: impl Into<String>) {
        if let Some(last) = self.messages.last_mut() {
            if last.role == sb_domain::Role::User {
                last.content = sb_domain::MessageContent::Text(content.into());
            }
        }
    }

    /// Drop the whole buffer (`context.cleared`).
    pub fn clear(&mut self) {
        self.messages.clear();
        self.window.update(0);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    // ── Occupancy ─────────────────────────────────────────────────

    /// Authoritative update from the token normalizer after a turn.
    pub fn set_current_tokens(&mut self, tokens: u64) {
        self.window.update(tokens);
    }

    /// Swap the window limit (model switch).
    pub fn resize_window(&mut self, max_tokens: u64) {
        self.window.resize(max_tokens);
    }

    pub fn window(&self) -> ContextWindow {
        self.window
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let percent = self.window.percent_used;
        ContextSnapshot {
            current_tokens: self.window.current_size,
            max_tokens: self.window.max_size,
            usage_percent: percent,
            message_count: self.messages.len(),
            threshold_state: self.threshold_state(percent),
        }
    }

    fn threshold_state(&self, percent: f64) -> ThresholdState {
        if percent >= 100.0 {
            ThresholdState::Exceeded
        } else if percent >= self.compaction.threshold * 100.0 {
            ThresholdState::Critical
        } else if percent >= 50.0 {
            ThresholdState::Elevated
        } else {
            ThresholdState::Normal
        }
    }

    // ── Compaction decisions ──────────────────────────────────────

    pub fn should_compact(&self) -> bool {
        self.window.percent_used >= self.compaction.threshold * 100.0
    }

    /// Capacity check for an incoming turn.
    ///
    /// `needs_compaction` when the projected size crosses the compaction
    /// threshold; `can_proceed` only while it stays under the hard limit.
    pub fn can_accept_turn(&self, estimated_response_tokens: u64) -> CanAcceptTurn {
        let projected = self.window.current_size + estimated_response_tokens;
        let threshold =
            (self.window.max_size as f64 * self.compaction.threshold) as u64;
        let needs_compaction = projected >= threshold;
        let can_proceed = projected < self.window.max_size;

        CanAcceptTurn {
            can_proceed,
            needs_compaction,
            reason: if !can_proceed {
                Some(format!(
                    "projected {projected} tokens exceeds context window of {}",
                    self.window.max_size
                ))
            } else {
                None
            },
        }
    }

    /// Estimate the effect of compacting now. Pure; repeatable.
    pub fn preview_compaction(&self) -> CompactionPreview {
        let tokens_before = if self.window.current_size > 0 {
            self.window.current_size
        } else {
            compact::estimate_buffer_tokens(&self.messages)
        };

        let (to_compact, to_keep) =
            compact::split_for_compaction(&self.messages, self.compaction.keep_recent_messages);

        let tokens_after = if to_compact.is_empty() {
            tokens_before
        } else {
            (SUMMARY_PREVIEW_TOKENS + compact::estimate_buffer_tokens(to_keep))
                .min(tokens_before)
        };

        CompactionPreview {
            tokens_before,
            tokens_after,
            compression_ratio: if tokens_before == 0 {
                1.0
            } else {
                tokens_after as f64 / tokens_before as f64
            },
        }
    }

    /// The buffer to summarize, or `None` when there is nothing to compact.
    pub fn compaction_input(&self) -> Option<Vec<Message>> {
        let (to_compact, _) =
            compact::split_for_compaction(&self.messages, self.compaction.keep_recent_messages);
        if to_compact.is_empty() {
            None
        } else {
            Some(to_compact.to_vec())
        }
    }

    /// Replace the compacted prefix with a single system message carrying
    /// the summary, keeping everything newer than the compaction range.
    pub fn apply_compaction(&mut self, summary: &str) -> AppliedCompaction {
        let tokens_before = if self.window.current_size > 0 {
            self.window.current_size
        } else {
            compact::estimate_buffer_tokens(&self.messages)
        };

        let (to_compact, to_keep) =
            compact::split_for_compaction(&self.messages, self.compaction.keep_recent_messages);
        let messages_compacted = to_compact.len();
        if messages_compacted == 0 {
            return AppliedCompaction {
                tokens_before,
                tokens_after: tokens_before,
                messages_compacted: 0,
            };
        }

        let mut rebuilt = Vec::with_capacity(to_keep.len() + 1);
        rebuilt.push(Message::system(summary));
        rebuilt.extend_from_slice(to_keep);
        self.messages = rebuilt;

        let tokens_after =
            compact::estimate_buffer_tokens(&self.messages).min(tokens_before.saturating_sub(1));
        self.window.update(tokens_after);

        AppliedCompaction {
            tokens_before,
            tokens_after,
            messages_compacted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max: u64) -> ContextManager {
        ContextManager::new(max, CompactionConfig::default())
    }

    fn fill(mgr: &mut ContextManager, turns: usize, text_len: usize) {
        let text = "x".repeat(text_len);
        for _ in 0..turns {
            mgr.append_user(text.clone());
            mgr.append_assistant(vec![ContentPart::Text { text: text.clone() }]);
        }
        let estimate = compact::estimate_buffer_tokens(mgr.messages());
        mgr.set_current_tokens(estimate);
    }

    #[test]
    fn snapshot_reflects_reported_usage() {
        let mut mgr = manager(1000);
        mgr.append_user("hi");
        mgr.set_current_tokens(100);
        let snap = mgr.snapshot();
        assert_eq!(snap.current_tokens, 100);
        assert_eq!(snap.usage_percent, 10.0);
        assert_eq!(snap.message_count, 1);
        assert_eq!(snap.threshold_state, ThresholdState::Normal);
    }

    #[test]
    fn threshold_states_by_percent() {
        let mut mgr = manager(1000);
        mgr.set_current_tokens(550);
        assert_eq!(mgr.snapshot().threshold_state, ThresholdState::Elevated);
        mgr.set_current_tokens(800);
        assert_eq!(mgr.snapshot().threshold_state, ThresholdState::Critical);
        mgr.set_current_tokens(1000);
        assert_eq!(mgr.snapshot().threshold_state, ThresholdState::Exceeded);
    }

    #[test]
    fn should_compact_at_threshold() {
        let mut mgr = manager(1000);
        mgr.set_current_tokens(749);
        assert!(!mgr.should_compact());
        mgr.set_current_tokens(750);
        assert!(mgr.should_compact());
    }

    #[test]
    fn can_accept_turn_boundaries() {
        let mut mgr = manager(1000);
        mgr.set_current_tokens(700);

        // 700 + 49 = 749 < 750: no compaction needed.
        let ok = mgr.can_accept_turn(49);
        assert!(ok.can_proceed);
        assert!(!ok.needs_compaction);

        // 700 + 50 = 750 >= 750: compaction needed, still proceedable.
        let at_threshold = mgr.can_accept_turn(50);
        assert!(at_threshold.can_proceed);
        assert!(at_threshold.needs_compaction);

        // 700 + 300 = 1000: hard limit reached.
        let over = mgr.can_accept_turn(300);
        assert!(!over.can_proceed);
        assert!(over.reason.is_some());
    }

    #[test]
    fn preview_is_idempotent() {
        let mut mgr = manager(10_000);
        fill(&mut mgr, 20, 400);
        let first = mgr.preview_compaction();
        let second = mgr.preview_compaction();
        assert_eq!(first, second);
        assert!(first.tokens_after < first.tokens_before);
        assert!(first.compression_ratio < 1.0);
    }

    #[test]
    fn apply_compaction_reduces_tokens_and_keeps_tail() {
        let mut mgr = manager(10_000);
        fill(&mut mgr, 20, 400);
        let before = mgr.snapshot().current_tokens;

        let applied = mgr.apply_compaction("summary of the early conversation");
        assert!(applied.messages_compacted > 0);
        assert!(applied.tokens_after < before);
        assert!(mgr.snapshot().current_tokens < before);

        // First message is now the summary.
        let msgs = mgr.messages();
        assert_eq!(msgs[0].role, sb_domain::Role::System);
        assert!(msgs[0]
            .content
            .text()
            .unwrap()
            .contains("summary of the early conversation"));
    }

    #[test]
    fn apply_on_tiny_buffer_is_a_noop() {
        let mut mgr = manager(1000);
        mgr.append_user("only one");
        let applied = mgr.apply_compaction("unused");
        assert_eq!(applied.messages_compacted, 0);
        assert_eq!(applied.tokens_before, applied.tokens_after);
    }

    #[test]
    fn set_messages_estimates_occupancy() {
        let mut mgr = manager(1000);
        mgr.set_messages(vec![Message::user("x".repeat(400))]);
        assert_eq!(mgr.snapshot().current_tokens, 100);
    }

    #[test]
    fn clear_empties_buffer_and_window() {
        let mut mgr = manager(1000);
        fill(&mut mgr, 3, 100);
        mgr.clear();
        assert_eq!(mgr.snapshot().current_tokens, 0);
        assert_eq!(mgr.messages().len(), 0);
    }
}
