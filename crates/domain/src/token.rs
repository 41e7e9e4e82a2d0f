//! Token accounting records.
//!
//! A [`TokenRecord`] is produced once per turn by the normalizer and never
//! mutated afterwards. The session keeps an ordered history of them plus a
//! rolling [`ContextWindow`] snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::RawUsage;

/// The provider family a usage record came from. Drives which calculation
/// method the normalizer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Google,
    Codex,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Openai => "openai",
            ProviderKind::Google => "google",
            ProviderKind::Codex => "codex",
        };
        f.write_str(s)
    }
}

/// How `context_window_tokens` was derived from the raw counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// input + cache_read + cache_creation (the three are mutually
    /// exclusive in Anthropic's accounting).
    AnthropicCacheAware,
    /// input_tokens already covers the whole window.
    Direct,
}

/// The raw side of a token record: what the provider reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSource {
    pub provider: ProviderKind,
    pub raw_input_tokens: u64,
    pub raw_output_tokens: u64,
    pub raw_cache_read_tokens: u64,
    pub raw_cache_creation_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

impl TokenSource {
    pub fn from_usage(provider: ProviderKind, usage: &RawUsage, timestamp: DateTime<Utc>) -> Self {
        Self {
            provider,
            raw_input_tokens: usage.input_tokens,
            raw_output_tokens: usage.output_tokens,
            raw_cache_read_tokens: usage.cache_read_tokens,
            raw_cache_creation_tokens: usage.cache_creation_tokens,
            timestamp,
        }
    }
}

/// The normalized side: provider-agnostic context window figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenComputed {
    pub context_window_tokens: u64,
    pub new_input_tokens: u64,
    pub previous_context_baseline: u64,
    pub calculation_method: CalculationMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMeta {
    pub turn: u32,
    pub session_id: String,
    pub extracted_at: DateTime<Utc>,
    pub normalized_at: DateTime<Utc>,
}

/// One per turn, frozen after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub source: TokenSource,
    pub computed: TokenComputed,
    pub meta: TokenMeta,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rolling context-window occupancy for a session, refreshed every turn
/// and on model switch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextWindow {
    pub current_size: u64,
    pub max_size: u64,
    /// 0..=100, capped.
    pub percent_used: f64,
    /// Floored at 0.
    pub tokens_remaining: u64,
}

impl ContextWindow {
    pub fn new(max_size: u64) -> Self {
        Self {
            current_size: 0,
            max_size,
            percent_used: 0.0,
            tokens_remaining: max_size,
        }
    }

    /// Recompute the derived fields from a new current size.
    pub fn update(&mut self, current_size: u64) {
        self.current_size = current_size;
        self.percent_used = if self.max_size == 0 {
            100.0
        } else {
            ((current_size as f64 / self.max_size as f64) * 100.0).min(100.0)
        };
        self.tokens_remaining = self.max_size.saturating_sub(current_size);
    }

    /// Swap the window limit (model switch) and recompute.
    pub fn resize(&mut self, max_size: u64) {
        self.max_size = max_size;
        self.update(self.current_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_used_caps_at_100() {
        let mut w = ContextWindow::new(100);
        w.update(250);
        assert_eq!(w.percent_used, 100.0);
        assert_eq!(w.tokens_remaining, 0);
    }

    #[test]
    fn tokens_remaining_floors_at_zero() {
        let mut w = ContextWindow::new(1000);
        w.update(400);
        assert_eq!(w.tokens_remaining, 600);
        w.update(1500);
        assert_eq!(w.tokens_remaining, 0);
    }

    #[test]
    fn resize_recomputes_percentage() {
        let mut w = ContextWindow::new(1000);
        w.update(500);
        assert_eq!(w.percent_used, 50.0);
        w.resize(2000);
        assert_eq!(w.percent_used, 25.0);
    }
}
