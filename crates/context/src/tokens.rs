//! Provider-agnostic token accounting.
//!
//! Providers disagree about what "input tokens" means. Anthropic splits the
//! context window across input / cache_read / cache_creation (mutually
//! exclusive); everyone else reports the whole window as input. The
//! normalizer folds both shapes into one frozen [`TokenRecord`] per turn.

use chrono::{DateTime, Utc};

use sb_domain::stream::RawUsage;
use sb_domain::token::{
    CalculationMethod, ContextWindow, ProviderKind, TokenComputed, TokenMeta, TokenRecord,
    TokenSource,
};

/// Turn-scoped metadata for a normalization call.
#[derive(Debug, Clone)]
pub struct TurnMeta {
    pub turn: u32,
    pub session_id: String,
    pub extracted_at: DateTime<Utc>,
}

/// Normalize one turn's raw usage against the previous context baseline.
///
/// `new_input_tokens` is 0 exactly when the window shrank below the baseline
/// (compaction or context clear between turns).
pub fn normalize(source: TokenSource, previous_baseline: u64, meta: TurnMeta) -> TokenRecord {
    let (context_window_tokens, calculation_method) = match source.provider {
        ProviderKind::Anthropic => (
            source.raw_input_tokens
                + source.raw_cache_read_tokens
                + source.raw_cache_creation_tokens,
            CalculationMethod::AnthropicCacheAware,
        ),
        _ => (source.raw_input_tokens, CalculationMethod::Direct),
    };

    let new_input_tokens = if previous_baseline == 0 {
        context_window_tokens
    } else if context_window_tokens < previous_baseline {
        tracing::debug!(
            session_id = %meta.session_id,
            context_window_tokens,
            previous_baseline,
            "context window shrank below baseline, new input counted as 0"
        );
        0
    } else {
        context_window_tokens - previous_baseline
    };

    TokenRecord {
        source,
        computed: TokenComputed {
            context_window_tokens,
            new_input_tokens,
            previous_context_baseline: previous_baseline,
            calculation_method,
        },
        meta: TokenMeta {
            turn: meta.turn,
            session_id: meta.session_id,
            extracted_at: meta.extracted_at,
            normalized_at: Utc::now(),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TokenState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session token history and baseline tracking. Owned by the active
/// session; one `record_turn` call per completed provider turn.
pub struct TokenState {
    history: Vec<TokenRecord>,
    baseline: u64,
    last_provider: Option<ProviderKind>,
    /// Accumulated billing totals. Never reset, not even on provider switch.
    total_input_tokens: u64,
    total_output_tokens: u64,
    turn: u32,
}

impl TokenState {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            baseline: 0,
            last_provider: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            turn: 0,
        }
    }

    /// Fold one turn's usage into the state and return the frozen record.
    pub fn record_turn(
        &mut self,
        provider: ProviderKind,
        usage: &RawUsage,
        session_id: &str,
    ) -> &TokenRecord {
        // A provider change mid-session invalidates the baseline: the first
        // post-switch turn treats its whole window as new input.
        if let Some(last) = self.last_provider {
            if last != provider {
                tracing::info!(
                    session_id = %session_id,
                    from = %last,
                    to = %provider,
                    "provider changed, resetting context baseline"
                );
                self.baseline = 0;
            }
        }
        self.last_provider = Some(provider);
        self.turn += 1;

        let now = Utc::now();
        let record = normalize(
            TokenSource::from_usage(provider, usage, now),
            self.baseline,
            TurnMeta {
                turn: self.turn,
                session_id: session_id.to_owned(),
                extracted_at: now,
            },
        );

        self.baseline = record.computed.context_window_tokens;
        self.total_input_tokens += usage.input_tokens
            + usage.cache_read_tokens
            + usage.cache_creation_tokens;
        self.total_output_tokens += usage.output_tokens;

        self.history.push(record);
        self.history.last().expect("just pushed")
    }

    pub fn baseline(&self) -> u64 {
        self.baseline
    }

    pub fn history(&self) -> &[TokenRecord] {
        &self.history
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input_tokens
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output_tokens
    }

    /// Build the session's context-window view from the latest record.
    pub fn window(&self, max_size: u64) -> ContextWindow {
        let mut window = ContextWindow::new(max_size);
        if let Some(last) = self.history.last() {
            window.update(last.computed.context_window_tokens);
        }
        window
    }
}

impl Default for TokenState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64, cache_read: u64, cache_create: u64) -> RawUsage {
        RawUsage {
            input_tokens: input,
            output_tokens: output,
            cache_read_tokens: cache_read,
            cache_creation_tokens: cache_create,
        }
    }

    #[test]
    fn direct_method_for_openai() {
        let mut state = TokenState::new();
        let rec = state.record_turn(ProviderKind::Openai, &usage(10, 5, 0, 0), "s1");
        assert_eq!(rec.computed.context_window_tokens, 10);
        assert_eq!(rec.computed.new_input_tokens, 10);
        assert_eq!(rec.computed.calculation_method, CalculationMethod::Direct);
    }

    #[test]
    fn anthropic_cache_aware_sums_slices() {
        let mut state = TokenState::new();
        // Turn 1 establishes the baseline at 8500.
        state.record_turn(ProviderKind::Anthropic, &usage(8500, 100, 0, 0), "s1");
        // Turn 2: 604 fresh + 8266 cache read.
        let rec = state.record_turn(ProviderKind::Anthropic, &usage(604, 150, 8266, 0), "s1");
        assert_eq!(rec.computed.context_window_tokens, 8870);
        assert_eq!(rec.computed.new_input_tokens, 370);
        assert_eq!(
            rec.computed.calculation_method,
            CalculationMethod::AnthropicCacheAware
        );
    }

    #[test]
    fn shrink_below_baseline_counts_zero_new_input() {
        let mut state = TokenState::new();
        state.record_turn(ProviderKind::Openai, &usage(5000, 10, 0, 0), "s1");
        let rec = state.record_turn(ProviderKind::Openai, &usage(1200, 10, 0, 0), "s1");
        assert_eq!(rec.computed.new_input_tokens, 0);
        assert_eq!(rec.computed.previous_context_baseline, 5000);
    }

    #[test]
    fn provider_switch_resets_baseline_but_not_totals() {
        let mut state = TokenState::new();
        state.record_turn(ProviderKind::Anthropic, &usage(4000, 50, 0, 0), "s1");
        let total_before = state.total_input_tokens();

        let rec = state.record_turn(ProviderKind::Openai, &usage(3000, 40, 0, 0), "s1");
        // Whole window is new input after the switch.
        assert_eq!(rec.computed.new_input_tokens, 3000);
        assert_eq!(rec.computed.previous_context_baseline, 0);
        // Billing totals kept accumulating.
        assert_eq!(state.total_input_tokens(), total_before + 3000);
    }

    #[test]
    fn history_is_ordered_and_frozen() {
        let mut state = TokenState::new();
        state.record_turn(ProviderKind::Google, &usage(100, 5, 0, 0), "s1");
        state.record_turn(ProviderKind::Google, &usage(180, 5, 0, 0), "s1");
        let turns: Vec<u32> = state.history().iter().map(|r| r.meta.turn).collect();
        assert_eq!(turns, vec![1, 2]);
        assert_eq!(state.history()[0].computed.context_window_tokens, 100);
    }

    #[test]
    fn window_reflects_latest_record() {
        let mut state = TokenState::new();
        state.record_turn(ProviderKind::Openai, &usage(250, 5, 0, 0), "s1");
        let window = state.window(1000);
        assert_eq!(window.current_size, 250);
        assert_eq!(window.percent_used, 25.0);
        assert_eq!(window.tokens_remaining, 750);
    }
}
