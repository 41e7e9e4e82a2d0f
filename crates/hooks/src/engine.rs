//! Hook execution: blocking chains with veto/modify semantics, background
//! batches with lifecycle reporting, and the pending-work tracker shutdown
//! waits on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::types::{HookContext, HookDecision, HookMode, HookRegistration, HookType};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives background hook lifecycle notifications. The core implements
/// this to append `hook.background_started/completed` events and fan them
/// out to subscribers.
pub trait HookSink: Send + Sync {
    fn background_started(&self, session_id: &str, hook_name: &str);
    fn background_completed(&self, session_id: &str, hook_name: &str, error: Option<String>);
}

/// Sink that drops everything (tests, hosts without event plumbing).
pub struct NullSink;

impl HookSink for NullSink {
    fn background_started(&self, _session_id: &str, _hook_name: &str) {}
    fn background_completed(&self, _session_id: &str, _hook_name: &str, _error: Option<String>) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome of a blocking chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct BlockingOutcome {
    /// Reason from the first hook that blocked, if any.
    pub blocked: Option<String>,
    /// Shallow-merged modification object from all `Modify` decisions.
    pub modifications: Option<serde_json::Value>,
    /// Names of hooks that actually ran, in execution order.
    pub triggered: Vec<String>,
}

impl BlockingOutcome {
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counts in-flight background hooks so `shutdown` can wait for them.
pub struct BackgroundTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl BackgroundTracker {
    pub fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn start(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until no background hooks are pending, up to `timeout`.
    /// Returns `true` when idle was reached.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending() == 0 {
                return true;
            }
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending() == 0;
            }
        }
    }
}

impl Default for BackgroundTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HookEngine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HookEngine {
    hooks: RwLock<Vec<HookRegistration>>,
    default_timeout: Duration,
    tracker: Arc<BackgroundTracker>,
}

impl HookEngine {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            default_timeout,
            tracker: Arc::new(BackgroundTracker::new()),
        }
    }

    /// Register a hook. Gate-type hooks (PreToolUse, UserPromptSubmit,
    /// PreCompact) are forced blocking regardless of the requested mode.
    pub fn register(&self, mut reg: HookRegistration) {
        if reg.hook_type.forced_blocking() && reg.mode != HookMode::Blocking {
            tracing::debug!(
                hook = %reg.name,
                hook_type = reg.hook_type.as_str(),
                "forcing blocking mode for gate hook"
            );
            reg.mode = HookMode::Blocking;
        }
        let mut hooks = self.hooks.write();
        hooks.push(reg);
        // Descending priority; registration order breaks ties.
        hooks.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn tracker(&self) -> Arc<BackgroundTracker> {
        self.tracker.clone()
    }

    /// Run the blocking chain for one hook type.
    ///
    /// Hooks run sequentially in descending priority. `Block` skips the
    /// rest; `Modify` payloads accumulate into one merged object. A timeout
    /// or error in a hook is logged and treated as `Continue`.
    pub async fn run_blocking(&self, ctx: &HookContext) -> BlockingOutcome {
        let selected: Vec<(String, Duration, Arc<dyn crate::types::HookHandler>)> = {
            let hooks = self.hooks.read();
            hooks
                .iter()
                .filter(|h| h.hook_type == ctx.hook_type && h.mode == HookMode::Blocking)
                .map(|h| {
                    (
                        h.name.clone(),
                        h.timeout.unwrap_or(self.default_timeout),
                        h.handler.clone(),
                    )
                })
                .collect()
        };

        let mut outcome = BlockingOutcome::default();
        for (name, timeout, handler) in selected {
            outcome.triggered.push(name.clone());
            let decision = match tokio::time::timeout(timeout, handler.run(ctx)).await {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => {
                    tracing::warn!(hook = %name, error = %e, "blocking hook failed, continuing");
                    HookDecision::Continue
                }
                Err(_) => {
                    tracing::warn!(hook = %name, ?timeout, "blocking hook timed out, continuing");
                    HookDecision::Continue
                }
            };

            match decision {
                HookDecision::Continue => {}
                HookDecision::Modify { modifications } => {
                    merge_into(&mut outcome.modifications, modifications);
                }
                HookDecision::Block { reason } => {
                    outcome.blocked = Some(reason);
                    break;
                }
            }
        }
        outcome
    }

    /// Start the background batch for one hook type. Returns the number of
    /// hooks spawned; the turn does not wait for them.
    pub fn spawn_background(&self, ctx: HookContext, sink: Arc<dyn HookSink>) -> usize {
        let selected: Vec<(String, Duration, Arc<dyn crate::types::HookHandler>)> = {
            let hooks = self.hooks.read();
            hooks
                .iter()
                .filter(|h| h.hook_type == ctx.hook_type && h.mode == HookMode::Background)
                .map(|h| {
                    (
                        h.name.clone(),
                        h.timeout.unwrap_or(self.default_timeout),
                        h.handler.clone(),
                    )
                })
                .collect()
        };

        let count = selected.len();
        for (name, timeout, handler) in selected {
            let ctx = ctx.clone();
            let sink = sink.clone();
            let tracker = self.tracker.clone();

            tracker.start();
            sink.background_started(&ctx.session_id, &name);

            tokio::spawn(async move {
                let error = match tokio::time::timeout(timeout, handler.run(&ctx)).await {
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => {
                        tracing::warn!(hook = %name, error = %e, "background hook failed");
                        Some(e.to_string())
                    }
                    Err(_) => {
                        tracing::warn!(hook = %name, ?timeout, "background hook timed out");
                        Some(format!("timed out after {timeout:?}"))
                    }
                };
                sink.background_completed(&ctx.session_id, &name, error);
                tracker.finish();
            });
        }
        count
    }

    /// Hooks registered for a type, by mode (introspection / tests).
    pub fn count(&self, hook_type: HookType, mode: HookMode) -> usize {
        self.hooks
            .read()
            .iter()
            .filter(|h| h.hook_type == hook_type && h.mode == mode)
            .count()
    }
}

/// Shallow-merge `incoming` into the accumulated modification object.
/// Later hooks win on key conflicts.
fn merge_into(acc: &mut Option<serde_json::Value>, incoming: serde_json::Value) {
    match acc {
        None => *acc = Some(incoming),
        Some(serde_json::Value::Object(existing)) => {
            if let serde_json::Value::Object(map) = incoming {
                for (k, v) in map {
                    existing.insert(k, v);
                }
            }
        }
        Some(other) => *other = incoming,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HookHandler;
    use parking_lot::Mutex;

    struct Fixed(HookDecision);

    #[async_trait::async_trait]
    impl HookHandler for Fixed {
        async fn run(&self, _ctx: &HookContext) -> sb_domain::Result<HookDecision> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl HookHandler for Failing {
        async fn run(&self, _ctx: &HookContext) -> sb_domain::Result<HookDecision> {
            Err(sb_domain::Error::Other("hook exploded".into()))
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl HookHandler for Slow {
        async fn run(&self, _ctx: &HookContext) -> sb_domain::Result<HookDecision> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(HookDecision::Continue)
        }
    }

    fn reg(
        name: &str,
        hook_type: HookType,
        priority: i32,
        mode: HookMode,
        handler: Arc<dyn HookHandler>,
    ) -> HookRegistration {
        HookRegistration {
            name: name.into(),
            hook_type,
            priority,
            timeout: None,
            mode,
            handler,
        }
    }

    fn ctx(hook_type: HookType) -> HookContext {
        HookContext {
            hook_type,
            session_id: "s1".into(),
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn hooks_run_in_descending_priority() {
        let engine = HookEngine::new(Duration::from_secs(5));
        engine.register(reg(
            "low",
            HookType::PreToolUse,
            1,
            HookMode::Blocking,
            Arc::new(Fixed(HookDecision::Continue)),
        ));
        engine.register(reg(
            "high",
            HookType::PreToolUse,
            10,
            HookMode::Blocking,
            Arc::new(Fixed(HookDecision::Continue)),
        ));

        let outcome = engine.run_blocking(&ctx(HookType::PreToolUse)).await;
        assert_eq!(outcome.triggered, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn block_skips_remaining_hooks() {
        let engine = HookEngine::new(Duration::from_secs(5));
        engine.register(reg(
            "blocker",
            HookType::PreToolUse,
            10,
            HookMode::Blocking,
            Arc::new(Fixed(HookDecision::Block {
                reason: "not allowed".into(),
            })),
        ));
        engine.register(reg(
            "never_runs",
            HookType::PreToolUse,
            1,
            HookMode::Blocking,
            Arc::new(Fixed(HookDecision::Continue)),
        ));

        let outcome = engine.run_blocking(&ctx(HookType::PreToolUse)).await;
        assert_eq!(outcome.blocked.as_deref(), Some("not allowed"));
        assert_eq!(outcome.triggered, vec!["blocker"]);
    }

    #[tokio::test]
    async fn modifications_accumulate_and_merge() {
        let engine = HookEngine::new(Duration::from_secs(5));
        engine.register(reg(
            "first",
            HookType::UserPromptSubmit,
            10,
            HookMode::Blocking,
            Arc::new(Fixed(HookDecision::Modify {
                modifications: serde_json::json!({"a": 1, "b": 1}),
            })),
        ));
        engine.register(reg(
            "second",
            HookType::UserPromptSubmit,
            1,
            HookMode::Blocking,
            Arc::new(Fixed(HookDecision::Modify {
                modifications: serde_json::json!({"b": 2, "c": 3}),
            })),
        ));

        let outcome = engine.run_blocking(&ctx(HookType::UserPromptSubmit)).await;
        let merged = outcome.modifications.unwrap();
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2); // later hook wins
        assert_eq!(merged["c"], 3);
    }

    #[tokio::test]
    async fn failing_blocking_hook_is_fail_open() {
        let engine = HookEngine::new(Duration::from_secs(5));
        engine.register(reg(
            "broken",
            HookType::PreToolUse,
            10,
            HookMode::Blocking,
            Arc::new(Failing),
        ));
        engine.register(reg(
            "after",
            HookType::PreToolUse,
            1,
            HookMode::Blocking,
            Arc::new(Fixed(HookDecision::Continue)),
        ));

        let outcome = engine.run_blocking(&ctx(HookType::PreToolUse)).await;
        assert!(!outcome.is_blocked());
        assert_eq!(outcome.triggered, vec!["broken", "after"]);
    }

    #[tokio::test]
    async fn timed_out_blocking_hook_is_fail_open() {
        let engine = HookEngine::new(Duration::from_millis(20));
        engine.register(reg(
            "slow",
            HookType::PreCompact,
            0,
            HookMode::Blocking,
            Arc::new(Slow),
        ));

        let outcome = engine.run_blocking(&ctx(HookType::PreCompact)).await;
        assert!(!outcome.is_blocked());
    }

    #[tokio::test]
    async fn gate_hooks_are_forced_blocking() {
        let engine = HookEngine::new(Duration::from_secs(5));
        engine.register(reg(
            "wants_background",
            HookType::PreToolUse,
            0,
            HookMode::Background,
            Arc::new(Fixed(HookDecision::Continue)),
        ));
        assert_eq!(engine.count(HookType::PreToolUse, HookMode::Blocking), 1);
        assert_eq!(engine.count(HookType::PreToolUse, HookMode::Background), 0);
    }

    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl HookSink for RecordingSink {
        fn background_started(&self, _session_id: &str, hook_name: &str) {
            self.events.lock().push(format!("started:{hook_name}"));
        }
        fn background_completed(&self, _session_id: &str, hook_name: &str, error: Option<String>) {
            self.events
                .lock()
                .push(format!("completed:{hook_name}:{}", error.is_some()));
        }
    }

    #[tokio::test]
    async fn background_batch_reports_lifecycle_and_drains() {
        let engine = HookEngine::new(Duration::from_secs(5));
        engine.register(reg(
            "observer",
            HookType::PostToolUse,
            0,
            HookMode::Background,
            Arc::new(Fixed(HookDecision::Continue)),
        ));
        engine.register(reg(
            "broken_observer",
            HookType::PostToolUse,
            0,
            HookMode::Background,
            Arc::new(Failing),
        ));

        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let spawned = engine.spawn_background(ctx(HookType::PostToolUse), sink.clone());
        assert_eq!(spawned, 2);

        assert!(engine.tracker().wait_idle(Duration::from_secs(2)).await);
        let events = sink.events.lock();
        assert!(events.contains(&"started:observer".to_string()));
        assert!(events.contains(&"completed:observer:false".to_string()));
        // The broken observer surfaces its error on the completed event but
        // does not affect the other hook.
        assert!(events.contains(&"completed:broken_observer:true".to_string()));
    }

    #[tokio::test]
    async fn wait_idle_times_out_on_stuck_hook() {
        let engine = HookEngine::new(Duration::from_secs(300));
        engine.register(reg(
            "stuck",
            HookType::PostToolUse,
            0,
            HookMode::Background,
            Arc::new(Slow),
        ));
        engine.spawn_background(ctx(HookType::PostToolUse), Arc::new(NullSink));
        assert!(!engine.tracker().wait_idle(Duration::from_millis(50)).await);
    }
}
