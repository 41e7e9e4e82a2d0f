//! Ordered blocking/background side-effect extensions.
//!
//! Hooks attach user-supplied behavior to lifecycle points: prompt submit,
//! tool use, compaction, session start, stop. Blocking hooks run in priority
//! order and may veto or modify; background hooks only observe and never
//! block the turn. Failures are fail-open: a broken hook is logged and
//! treated as `Continue`.

pub mod engine;
pub mod types;

pub use engine::{BackgroundTracker, BlockingOutcome, HookEngine, HookSink};
pub use types::{HookContext, HookDecision, HookHandler, HookMode, HookRegistration, HookType};
