//! Per-session context management: the in-memory message buffer used to
//! build provider requests, provider-agnostic token accounting, and the
//! compaction split/summarize helpers.

pub mod compact;
pub mod manager;
pub mod tokens;

pub use manager::{
    CanAcceptTurn, CompactionPreview, ContextManager, ContextSnapshot, ThresholdState,
};
pub use tokens::{normalize, TokenState, TurnMeta};
