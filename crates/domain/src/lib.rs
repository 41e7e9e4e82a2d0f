//! Shared domain types for Switchboard.
//!
//! Everything other crates agree on lives here: the event catalogue, the
//! provider-agnostic message and stream types, token accounting records,
//! session metadata, configuration, and the shared error type.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod session;
pub mod stream;
pub mod token;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventBody, EventType};
pub use message::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
pub use session::{SessionInfo, SessionStats};
pub use stream::{BoxStream, RawUsage, StopReason, StreamChunk};
pub use token::{CalculationMethod, ContextWindow, ProviderKind, TokenRecord};
