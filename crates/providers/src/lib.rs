//! The provider seam: a streaming-generator interface every concrete model
//! binding implements, a registry that resolves `provider/model` specs, the
//! retry policy for transient stream-open failures, and a deterministic
//! scripted provider for tests and offline runs.
//!
//! Concrete HTTP bindings (Anthropic, OpenAI, Google) live outside the core
//! and plug in through [`Provider`].

pub mod registry;
pub mod retry;
pub mod scripted;
pub mod traits;

pub use registry::ProviderRegistry;
pub use retry::open_stream_with_retry;
pub use scripted::ScriptedProvider;
pub use traits::{ChunkStream, Provider, ProviderRequest};
