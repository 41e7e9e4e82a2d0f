use sb_domain::error::Result;
use sb_domain::message::{Message, ToolDefinition};
use sb_domain::stream::{BoxStream, StreamChunk};
use sb_domain::token::ProviderKind;

/// The chunk stream a provider yields for one request: chunks until `Done`,
/// or an `Err` for failures the stream itself could not express.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// A provider-agnostic streaming request.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Model name within the provider (no provider prefix).
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Trait every model binding implements.
///
/// The contract is "next chunk or done or error": any concrete
/// implementation satisfies it, whether backed by an HTTP SSE pump, a local
/// runtime, or a canned script.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Which accounting family this provider belongs to.
    fn kind(&self) -> ProviderKind;

    /// A unique identifier for this provider instance (the prefix in
    /// `provider/model` specs).
    fn provider_id(&self) -> &str;

    /// Max context window for a model, when the binding knows it.
    fn context_window(&self, model: &str) -> Option<u64>;

    /// Open a streaming generation for the request.
    async fn stream(&self, req: &ProviderRequest) -> Result<ChunkStream>;
}
