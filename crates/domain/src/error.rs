/// Shared error type used across all Switchboard crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("event not found: {0}")]
    EventNotFound(String),

    #[error("storage: {0}")]
    Storage(String),

    /// Integrity failure. Surfaced to the caller, never silently repaired.
    #[error("checksum mismatch for event {0}")]
    ChecksumMismatch(String),

    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        /// Transient failures are retried once before surfacing.
        retryable: bool,
    },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("blocked: {0}")]
    Blocked(String),

    #[error("context window exceeded: {0}")]
    ContextExceeded(String),

    #[error("session is busy: a turn is already in progress")]
    SessionBusy,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { retryable, .. } => *retryable,
            Error::Storage(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
