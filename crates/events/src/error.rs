/// Store-local error type. Converts into the shared domain error at the
/// crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("event not found: {0}")]
    EventNotFound(String),

    /// Integrity failure on read. Surfaced, never silently repaired.
    #[error("checksum mismatch for event {0}")]
    ChecksumMismatch(String),

    #[error("not a deletable message event: {0}")]
    NotAMessage(String),

    /// A stored row failed to parse back into its typed form.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for sb_domain::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => sb_domain::Error::SessionNotFound(id),
            StoreError::EventNotFound(id) => sb_domain::Error::EventNotFound(id),
            StoreError::ChecksumMismatch(id) => sb_domain::Error::ChecksumMismatch(id),
            StoreError::NotAMessage(id) => {
                sb_domain::Error::Other(format!("not a deletable message event: {id}"))
            }
            StoreError::Corrupt(msg) => sb_domain::Error::Storage(msg),
            StoreError::Database(e) => sb_domain::Error::Storage(e.to_string()),
            StoreError::Payload(e) => sb_domain::Error::Json(e),
        }
    }
}
