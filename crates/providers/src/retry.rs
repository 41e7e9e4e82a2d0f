//! Retry policy for opening provider streams.
//!
//! Transient failures (rate limits, connection resets) get exactly one
//! retry with exponential backoff; everything else surfaces immediately.

use std::sync::Arc;
use std::time::Duration;

use sb_domain::error::Result;

use crate::traits::{ChunkStream, Provider, ProviderRequest};

const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Open a stream, retrying once on a retryable error.
pub async fn open_stream_with_retry(
    provider: &Arc<dyn Provider>,
    req: &ProviderRequest,
) -> Result<ChunkStream> {
    match provider.stream(req).await {
        Ok(stream) => Ok(stream),
        Err(err) if err.is_retryable() => {
            tracing::warn!(
                provider = provider.provider_id(),
                error = %err,
                "transient provider error, retrying once"
            );
            tokio::time::sleep(BASE_BACKOFF).await;
            provider.stream(req).await
        }
        Err(err) => Err(err),
    }
}
