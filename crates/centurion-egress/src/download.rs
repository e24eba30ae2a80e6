use crate::policy::EgressPolicy;
use centurion_core::error::{CenturionError, Result};
use futures_util::StreamExt;
use std::time::Duration;

/// Downloads `url` through the egress gate with a streaming byte cap.
/// Honors `Content-Length` when present (rejecting up front); otherwise
/// accumulates chunks and aborts as soon as the cap is exceeded.
pub async fn download_capped(
    policy: &EgressPolicy,
    client: &reqwest::Client,
    url: &str,
    max_bytes: u64,
    timeout: Duration,
) -> Result<Vec<u8>> {
    policy.assert_allowed(url).await?;

    let resp = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| CenturionError::Timeout { ms: timeout.as_millis() as u64 })?
        .map_err(|e| CenturionError::ExternalFailure(format!("media download failed: {e}")))?;

    if let Some(len) = resp.content_length() {
        if len > max_bytes {
            return Err(CenturionError::PayloadTooLarge {
                size: len as usize,
                max: max_bytes as usize,
            });
        }
    }

    let mut buf = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CenturionError::ExternalFailure(format!("stream error: {e}")))?;
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > max_bytes {
            return Err(CenturionError::PayloadTooLarge {
                size: buf.len(),
                max: max_bytes as usize,
            });
        }
    }

    Ok(buf)
}
