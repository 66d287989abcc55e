use std::time::Duration;

use bytes::Bytes;
use reqwest::{header::RANGE, Url};

use crate::{
    error::{RivuletError, RivuletResult},
    segment::ByteRange,
    util::http::HttpClient,
};

/// GET for one remote resource, honoring an optional byte sub-range and a
/// per-fetch timeout. Non-2xx responses surface as [`RivuletError::HttpError`]
/// so the executor treats them as retryable.
pub(crate) async fn fetch_bytes(
    client: &HttpClient,
    url: Url,
    byte_range: Option<&ByteRange>,
    timeout: Duration,
) -> RivuletResult<Bytes> {
    let mut request = client.get(url).timeout(timeout);
    if let Some(byte_range) = byte_range {
        request = request.header(RANGE, byte_range.to_http_range());
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        if let Ok(body) = response.text().await {
            tracing::warn!("Error body: {body}");
        }
        return Err(RivuletError::HttpError(status));
    }

    Ok(response.bytes().await?)
}
