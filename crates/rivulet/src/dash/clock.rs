use chrono::{DateTime, TimeDelta, Utc};
use dash_mpd::UTCTiming;

use crate::{
    error::{RivuletError, RivuletResult},
    util::http::HttpClient,
};

/// Wall clock corrected by the offset between the local clock and the time
/// source the manifest declares via `UTCTiming`. Segment availability is
/// evaluated against this clock, not the raw local time.
#[derive(Debug, Default)]
pub(crate) struct Clock {
    offset: TimeDelta,
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    fn from_remote(
        remote_now: DateTime<Utc>,
        before_request: DateTime<Utc>,
        after_request: DateTime<Utc>,
    ) -> Self {
        // half the round trip approximates the response's age
        let rtt = after_request - before_request;
        let server_now = remote_now + rtt / 2;
        let offset = server_now - after_request;
        tracing::debug!(
            offset_milliseconds = offset.num_milliseconds(),
            "Clock synchronized to {remote_now}"
        );
        Self { offset }
    }

    /// Tries the manifest's `UTCTiming` schemes in order and returns the
    /// first clock that synchronizes. No timing elements means the local
    /// clock is authoritative.
    pub async fn sync(timing: &[UTCTiming], client: &HttpClient) -> RivuletResult<Self> {
        if timing.is_empty() {
            tracing::debug!("No UTCTiming elements in manifest, using local time");
            return Ok(Self::default());
        }

        let mut last_error: Option<RivuletError> = None;
        for timing in timing {
            let Some(value) = &timing.value else {
                last_error = Some(RivuletError::ManifestError(format!(
                    "Missing value for timing scheme {}",
                    timing.schemeIdUri.as_deref().unwrap_or_default()
                )));
                continue;
            };

            match timing.schemeIdUri.as_deref().unwrap_or_default() {
                "urn:mpeg:dash:utc:http-xsdate:2014" | "urn:mpeg:dash:utc:http-iso:2014" => {
                    let before_request = Utc::now();
                    match fetch_remote_time(client, value).await {
                        Ok(remote_now) => {
                            return Ok(Self::from_remote(remote_now, before_request, Utc::now()));
                        }
                        Err(error) => {
                            tracing::warn!(url = value, "Time sync request failed: {error}");
                            last_error = Some(error);
                        }
                    }
                }
                "urn:mpeg:dash:utc:direct:2014" => match parse_iso8601(value) {
                    Ok(remote_now) => {
                        let now = Utc::now();
                        return Ok(Self::from_remote(remote_now, now, now));
                    }
                    Err(error) => {
                        tracing::warn!(value, "Invalid direct timing value: {error}");
                        last_error = Some(error);
                    }
                },
                scheme => {
                    tracing::warn!(scheme, "Unsupported timing scheme");
                    last_error = Some(RivuletError::ManifestError(format!(
                        "Unsupported timing scheme: {scheme}"
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RivuletError::ManifestError("All time sync methods failed".to_string())
        }))
    }
}

async fn fetch_remote_time(client: &HttpClient, url: &str) -> RivuletResult<DateTime<Utc>> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(RivuletError::HttpError(response.status()));
    }
    parse_iso8601(response.text().await?.trim())
}

fn parse_iso8601(text: &str) -> RivuletResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // xsdate responses may omit the offset entirely
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })?)
}
