use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dash_mpd::MPD;
use reqwest::Url;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::{
    error::RivuletResult,
    fetch::fetch_bytes,
    options::StreamOptions,
    pipeline::SourceContext,
    util::http::HttpClient,
    SegmentSource,
};

use super::{
    clock::Clock,
    manifest::{load_manifest, RepresentationKey},
    segment::DashSegment,
    timeline::{collect_segments, TimelineState},
};

/// Segment source for one DASH representation, re-resolved by id + mime type
/// after every manifest reload.
///
/// Video and audio are independent sources; run one pipeline per chosen
/// representation and mux downstream.
pub struct DashSource {
    inner: Arc<DashInner>,
}

struct DashInner {
    client: HttpClient,
    mpd_url: Url,
    representation: RepresentationKey,
    options: StreamOptions,
    clock: Mutex<Clock>,
    init_cache: AsyncMutex<Option<(Url, Arc<Vec<u8>>)>>,
}

impl DashSource {
    pub fn new(
        client: HttpClient,
        mpd_url: Url,
        representation: RepresentationKey,
        options: StreamOptions,
    ) -> Self {
        Self {
            inner: Arc::new(DashInner {
                client,
                mpd_url,
                representation,
                options,
                clock: Mutex::new(Clock::default()),
                init_cache: AsyncMutex::new(None),
            }),
        }
    }
}

impl DashInner {
    fn now(&self) -> DateTime<Utc> {
        self.clock.lock().unwrap().now()
    }

    /// Initialization segment bytes, fetched once per URI.
    async fn init_bytes(&self, url: &Url) -> RivuletResult<Arc<Vec<u8>>> {
        let mut cache = self.init_cache.lock().await;
        if let Some((cached_url, bytes)) = cache.as_ref() {
            if cached_url == url {
                return Ok(bytes.clone());
            }
        }

        let bytes = fetch_bytes(&self.client, url.clone(), None, self.options.segment_timeout).await?;
        let bytes = Arc::new(bytes.to_vec());
        *cache = Some((url.clone(), bytes.clone()));
        Ok(bytes)
    }
}

/// Reload cadence: the manifest's own update period or the period duration,
/// whichever is longer, but at least five seconds.
fn reload_interval(mpd: &MPD) -> Duration {
    let update_period = mpd.minimumUpdatePeriod.unwrap_or_default();
    let period_duration = mpd
        .periods
        .first()
        .and_then(|period| period.duration)
        .unwrap_or_default();
    update_period.max(period_duration).max(Duration::from_secs(5))
}

impl SegmentSource for DashSource {
    type Segment = DashSegment;

    async fn segments(
        &self,
        cx: SourceContext,
    ) -> RivuletResult<mpsc::UnboundedReceiver<Vec<DashSegment>>> {
        let inner = self.inner.clone();
        tracing::debug!(
            "Opening DASH source for {} ({})",
            inner.representation.id,
            inner.representation.mime_type
        );

        // First load is fatal: without a manifest there is nothing to play.
        let mpd = load_manifest(&inner.client, &inner.mpd_url).await?;

        match Clock::sync(&mpd.UTCTiming, &inner.client).await {
            Ok(clock) => *inner.clock.lock().unwrap() = clock,
            Err(error) => {
                tracing::warn!("Failed to synchronize clock, using local time: {error}")
            }
        }

        let mut state = TimelineState::default();
        let now = inner.now();
        let first = collect_segments(&mpd, &inner.mpd_url, &inner.representation, &mut state, now)?;
        let is_dynamic = mpd.mpdtype.as_deref() == Some("dynamic");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if !first.is_empty() && tx.send(first).is_err() {
                return;
            }
            if !is_dynamic {
                // static manifest: everything was enumerated once
                return;
            }

            let mut mpd = mpd;
            let mut back_off = 1.0f64;
            loop {
                let interval = reload_interval(&mpd).mul_f64(back_off);
                let started = tokio::time::Instant::now();

                cx.wait_free().await;
                if cx.is_closing() {
                    break;
                }

                tracing::debug!(
                    "Reloading manifest ({}:{})",
                    inner.representation.id,
                    inner.representation.mime_type
                );
                let changed = match load_manifest(&inner.client, &inner.mpd_url).await {
                    Ok(new_mpd) => {
                        let now = inner.now();
                        match collect_segments(
                            &new_mpd,
                            &inner.mpd_url,
                            &inner.representation,
                            &mut state,
                            now,
                        ) {
                            Ok(segments) if !segments.is_empty() => {
                                mpd = new_mpd;
                                if tx.send(segments).is_err() {
                                    return;
                                }
                                true
                            }
                            Ok(_) => {
                                mpd = new_mpd;
                                false
                            }
                            Err(error) => {
                                tracing::warn!(
                                    "Failed to resolve representation after reload: {error}"
                                );
                                false
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!("Failed to reload manifest: {error}");
                        false
                    }
                };
                back_off = if changed { 1.0 } else { (back_off * 1.3).min(10.0) };

                if mpd.mpdtype.as_deref() != Some("dynamic") {
                    tracing::debug!("Manifest became static, stream ended");
                    break;
                }

                // the reload's own cost comes out of the wait
                let elapsed = started.elapsed();
                if elapsed < interval && !cx.sleep(interval - elapsed).await {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn fetch(&self, segment: &DashSegment) -> RivuletResult<Bytes> {
        let inner = &self.inner;

        if let Some(available_at) = segment.available_at {
            wait_available(available_at, inner.now(), &segment.name).await;
        }

        let init = match &segment.init_url {
            Some(url) => Some(inner.init_bytes(url).await?),
            None => None,
        };

        let payload = fetch_bytes(
            &inner.client,
            segment.url.clone(),
            segment.byte_range.as_ref(),
            inner.options.segment_timeout,
        )
        .await?;

        Ok(match init {
            Some(init) => {
                let mut out = BytesMut::with_capacity(init.len() + payload.len());
                out.extend_from_slice(&init);
                out.extend_from_slice(&payload);
                out.freeze()
            }
            None => payload,
        })
    }
}

/// Availability gate: a segment is not requested before the manifest says it
/// exists. The sleep is abandoned with the fetch task when the pipeline
/// closes.
pub(crate) async fn wait_available(available_at: DateTime<Utc>, now: DateTime<Utc>, name: &str) {
    if available_at <= now {
        return;
    }
    let wait = (available_at - now).to_std().unwrap_or_default();
    tracing::debug!("Waiting for segment {name} ({:.01}s)", wait.as_secs_f64());
    tokio::time::sleep(wait).await;
}
