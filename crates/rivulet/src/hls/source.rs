use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use m3u8_rs::{MediaPlaylist, Playlist};
use regex::Regex;
use reqwest::Url;
use tokio::sync::{mpsc, Mutex};

use crate::{
    decrypt::{KeyCache, KeySpec, SegmentKey},
    error::{RivuletError, RivuletResult},
    fetch::fetch_bytes,
    options::StreamOptions,
    pipeline::SourceContext,
    util::http::HttpClient,
    SegmentSource,
};

use super::{
    playlist::{ParseContext, PlaylistState, PlaylistWindow},
    segment::HlsSegment,
};

/// Segment source backed by an HLS media playlist.
///
/// The URL must point at a media playlist; multivariant playlists are
/// rejected, picking a rendition is the caller's job.
pub struct HlsSource {
    inner: Arc<HlsInner>,
}

struct HlsInner {
    client: HttpClient,
    playlist_url: Url,
    options: StreamOptions,
    ignore_names: Option<Regex>,
    key_cache: KeyCache,
    init_cache: Mutex<Option<(Url, Arc<Vec<u8>>)>>,
}

impl HlsSource {
    pub fn new(client: HttpClient, playlist_url: Url, options: StreamOptions) -> Self {
        let ignore_names = (!options.hls_segment_ignore_names.is_empty()).then(|| {
            let names = options
                .hls_segment_ignore_names
                .iter()
                .map(|name| regex::escape(name))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)(?:{names})\.ts")).expect("ignore-names regex")
        });

        Self {
            inner: Arc::new(HlsInner {
                client,
                playlist_url,
                options,
                ignore_names,
                key_cache: KeyCache::new(),
                init_cache: Mutex::new(None),
            }),
        }
    }
}

impl HlsInner {
    /// Fetches and parses the media playlist, retrying transport and parse
    /// failures up to `hls-playlist-reload-attempts` times. A multivariant
    /// playlist fails immediately; there is nothing to retry.
    async fn load_playlist(&self) -> RivuletResult<MediaPlaylist> {
        let mut retry = self.options.hls_playlist_reload_attempts.max(1);
        loop {
            if retry == 0 {
                return Err(RivuletError::PlaylistFetchError);
            }

            match self.fetch_playlist_once().await {
                Ok(Playlist::MasterPlaylist(_)) => return Err(RivuletError::MultivariantPlaylist),
                Ok(Playlist::MediaPlaylist(playlist)) => return Ok(playlist),
                Err(error) => {
                    log::warn!("Failed to fetch playlist: {error}");
                    retry -= 1;
                }
            }
        }
    }

    async fn fetch_playlist_once(&self) -> RivuletResult<Playlist> {
        let response = self.client.get(self.playlist_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(RivuletError::HttpError(response.status()));
        }
        let bytes = response.bytes().await?;
        m3u8_rs::parse_playlist_res(&bytes)
            .map_err(|error| RivuletError::PlaylistParseError(error.to_string()))
    }

    /// Initialization segment bytes, fetched once per map URI.
    async fn init_bytes(&self, url: &Url) -> RivuletResult<Arc<Vec<u8>>> {
        let mut cache = self.init_cache.lock().await;
        if let Some((cached_url, bytes)) = cache.as_ref() {
            if cached_url == url {
                return Ok(bytes.clone());
            }
        }

        let bytes = fetch_bytes(
            &self.client,
            url.clone(),
            None,
            self.options.segment_timeout,
        )
        .await?;
        let bytes = Arc::new(bytes.to_vec());
        *cache = Some((url.clone(), bytes.clone()));
        Ok(bytes)
    }
}

impl SegmentSource for HlsSource {
    type Segment = HlsSegment;

    async fn segments(
        &self,
        cx: SourceContext,
    ) -> RivuletResult<mpsc::UnboundedReceiver<Vec<HlsSegment>>> {
        let inner = self.inner.clone();

        // The first load is fatal on error: there is no stream to play.
        let playlist = inner.load_playlist().await?;
        let mut parse = ParseContext::new(&inner.options);
        let window = PlaylistWindow::from_media_playlist(&playlist, &inner.playlist_url, &mut parse)?;
        let mut state = PlaylistState::new(&inner.options);
        state.update(window);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let ready = state.take_ready();
                if !ready.is_empty() {
                    for segment in &ready {
                        tracing::debug!(
                            sequence = segment.media_sequence,
                            "Adding segment {} to queue",
                            segment.name
                        );
                    }
                    if tx.send(ready).is_err() {
                        break;
                    }
                }
                if state.is_finished() {
                    break;
                }

                if !cx.sleep(state.reload_interval()).await {
                    break;
                }
                cx.wait_free().await;
                if cx.is_closing() {
                    break;
                }

                tracing::debug!("Reloading playlist");
                let reloaded = match inner.load_playlist().await {
                    Ok(playlist) => PlaylistWindow::from_media_playlist(
                        &playlist,
                        &inner.playlist_url,
                        &mut parse,
                    ),
                    Err(error) => Err(error),
                };
                // a failed reload is not fatal; back off and poll again
                match reloaded {
                    Ok(window) => state.update(window),
                    Err(error) => tracing::warn!("Failed to reload playlist: {error}"),
                }
            }
        });

        Ok(rx)
    }

    async fn fetch(&self, segment: &HlsSegment) -> RivuletResult<Bytes> {
        let inner = &self.inner;

        if let Some(ignore) = &inner.ignore_names {
            if ignore.is_match(segment.url.path()) {
                tracing::debug!(
                    sequence = segment.media_sequence,
                    "Skipping segment {}",
                    segment.name
                );
                return Ok(Bytes::new());
            }
        }

        let init = match &segment.init_url {
            Some(url) => Some(inner.init_bytes(url).await?),
            None => None,
        };

        let bytes = fetch_bytes(
            &inner.client,
            segment.url.clone(),
            segment.byte_range.as_ref(),
            inner.options.segment_timeout,
        )
        .await?;

        let payload = match &segment.key {
            Some(KeySpec::Aes128 { uri, iv }) => {
                let material = inner.key_cache.material(&inner.client, uri).await?;
                let key = SegmentKey::for_sequence(material, *iv, segment.media_sequence);
                Bytes::from(key.decrypt(&bytes)?)
            }
            None => bytes,
        };

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
