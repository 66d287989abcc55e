use std::{collections::HashMap, time::Duration};

use m3u8_rs::MediaPlaylist;
use reqwest::Url;

use crate::{
    decrypt::KeySpec,
    error::{RivuletError, RivuletResult},
    options::{ReloadInterval, StreamOptions},
    segment::ByteRange,
};

use super::segment::HlsSegment;

/// One parsed media-playlist window. Replaced wholesale on every reload;
/// media sequence numbering is monotonic across reloads.
pub struct PlaylistWindow {
    pub segments: Vec<HlsSegment>,
    pub target_duration: f64,
    pub end_list: bool,
}

/// Carry-over state for playlist parsing: the byte-range cursor per URI and
/// the active `EXT-X-MAP` URI, both of which outlive a single window.
#[derive(Default)]
pub(crate) struct ParseContext {
    pub(crate) key_uri_override: Option<String>,
    byterange_offsets: HashMap<String, u64>,
    last_map_uri: Option<String>,
}

impl ParseContext {
    pub(crate) fn new(options: &StreamOptions) -> Self {
        Self {
            key_uri_override: options.hls_segment_key_uri.clone(),
            ..Default::default()
        }
    }
}

impl PlaylistWindow {
    /// Turns a parsed media playlist into a window of segment descriptors.
    ///
    /// `EXT-X-KEY` and `EXT-X-MAP` apply to every following segment until
    /// superseded. A relative `EXT-X-BYTERANGE` (length without offset)
    /// continues from the end of the previous sub-range of the same URI;
    /// the cursor lives in `ctx` and survives reloads.
    pub(crate) fn from_media_playlist(
        playlist: &MediaPlaylist,
        playlist_url: &Url,
        ctx: &mut ParseContext,
    ) -> RivuletResult<Self> {
        if playlist.i_frames_only {
            return Err(RivuletError::IframesOnlyPlaylist);
        }

        let mut key: Option<KeySpec> = None;
        let mut segments = Vec::with_capacity(playlist.segments.len());
        for (i, segment) in playlist.segments.iter().enumerate() {
            if let Some(k) = &segment.key {
                key = KeySpec::from_playlist_key(k, playlist_url, ctx.key_uri_override.as_deref())?;
            }

            let init_url = match &segment.map {
                Some(map) if ctx.last_map_uri.as_deref() != Some(map.uri.as_str()) => {
                    ctx.last_map_uri = Some(map.uri.clone());
                    Some(playlist_url.join(&map.uri)?)
                }
                _ => None,
            };

            let byte_range = segment.byte_range.as_ref().map(|range| {
                let offset = range.offset.unwrap_or_else(|| {
                    ctx.byterange_offsets
                        .get(segment.uri.as_str())
                        .copied()
                        .unwrap_or(0)
                });
                ctx.byterange_offsets
                    .insert(segment.uri.clone(), offset + range.length);
                ByteRange::new(offset, Some(range.length))
            });

            let url = playlist_url.join(&segment.uri)?;
            let name = url
                .path_segments()
                .and_then(|c| c.last())
                .filter(|s| !s.is_empty())
                .unwrap_or("segment")
                .to_string();

            segments.push(HlsSegment {
                url,
                name,
                media_sequence: playlist.media_sequence + i as u64,
                duration: segment.duration,
                key: key.clone(),
                byte_range,
                init_url,
            });
        }

        Ok(Self {
            segments,
            target_duration: playlist.target_duration as f64,
            end_list: playlist.end_list,
        })
    }
}

/// Emission state across reloads of a (possibly live) media playlist.
///
/// The window is trusted wholesale on every update; this struct only tracks
/// where emission stopped, when the stream ends, and how fast to poll.
pub(crate) struct PlaylistState {
    live_edge: usize,
    live_restart: bool,
    start_offset: f64,
    duration_limit: Option<f64>,
    reload_override: ReloadInterval,

    window: Vec<HlsSegment>,
    window_sequences: Vec<u64>,
    next_sequence: Option<u64>,
    end_sequence: Option<u64>,
    reload_time: Duration,
    total_duration: f64,
    finished: bool,
}

impl PlaylistState {
    pub(crate) fn new(options: &StreamOptions) -> Self {
        Self {
            live_edge: options.hls_live_edge.max(1),
            live_restart: options.hls_live_restart,
            start_offset: options.hls_start_offset,
            duration_limit: options.hls_duration,
            reload_override: options.hls_playlist_reload_time,

            window: Vec::new(),
            window_sequences: Vec::new(),
            next_sequence: None,
            end_sequence: None,
            reload_time: Duration::from_secs(6),
            total_duration: 0.0,
            finished: false,
        }
    }

    /// Replaces the window with a fresh reload. A reload that does not
    /// advance the window halves the poll interval (floored at one second)
    /// so the live edge is picked up quickly once it moves again.
    pub(crate) fn update(&mut self, window: PlaylistWindow) {
        let sequences: Vec<u64> = window.segments.iter().map(|s| s.media_sequence).collect();
        let changed = self.window_sequences != sequences;

        self.reload_time = if changed {
            self.compute_reload_time(&window)
        } else {
            (self.reload_time / 2).max(Duration::from_secs(1))
        };

        if window.end_list {
            self.end_sequence = sequences.last().copied();
        }

        if self.next_sequence.is_none() && !window.segments.is_empty() {
            let start = self.starting_sequence(&window);
            tracing::debug!(
                "First sequence: {}; last sequence: {}; starting at: {start}",
                sequences[0],
                sequences[sequences.len() - 1]
            );
            self.next_sequence = Some(start);
        }

        self.window = window.segments;
        self.window_sequences = sequences;
    }

    /// Segments at or past the emission cursor. Advances the cursor and
    /// applies the duration limit and end-of-list detection.
    pub(crate) fn take_ready(&mut self) -> Vec<HlsSegment> {
        if self.finished {
            return Vec::new();
        }
        let Some(next) = self.next_sequence else {
            return Vec::new();
        };

        let mut ready: Vec<HlsSegment> = Vec::new();
        for segment in &self.window {
            if segment.media_sequence < next {
                continue;
            }
            ready.push(segment.clone());
        }

        if let Some(first) = ready.first() {
            if first.media_sequence > next {
                // pruned server-side; resume at the lowest sequence still served
                tracing::warn!(
                    "Sequences {next}..{} lost from the live window, resuming",
                    first.media_sequence
                );
            }
        }

        if let Some(limit) = self.duration_limit {
            let mut kept = Vec::with_capacity(ready.len());
            for segment in ready {
                self.total_duration += segment.duration as f64;
                kept.push(segment);
                if self.total_duration >= limit {
                    tracing::info!("Stopping stream early after {limit}");
                    self.finished = true;
                    break;
                }
            }
            ready = kept;
        }

        if let Some(last) = ready.last() {
            self.next_sequence = Some(last.media_sequence + 1);
        }
        if let (Some(end), Some(next)) = (self.end_sequence, self.next_sequence) {
            if next > end {
                self.finished = true;
            }
        }

        ready
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn reload_interval(&self) -> Duration {
        self.reload_time
    }

    /// Reload interval priority: explicit override, the playlist's target
    /// duration, the trailing live-edge window, the previous interval.
    fn compute_reload_time(&self, window: &PlaylistWindow) -> Duration {
        let segments = &window.segments;
        let overridden = match self.reload_override {
            ReloadInterval::BySegment if !segments.is_empty() => {
                segments[segments.len() - 1].duration as f64
            }
            ReloadInterval::ByLiveEdge if !segments.is_empty() => {
                self.trailing_window_duration(segments)
            }
            ReloadInterval::Fixed(seconds) => seconds,
            _ => 0.0,
        };

        let seconds = if overridden > 0.0 {
            overridden
        } else if window.target_duration > 0.0 {
            window.target_duration
        } else if !segments.is_empty() {
            self.trailing_window_duration(segments)
        } else {
            0.0
        };

        if seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            self.reload_time
        }
    }

    fn trailing_window_duration(&self, segments: &[HlsSegment]) -> f64 {
        let count = self.live_edge.saturating_sub(1).max(1).min(segments.len());
        segments[segments.len() - count..]
            .iter()
            .map(|s| s.duration as f64)
            .sum()
    }

    /// The first sequence to emit, decided once, on the first non-empty
    /// window: the live edge for live streams (unless restarting from the
    /// beginning), the first segment otherwise; a start offset walks the
    /// window by duration instead.
    fn starting_sequence(&self, window: &PlaylistWindow) -> u64 {
        let segments = &window.segments;
        let is_live = !window.end_list;

        // offsets point backwards from the edge on live streams
        let offset = if is_live {
            -self.start_offset.abs()
        } else {
            self.start_offset
        };
        if offset != 0.0 {
            return Self::duration_to_sequence(offset, segments);
        }

        if is_live && !self.live_restart {
            let edge = self.live_edge.min(segments.len());
            segments[segments.len() - edge].media_sequence
        } else {
            segments[0].media_sequence
        }
    }

    /// Walks the window accumulating durations until `offset` seconds are
    /// covered; negative offsets walk backwards from the live edge.
    fn duration_to_sequence(offset: f64, segments: &[HlsSegment]) -> u64 {
        let mut covered = 0.0;
        let mut fallback = segments[0].media_sequence;

        let walk: Box<dyn Iterator<Item = &HlsSegment>> = if offset >= 0.0 {
            Box::new(segments.iter())
        } else {
            Box::new(segments.iter().rev())
        };
        for segment in walk {
            if covered >= offset.abs() {
                return segment.media_sequence;
            }
            covered += segment.duration as f64;
            fallback = segment.media_sequence;
        }

        // could not skip far enough
        fallback
    }
}
