use std::time::Duration;

/// How long a live HLS playlist waits between reloads.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ReloadInterval {
    /// The playlist's target duration, falling back to the duration of the
    /// trailing live-edge window.
    #[default]
    Default,
    /// The duration of the most recent segment.
    BySegment,
    /// The summed duration of the segments inside the live-edge window.
    ByLiveEdge,
    /// A fixed interval in seconds. Values below 2 are rejected at parse
    /// time and fall back to [`ReloadInterval::Default`].
    Fixed(f64),
}

impl std::str::FromStr for ReloadInterval {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "segment" => Self::BySegment,
            "live-edge" => Self::ByLiveEdge,
            _ => match s.parse::<f64>() {
                Ok(seconds) if seconds >= 2.0 => Self::Fixed(seconds),
                _ => Self::Default,
            },
        })
    }
}

/// Tunables recognized by the pipeline and the segment sources.
///
/// Field names follow the option keys of the configuration surface:
/// `stream-segment-attempts` is [`segment_attempts`](Self::segment_attempts)
/// and so on. Defaults match the values a session starts with.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// How many attempts are made to fetch one segment before it is dropped.
    pub segment_attempts: u32,
    /// Size of the pool performing segment fetches.
    pub segment_threads: usize,
    /// Connect and read timeout for one segment fetch.
    pub segment_timeout: Duration,
    /// How long a blocked [`read`](crate::StreamReader::read) waits for data.
    pub stream_timeout: Duration,
    /// Capacity of the ring buffer between the pipeline and the reader.
    pub ringbuffer_size: usize,

    /// How many segments from the live edge playback of a live stream starts.
    pub hls_live_edge: usize,
    /// Start live streams from the first segment of the window instead.
    pub hls_live_restart: bool,
    /// Seconds skipped from the start (negative: back from the live edge).
    pub hls_start_offset: f64,
    /// Stop after this many seconds of stream have been emitted.
    pub hls_duration: Option<f64>,
    /// Attempts per playlist fetch before a reload counts as failed.
    pub hls_playlist_reload_attempts: u32,
    pub hls_playlist_reload_time: ReloadInterval,
    /// Name fragments of segments that are skipped instead of fetched.
    pub hls_segment_ignore_names: Vec<String>,
    /// Template overriding the decryption key URI; may reference `{url}`,
    /// `{scheme}`, `{netloc}`, `{path}` and `{query}` of the declared URI.
    pub hls_segment_key_uri: Option<String>,

    /// Preferred audio language for DASH representation selection.
    pub dash_audio_language: Option<String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            segment_attempts: 3,
            segment_threads: 1,
            segment_timeout: Duration::from_secs(10),
            stream_timeout: Duration::from_secs(60),
            ringbuffer_size: 16 * 1024 * 1024,

            hls_live_edge: 3,
            hls_live_restart: false,
            hls_start_offset: 0.0,
            hls_duration: None,
            hls_playlist_reload_attempts: 3,
            hls_playlist_reload_time: ReloadInterval::Default,
            hls_segment_ignore_names: Vec::new(),
            hls_segment_key_uri: None,

            dash_audio_language: None,
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_attempts(mut self, attempts: u32) -> Self {
        self.segment_attempts = attempts.max(1);
        self
    }

    pub fn segment_threads(mut self, threads: usize) -> Self {
        self.segment_threads = threads.max(1);
        self
    }

    pub fn segment_timeout(mut self, timeout: Duration) -> Self {
        self.segment_timeout = timeout;
        self
    }

    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn ringbuffer_size(mut self, size: usize) -> Self {
        self.ringbuffer_size = size;
        self
    }

    pub fn live_edge(mut self, live_edge: usize) -> Self {
        self.hls_live_edge = live_edge.max(1);
        self
    }

    pub fn live_restart(mut self, restart: bool) -> Self {
        self.hls_live_restart = restart;
        self
    }

    pub fn start_offset(mut self, seconds: f64) -> Self {
        self.hls_start_offset = seconds;
        self
    }

    pub fn duration_limit(mut self, seconds: f64) -> Self {
        self.hls_duration = Some(seconds);
        self
    }

    pub fn playlist_reload_time(mut self, interval: ReloadInterval) -> Self {
        self.hls_playlist_reload_time = interval;
        self
    }

    pub fn ignore_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hls_segment_ignore_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn key_uri_override(mut self, template: impl Into<String>) -> Self {
        self.hls_segment_key_uri = Some(template.into());
        self
    }

    pub fn audio_language(mut self, language: impl Into<String>) -> Self {
        self.dash_audio_language = Some(language.into());
        self
    }
}
