use chrono::{DateTime, Utc};

use crate::segment::{ByteRange, StreamSegment};

/// One media segment resolved from the manifest timeline.
#[derive(Debug, Clone)]
pub struct DashSegment {
    pub url: reqwest::Url,
    pub name: String,

    /// Source-assigned sequence, monotonic across manifest reloads.
    pub sequence: u64,
    /// `$Number$` of the segment, when the template uses one.
    pub number: Option<u64>,
    /// `$Time$` (presentation time in timescale units), when known.
    pub time: Option<u64>,
    pub duration: f32,

    pub byte_range: Option<ByteRange>,
    /// Earliest wall-clock instant the segment may be fetched at. `None` for
    /// static manifests, which are fully available.
    pub available_at: Option<DateTime<Utc>>,
    /// Initialization segment to prepend, carried by the first segment.
    pub init_url: Option<reqwest::Url>,
}

impl StreamSegment for DashSegment {
    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn duration(&self) -> f32 {
        self.duration
    }
}
