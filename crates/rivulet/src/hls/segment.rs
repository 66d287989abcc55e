use crate::{
    decrypt::KeySpec,
    segment::{ByteRange, StreamSegment},
};

/// One media segment produced by the playlist state machine.
#[derive(Debug, Clone)]
pub struct HlsSegment {
    pub url: reqwest::Url,
    pub name: String,

    /// Media sequence number from the playlist. Orders commits and seeds IV
    /// derivation for encrypted segments.
    pub media_sequence: u64,
    pub duration: f32,

    pub key: Option<KeySpec>,
    /// Absolute sub-range of `url`, resolved from `EXT-X-BYTERANGE`.
    pub byte_range: Option<ByteRange>,
    /// Initialization segment to prepend; set on the first segment of each
    /// `EXT-X-MAP` scope.
    pub init_url: Option<reqwest::Url>,
}

impl StreamSegment for HlsSegment {
    fn sequence(&self) -> u64 {
        self.media_sequence
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn duration(&self) -> f32 {
        self.duration
    }
}
