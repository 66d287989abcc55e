/// Byte sub-range of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    pub fn to_http_range(&self) -> String {
        if let Some(length) = self.length {
            format!("bytes={}-{}", self.offset, self.offset + length - 1)
        } else {
            format!("bytes={}-", self.offset)
        }
    }
}

/// A discrete, independently fetchable chunk of media payload.
///
/// `sequence` is the only ordering authority: the pipeline commits payloads
/// to the buffer in ascending sequence order no matter how fetches complete.
pub trait StreamSegment {
    fn sequence(&self) -> u64;

    fn name(&self) -> &str;

    /// Segment duration in seconds.
    fn duration(&self) -> f32 {
        0.0
    }
}

/// Identity snapshot of a segment, kept around for logging after the
/// descriptor itself has moved into a fetch task.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub sequence: u64,
    pub name: String,
    pub duration: f32,
}

impl<T> From<&T> for SegmentInfo
where
    T: StreamSegment,
{
    fn from(segment: &T) -> Self {
        Self {
            sequence: segment.sequence(),
            name: segment.name().to_string(),
            duration: segment.duration(),
        }
    }
}
