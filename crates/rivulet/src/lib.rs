pub mod buffer;
pub mod dash;
pub mod decrypt;
pub mod error;
mod executor;
mod fetch;
pub mod hls;
pub mod options;
pub mod pipeline;
pub mod reader;
pub mod segment;
pub mod util;

pub use buffer::RingBuffer;
pub use error::{RivuletError, RivuletResult};
pub use options::{ReloadInterval, StreamOptions};
pub use pipeline::{SourceContext, StreamPipeline};
pub use reader::{BlockingReader, StreamReader};
pub use segment::{ByteRange, SegmentInfo, StreamSegment};
pub use util::http::HttpClient;

/// ┌───────────────────────┐              ┌─────────────────────┐
/// │                       │  Segment 5   │                     ├───┐
/// │                       ├──────────────►                     │   │fetch
/// │   Playlist/Manifest   │  Segment 6   │    FetchExecutor    ◄───┘
/// │     state machine     ├──────────────►                     ├───┐
/// │    (SegmentSource)    │  Segment 7   │  pool + in-order    │   │fetch
/// │                       ├──────────────►       commit        ◄───┘
/// └───────────▲───────────┘              └──────────┬──────────┘
///             │ reload                              │ ordered bytes
///             │                          ┌──────────▼──────────┐
///             └──────────────────────────┤     RingBuffer      │
///                  backpressure          │   (StreamReader)    │
///                                        └─────────────────────┘
pub trait SegmentSource {
    type Segment: StreamSegment + Send + Sync + 'static;

    /// Spawns the protocol state machine and returns the channel it feeds
    /// segment batches into. Errors returned here are fatal: no playable
    /// content exists, and the pipeline never starts.
    ///
    /// The state machine uses `cx` to throttle reloads on the shared buffer
    /// and to wake up early when the pipeline closes.
    fn segments(
        &self,
        cx: SourceContext,
    ) -> impl std::future::Future<
        Output = RivuletResult<tokio::sync::mpsc::UnboundedReceiver<Vec<Self::Segment>>>,
    > + Send;

    /// Fetches and decodes the payload of one segment. Transport failures
    /// reported from here are retried by the executor; anything else drops
    /// the segment.
    fn fetch(
        &self,
        segment: &Self::Segment,
    ) -> impl std::future::Future<Output = RivuletResult<bytes::Bytes>> + Send;
}
