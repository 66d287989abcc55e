//! HLS media-playlist segment source: live-edge tracking, reload pacing,
//! AES-128 decryption and byte-range segments.

mod playlist;
mod segment;
mod source;

pub use playlist::PlaylistWindow;
pub use segment::HlsSegment;
pub use source::HlsSource;
