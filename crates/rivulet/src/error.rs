use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RivuletError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Exceeded retry limit while fetching playlist")]
    PlaylistFetchError,

    #[error("Invalid media playlist: {0}")]
    PlaylistParseError(String),

    #[error("Attempted to play a multivariant playlist, select a media playlist first")]
    MultivariantPlaylist,

    #[error("Streams containing I-frames only are not playable")]
    IframesOnlyPlaylist,

    #[error("Missing URI for decryption key")]
    MissingKeyUri,

    #[error("Unable to decrypt cipher {0}")]
    UnsupportedKeyMethod(String),

    #[error("Invalid AES-128 key: {0:?}")]
    InvalidAesKey(Vec<u8>),

    #[error("Pkcs7 unpad error")]
    UnpadError(#[from] UnpadError),

    #[error("Stream is protected by DRM: {0}")]
    DrmProtected(String),

    #[error("No representation {0} in manifest")]
    NoRepresentation(String),

    #[error("Invalid manifest: {0}")]
    ManifestError(String),

    /// The public reader was blocked longer than `stream-timeout` while the
    /// pipeline was still alive. Retriable, unlike end-of-stream.
    #[error("Read timeout")]
    ReadTimeout,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    // MPEG-DASH errors
    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    DateTimeParseError(#[from] chrono::ParseError),
}

impl RivuletError {
    /// Whether another attempt at the failed operation may succeed. Only
    /// transport failures qualify; decrypt and protocol errors do not get
    /// better by refetching the same bytes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_) | Self::RequestError(_) | Self::IOError(_)
        )
    }
}

pub type RivuletResult<T> = Result<T, RivuletError>;
