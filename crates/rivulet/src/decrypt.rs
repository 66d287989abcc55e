use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use m3u8_rs::KeyMethod;
use reqwest::Url;
use tokio::sync::Mutex;

use crate::{
    error::{RivuletError, RivuletResult},
    util::http::HttpClient,
};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Reference to the key a segment was encrypted with. The key material
/// itself is fetched lazily through [`KeyCache`] when the first segment
/// using it is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySpec {
    Aes128 {
        /// Absolute key URI, after override template expansion.
        uri: String,
        /// Explicit IV from the playlist; derived from the media sequence
        /// number when absent.
        iv: Option<[u8; 16]>,
    },
}

impl KeySpec {
    /// Builds the key reference for an `EXT-X-KEY` tag. Returns `None` for
    /// method NONE. Methods other than AES-128 cannot be played.
    pub fn from_playlist_key(
        key: &m3u8_rs::Key,
        playlist_url: &Url,
        uri_override: Option<&str>,
    ) -> RivuletResult<Option<Self>> {
        match &key.method {
            KeyMethod::None => Ok(None),
            KeyMethod::AES128 => {
                let declared = match &key.uri {
                    Some(uri) => Some(playlist_url.join(uri)?),
                    None => None,
                };
                let uri = match (uri_override, &declared) {
                    (Some(template), Some(declared)) => expand_key_uri(template, declared),
                    (Some(template), None) => template.to_string(),
                    (None, Some(declared)) => declared.to_string(),
                    (None, None) => return Err(RivuletError::MissingKeyUri),
                };

                Ok(Some(Self::Aes128 {
                    uri,
                    iv: key.iv.as_deref().and_then(parse_iv),
                }))
            }
            KeyMethod::SampleAES => Err(RivuletError::UnsupportedKeyMethod("SAMPLE-AES".into())),
            KeyMethod::Other(name) => Err(RivuletError::UnsupportedKeyMethod(name.clone())),
        }
    }
}

/// Expands a `hls-segment-key-uri` template against the playlist-declared
/// key URI.
fn expand_key_uri(template: &str, declared: &Url) -> String {
    let netloc = match (declared.host_str(), declared.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    template
        .replace("{url}", declared.as_str())
        .replace("{scheme}", declared.scheme())
        .replace("{netloc}", &netloc)
        .replace("{path}", declared.path())
        .replace("{query}", declared.query().unwrap_or(""))
}

/// Parses an `IV=` attribute. Short values are zero-padded on the left, the
/// same as deriving from an integer.
fn parse_iv(iv: &str) -> Option<[u8; 16]> {
    let iv = iv.strip_prefix("0x").or(iv.strip_prefix("0X")).unwrap_or(iv);
    let bytes = hex::decode(format!("{iv:0>32}")).ok()?;
    bytes.try_into().ok()
}

/// Key material plus IV, resolved for one segment.
pub struct SegmentKey {
    key: [u8; 16],
    iv: [u8; 16],
}

impl SegmentKey {
    /// Pairs fetched key material with the segment's IV: the explicit one if
    /// the playlist declared it, otherwise the big-endian media sequence
    /// number zero-padded to 16 bytes.
    pub fn for_sequence(key: [u8; 16], explicit_iv: Option<[u8; 16]>, media_sequence: u64) -> Self {
        Self {
            key,
            iv: explicit_iv.unwrap_or((media_sequence as u128).to_be_bytes()),
        }
    }

    /// AES-128-CBC decrypt with PKCS#7 padding removal. A padding failure is
    /// not a transport error and must not be retried.
    pub fn decrypt(&self, data: &[u8]) -> RivuletResult<Vec<u8>> {
        Ok(Aes128CbcDec::new((&self.key).into(), (&self.iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(data)?)
    }
}

/// Lazily fetched key material, cached for as long as the key URI stays the
/// same and refetched when a new URI supersedes it.
pub struct KeyCache {
    cached: Mutex<Option<(String, [u8; 16])>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    pub async fn material(&self, client: &HttpClient, uri: &str) -> RivuletResult<[u8; 16]> {
        let mut cached = self.cached.lock().await;
        if let Some((cached_uri, key)) = cached.as_ref() {
            if cached_uri == uri {
                return Ok(*key);
            }
        }

        tracing::debug!("Fetching decryption key from {uri}");
        let response = client.get(Url::parse(uri)?).send().await?;
        if !response.status().is_success() {
            return Err(RivuletError::HttpError(response.status()));
        }
        let bytes = response.bytes().await?;
        let key: [u8; 16] = bytes
            .to_vec()
            .try_into()
            .map_err(RivuletError::InvalidAesKey)?;

        *cached = Some((uri.to_string(), key));
        Ok(key)
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}
