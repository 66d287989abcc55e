use url::Url;

use crate::{error::RivuletError, segment::ByteRange, RivuletResult};

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

/// Resolves a `BaseURL`/media reference against the current base, keeping the
/// current URL's query string unless the new reference carries its own.
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> RivuletResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// Parses a `mediaRange` byte-range-spec (`first-last`, inclusive).
pub(crate) fn parse_media_range<S>(s: S) -> RivuletResult<ByteRange>
where
    S: AsRef<str>,
{
    let (start, end) = s
        .as_ref()
        .split_once('-')
        .ok_or_else(|| RivuletError::ManifestError("Invalid media range".to_string()))?;

    let first_byte_pos = start
        .parse::<u64>()
        .map_err(|_| RivuletError::ManifestError("Invalid media range".to_string()))?;
    let last_byte_pos = end.parse::<u64>().ok();

    Ok(ByteRange {
        offset: first_byte_pos,
        // 0-500 addresses 501 bytes
        length: last_byte_pos.map(|last_byte_pos| last_byte_pos - first_byte_pos + 1),
    })
}
