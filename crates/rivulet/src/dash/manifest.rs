use dash_mpd::{AdaptationSet, Period, Representation, MPD};
use reqwest::Url;

use crate::{
    error::{RivuletError, RivuletResult},
    util::http::HttpClient,
};

/// Identity of one representation: the pair the worker uses to re-resolve
/// its representation after every manifest reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepresentationKey {
    pub id: String,
    pub mime_type: String,
}

/// Candidate representation surfaced by manifest parsing.
#[derive(Debug, Clone)]
pub struct RepresentationInfo {
    pub key: RepresentationKey,
    pub bandwidth: u64,
    /// Language of the enclosing adaptation set, when declared.
    pub language: Option<String>,
    /// Whether the enclosing adaptation set carries the `main` role.
    pub main_role: bool,
}

/// Video and audio candidates of a manifest's first period.
#[derive(Debug, Default)]
pub struct ManifestStreams {
    pub video: Vec<RepresentationInfo>,
    pub audio: Vec<RepresentationInfo>,
}

/// Fetches and parses an MPD document.
pub async fn load_manifest(client: &HttpClient, url: &Url) -> RivuletResult<MPD> {
    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(RivuletError::HttpError(response.status()));
    }
    let text = response.text().await?;
    Ok(dash_mpd::parse(&text)?)
}

/// Collects the video and audio representation candidates of the first
/// period. Content protection anywhere in the manifest is fatal: a
/// DRM-protected stream cannot produce playable bytes.
pub fn collect_streams(mpd: &MPD, manifest_url: &Url) -> RivuletResult<ManifestStreams> {
    let period = mpd
        .periods
        .first()
        .ok_or_else(|| RivuletError::ManifestError("No period in manifest".to_string()))?;

    let mut streams = ManifestStreams::default();
    for adaptation_set in &period.adaptations {
        if !adaptation_set.ContentProtection.is_empty() {
            return Err(RivuletError::DrmProtected(manifest_url.to_string()));
        }

        let main_role = adaptation_set
            .Role
            .iter()
            .any(|role| role.value.as_deref() == Some("main"));

        for representation in &adaptation_set.representations {
            if !representation.ContentProtection.is_empty() {
                return Err(RivuletError::DrmProtected(manifest_url.to_string()));
            }

            let (Some(id), Some(mime_type)) = (
                representation.id.clone(),
                representation
                    .mimeType
                    .clone()
                    .or_else(|| adaptation_set.mimeType.clone()),
            ) else {
                continue;
            };

            let info = RepresentationInfo {
                key: RepresentationKey { id, mime_type },
                bandwidth: representation.bandwidth.unwrap_or(0),
                language: adaptation_set.lang.clone(),
                main_role,
            };

            let content_type = adaptation_set.contentType.as_deref().unwrap_or_default();
            if info.key.mime_type.starts_with("video") || content_type.starts_with("video") {
                streams.video.push(info);
            } else if info.key.mime_type.starts_with("audio") || content_type.starts_with("audio") {
                streams.audio.push(info);
            }
        }
    }

    Ok(streams)
}

/// The highest-bandwidth video candidate. Picked once, before the pipeline
/// starts; there is no adaptive switching.
pub fn select_video(streams: &ManifestStreams) -> Option<&RepresentationInfo> {
    streams.video.iter().max_by_key(|info| info.bandwidth)
}

/// Picks the audio track: a language match first, then the `main` role, then
/// the first listed.
pub fn select_audio<'a>(
    streams: &'a ManifestStreams,
    language: Option<&str>,
) -> Option<&'a RepresentationInfo> {
    if let Some(language) = language {
        let found = streams.audio.iter().find(|info| {
            info.language
                .as_deref()
                .is_some_and(|l| language_matches(l, language))
        });
        if found.is_some() {
            return found;
        }
    }

    streams
        .audio
        .iter()
        .find(|info| info.main_role)
        .or_else(|| streams.audio.first())
}

/// Primary-subtag comparison: `en` matches `en-US`.
fn language_matches(declared: &str, wanted: &str) -> bool {
    let primary = |tag: &str| -> String {
        tag.split(['-', '_']).next().unwrap_or(tag).to_ascii_lowercase()
    };
    primary(declared) == primary(wanted)
}

pub(crate) fn find_representation<'a>(
    period: &'a Period,
    key: &RepresentationKey,
) -> Option<(&'a AdaptationSet, &'a Representation)> {
    for adaptation_set in &period.adaptations {
        for representation in &adaptation_set.representations {
            let mime_type = representation
                .mimeType
                .as_deref()
                .or(adaptation_set.mimeType.as_deref());
            if representation.id.as_deref() == Some(key.id.as_str())
                && mime_type == Some(key.mime_type.as_str())
            {
                return Some((adaptation_set, representation));
            }
        }
    }
    None
}
