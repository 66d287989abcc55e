use chrono::{DateTime, TimeDelta, Utc};
use dash_mpd::{Period, Representation, MPD, S};
use reqwest::Url;

use crate::error::{RivuletError, RivuletResult};

use super::{
    manifest::{find_representation, RepresentationKey},
    segment::DashSegment,
    template::Template,
    url::{merge_baseurls, parse_media_range},
};

/// Where enumeration stopped, so a reloaded manifest only yields entries
/// past the last one already emitted. Sequence numbers stay monotonic
/// across reloads.
#[derive(Debug, Default)]
pub(crate) struct TimelineState {
    sequence: u64,
    /// Presentation-time cursor for timeline-addressed representations.
    next_time: Option<u64>,
    /// Number/index cursor for `$Number$`- and list-addressed representations.
    next_number: Option<u64>,
    init_sent: bool,
}

/// Enumerates the representation's segments that lie past the cursor in
/// `state`, resolving URLs and availability times against `now`.
pub(crate) fn collect_segments(
    mpd: &MPD,
    mpd_url: &Url,
    key: &RepresentationKey,
    state: &mut TimelineState,
    now: DateTime<Utc>,
) -> RivuletResult<Vec<DashSegment>> {
    let period = mpd
        .periods
        .first()
        .ok_or_else(|| RivuletError::ManifestError("No period in manifest".to_string()))?;
    let (adaptation_set, representation) = find_representation(period, key)
        .ok_or_else(|| RivuletError::NoRepresentation(format!("{} ({})", key.id, key.mime_type)))?;

    let mut base_url = mpd_url.clone();
    for base in &mpd.base_url {
        base_url = merge_baseurls(&base_url, &base.base)?;
    }
    for base in &period.BaseURL {
        base_url = merge_baseurls(&base_url, &base.base)?;
    }
    for base in &adaptation_set.BaseURL {
        base_url = merge_baseurls(&base_url, &base.base)?;
    }
    for base in &representation.BaseURL {
        base_url = merge_baseurls(&base_url, &base.base)?;
    }

    let is_dynamic = mpd.mpdtype.as_deref() == Some("dynamic");
    let period_start = period.start.unwrap_or_default();
    let availability_base = if is_dynamic {
        mpd.availabilityStartTime
            .or(mpd.publishTime)
            .map(|start| start + TimeDelta::milliseconds(period_start.as_millis() as i64))
    } else {
        None
    };

    let template = representation
        .SegmentTemplate
        .as_ref()
        .or(adaptation_set.SegmentTemplate.as_ref());
    let list = representation
        .SegmentList
        .as_ref()
        .or(adaptation_set.SegmentList.as_ref());

    let mut segments = Vec::new();
    let mut init_url: Option<Url> = None;

    if let Some(template) = template {
        let timescale = template.timescale.unwrap_or(1).max(1);
        let start_number = template.startNumber.unwrap_or(1);
        let media = template.media.as_ref().ok_or_else(|| {
            RivuletError::ManifestError("SegmentTemplate missing media template".to_string())
        })?;

        if !state.init_sent {
            if let Some(init) = &template.initialization {
                init_url = Some(resolve_url(init, representation, None, None, &base_url)?);
            }
        }

        if let Some(timeline) = &template.SegmentTimeline {
            let entries = &timeline.segments;
            let mut time = 0u64;
            let mut number = state.next_number.unwrap_or(start_number);

            for (index, entry) in entries.iter().enumerate() {
                if let Some(t) = entry.t {
                    time = t;
                }
                let duration = entry.d.max(1);
                let repeat = match entry.r.unwrap_or(0) {
                    r if r >= 0 => r as u64,
                    // negative repeat: until the next entry or the period end
                    _ => repeat_until(entries.get(index + 1), time, duration, period, timescale),
                };

                for _ in 0..=repeat {
                    if state.next_time.is_some_and(|next| time < next) {
                        time += duration;
                        continue;
                    }

                    let url =
                        resolve_url(media, representation, Some(number), Some(time), &base_url)?;
                    segments.push(DashSegment {
                        name: segment_name(&url),
                        url,
                        sequence: state.sequence,
                        number: Some(number),
                        time: Some(time),
                        duration: (duration as f64 / timescale as f64) as f32,
                        byte_range: None,
                        available_at: availability_base
                            .map(|base| base + scaled_delta(time + duration, timescale)),
                        init_url: None,
                    });
                    state.sequence += 1;
                    time += duration;
                    number += 1;
                }
            }

            state.next_time = Some(time);
            state.next_number = Some(number);
        } else {
            let duration_pts = template.duration.ok_or_else(|| {
                RivuletError::ManifestError("SegmentTemplate missing duration".to_string())
            })?;
            let seg_seconds = duration_pts / timescale as f64;
            if seg_seconds <= 0.0 {
                return Err(RivuletError::ManifestError(
                    "SegmentTemplate duration must be positive".to_string(),
                ));
            }

            if is_dynamic {
                let base = availability_base.ok_or_else(|| {
                    RivuletError::ManifestError(
                        "Dynamic manifest without availabilityStartTime".to_string(),
                    )
                })?;
                let elapsed = (now - base).num_milliseconds() as f64 / 1000.0;
                if elapsed >= 0.0 {
                    let live_number = start_number + (elapsed / seg_seconds).floor() as u64;
                    let first = state.next_number.unwrap_or(live_number);
                    for number in first..=live_number {
                        let url =
                            resolve_url(media, representation, Some(number), None, &base_url)?;
                        let end_offset = seg_seconds * (number - start_number + 1) as f64;
                        segments.push(DashSegment {
                            name: segment_name(&url),
                            url,
                            sequence: state.sequence,
                            number: Some(number),
                            time: None,
                            duration: seg_seconds as f32,
                            byte_range: None,
                            available_at: Some(
                                base + TimeDelta::milliseconds((end_offset * 1000.0) as i64),
                            ),
                            init_url: None,
                        });
                        state.sequence += 1;
                    }
                    state.next_number = Some(live_number + 1);
                }
            } else if state.next_number.is_none() {
                let total = period
                    .duration
                    .or(mpd.mediaPresentationDuration)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                let count = if total > 0.0 {
                    (total / seg_seconds).ceil() as u64
                } else {
                    1
                };
                for number in start_number..start_number + count {
                    let url = resolve_url(media, representation, Some(number), None, &base_url)?;
                    segments.push(DashSegment {
                        name: segment_name(&url),
                        url,
                        sequence: state.sequence,
                        number: Some(number),
                        time: None,
                        duration: seg_seconds as f32,
                        byte_range: None,
                        available_at: None,
                        init_url: None,
                    });
                    state.sequence += 1;
                }
                state.next_number = Some(start_number + count);
            }
        }
    } else if let Some(list) = list {
        let timescale = list.timescale.unwrap_or(1).max(1);
        if !state.init_sent {
            if let Some(init) = &list.Initialization {
                init_url = init
                    .sourceURL
                    .as_ref()
                    .map(|source| merge_baseurls(&base_url, source))
                    .transpose()?;
            }
        }

        let seg_seconds = list
            .duration
            .map(|d| d as f64 / timescale as f64)
            .unwrap_or(0.0);
        let start_index = state.next_number.unwrap_or(0) as usize;
        for (index, segment_url) in list.segment_urls.iter().enumerate().skip(start_index) {
            let media = segment_url.media.as_ref().ok_or_else(|| {
                RivuletError::ManifestError(format!("SegmentURL {index} missing media"))
            })?;
            let url = merge_baseurls(&base_url, media)?;
            let byte_range = segment_url
                .mediaRange
                .as_deref()
                .map(parse_media_range)
                .transpose()?;
            segments.push(DashSegment {
                name: segment_name(&url),
                url,
                sequence: state.sequence,
                number: Some(index as u64),
                time: None,
                duration: seg_seconds as f32,
                byte_range,
                available_at: None,
                init_url: None,
            });
            state.sequence += 1;
        }
        state.next_number = Some(list.segment_urls.len() as u64);
    } else if state.next_number.is_none() {
        // representation addressed by its BaseURL alone
        segments.push(DashSegment {
            name: segment_name(&base_url),
            url: base_url.clone(),
            sequence: state.sequence,
            number: None,
            time: None,
            duration: 0.0,
            byte_range: None,
            available_at: None,
            init_url: None,
        });
        state.sequence += 1;
        state.next_number = Some(1);
    }

    if let Some(init) = init_url {
        if let Some(first) = segments.first_mut() {
            first.init_url = Some(init);
            state.init_sent = true;
        }
    }

    Ok(segments)
}

fn repeat_until(next: Option<&S>, time: u64, duration: u64, period: &Period, timescale: u64) -> u64 {
    let until = next.and_then(|entry| entry.t).or_else(|| {
        period
            .duration
            .map(|d| (d.as_secs_f64() * timescale as f64) as u64)
    });
    match until {
        Some(until) if until > time => ((until - time) / duration).saturating_sub(1),
        _ => 0,
    }
}

fn resolve_url(
    template: &str,
    representation: &Representation,
    number: Option<u64>,
    time: Option<u64>,
    base_url: &Url,
) -> RivuletResult<Url> {
    let mut vars = Template::new();
    vars.insert(
        Template::REPRESENTATION_ID,
        representation.id.clone().unwrap_or_default(),
    );
    vars.insert(
        Template::BANDWIDTH,
        representation.bandwidth.unwrap_or(0).to_string(),
    );
    if let Some(number) = number {
        vars.insert(Template::NUMBER, number.to_string());
    }
    if let Some(time) = time {
        vars.insert(Template::TIME, time.to_string());
    }
    merge_baseurls(base_url, &vars.resolve(template))
}

fn segment_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("segment")
        .to_string()
}

fn scaled_delta(pts: u64, timescale: u64) -> TimeDelta {
    TimeDelta::milliseconds((pts as f64 / timescale as f64 * 1000.0) as i64)
}
