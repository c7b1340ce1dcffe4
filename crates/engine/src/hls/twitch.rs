use std::collections::HashMap;

use m3u8_rs::{MediaPlaylist, MediaSegment};
use tracing::debug;

/// Title given to segments rewritten from `#EXT-X-TWITCH-PREFETCH`.
pub const PREFETCH_SEGMENT_TITLE: &str = "PREFETCH_SEGMENT";

const STITCHED_AD_CLASS: &str = "twitch-stitched-ad";
const STITCHED_AD_ID_PREFIX: &str = "stitched-ad-";
const AD_TITLE_MARKER: &str = "Amazon";

#[inline]
pub fn is_twitch_playlist(url: &str) -> bool {
    url.contains("ttvnw.net")
}

/// Rewrite `#EXT-X-TWITCH-PREFETCH:<uri>` lines into regular segments titled
/// [`PREFETCH_SEGMENT_TITLE`] so that m3u8-rs keeps them.
pub fn preprocess_twitch_playlist(playlist_content: &str) -> String {
    let mut out = String::with_capacity(playlist_content.len());
    for line in playlist_content.lines() {
        if let Some(prefetch_uri) = line.strip_prefix("#EXT-X-TWITCH-PREFETCH:") {
            // duration is not advertised for prefetch segments
            out.push_str("#EXTINF:2.002,");
            out.push_str(PREFETCH_SEGMENT_TITLE);
            out.push('\n');
            out.push_str(prefetch_uri);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone)]
struct AdDateRange {
    start_ms: i64,
    end_ms: i64,
}

/// Flags stitched advertisement segments across playlist refreshes.
///
/// A segment is an ad when its program date time falls inside a known
/// stitched-ad `EXT-X-DATERANGE` window, when its title carries the Amazon ad
/// marker, or when it is the prefetch segment right after a discontinuity.
#[derive(Debug, Default)]
pub struct TwitchAdTracker {
    ad_dateranges: HashMap<String, AdDateRange>,
    discontinuity: bool,
}

impl TwitchAdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ad flag for every segment of `playlist`, index aligned.
    pub fn classify(&mut self, playlist: &MediaPlaylist) -> Vec<bool> {
        for segment in &playlist.segments {
            self.record_daterange(segment);
        }

        // ranges that ended before the playlist window cannot match again
        let min_pdt_ms = playlist
            .segments
            .iter()
            .filter_map(|s| s.program_date_time.map(|pdt| pdt.timestamp_millis()))
            .min();
        if let Some(min_pdt_ms) = min_pdt_ms {
            self.ad_dateranges.retain(|_id, dr| dr.end_ms >= min_pdt_ms);
        }

        playlist
            .segments
            .iter()
            .map(|segment| self.is_ad(segment))
            .collect()
    }

    fn record_daterange(&mut self, segment: &MediaSegment) {
        let Some(daterange) = &segment.daterange else {
            return;
        };
        if daterange.class.as_deref() != Some(STITCHED_AD_CLASS)
            && !daterange.id.starts_with(STITCHED_AD_ID_PREFIX)
        {
            return;
        }

        let start_ms = daterange.start_date.timestamp_millis();
        let end_ms = match (daterange.end_date, daterange.duration) {
            (Some(end), _) => end.timestamp_millis(),
            (None, Some(duration)) => start_ms + (duration * 1000.0) as i64,
            (None, None) => return,
        };

        let is_new = self
            .ad_dateranges
            .insert(daterange.id.clone(), AdDateRange { start_ms, end_ms })
            .is_none();
        if is_new {
            debug!(
                "New ad DATERANGE detected: id={}, class={:?}",
                daterange.id, daterange.class
            );
        }
    }

    fn is_ad(&mut self, segment: &MediaSegment) -> bool {
        let title = segment.title.as_deref().unwrap_or_default();
        let mut is_ad = title.contains(AD_TITLE_MARKER);

        if let Some(pdt) = segment.program_date_time {
            let pdt_ms = pdt.timestamp_millis();
            if self
                .ad_dateranges
                .values()
                .any(|dr| pdt_ms >= dr.start_ms && pdt_ms < dr.end_ms)
            {
                is_ad = true;
            }
        }

        if segment.discontinuity {
            self.discontinuity = true;
        } else if self.discontinuity {
            if title == PREFETCH_SEGMENT_TITLE {
                is_ad = true;
            }
            self.discontinuity = false;
        }

        is_ad
    }
}
