use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, VariantStream};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::events::{FinishReason, ReaderEvent, ReaderSummary, SegmentAnnouncement};
use super::twitch::{
    PREFETCH_SEGMENT_TITLE, TwitchAdTracker, is_twitch_playlist, preprocess_twitch_playlist,
};
use crate::config::PlaylistConfig;
use crate::error::DownloadError;

/// Source of segment announcements for one recording.
///
/// The returned receiver yields one `Quality` event, any number of `Segment`
/// and `Error` events, then one `Finish` event. Sessions are not restartable.
#[async_trait]
pub trait ManifestReader: Send + Sync {
    async fn open(
        &self,
        url: &str,
        quality: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ReaderEvent>, DownloadError>;
}

/// Turns successive snapshots of a live media playlist into announcements.
///
/// Each media sequence number is announced at most once and in strictly
/// increasing order: anything at or below the high-water mark is dropped.
#[derive(Debug)]
pub struct PlaylistCursor {
    low_latency: bool,
    high_water: Option<u64>,
    ad_tracker: Option<TwitchAdTracker>,
    announced: u64,
}

impl PlaylistCursor {
    pub fn new(low_latency: bool, twitch: bool) -> Self {
        Self {
            low_latency,
            high_water: None,
            ad_tracker: twitch.then(TwitchAdTracker::new),
            announced: 0,
        }
    }

    /// Highest sequence number announced so far.
    pub fn high_water(&self) -> Option<u64> {
        self.high_water
    }

    pub fn announced(&self) -> u64 {
        self.announced
    }

    pub fn process(
        &mut self,
        playlist: &MediaPlaylist,
        base_url: &Url,
    ) -> Vec<SegmentAnnouncement> {
        let ad_flags = match self.ad_tracker.as_mut() {
            Some(tracker) => tracker.classify(playlist),
            None => vec![false; playlist.segments.len()],
        };

        let mut announcements = Vec::new();
        for (index, segment) in playlist.segments.iter().enumerate() {
            let sequence = playlist.media_sequence + index as u64;
            let is_prefetch = segment.title.as_deref() == Some(PREFETCH_SEGMENT_TITLE);

            // prefetch entries trail the playlist; wait until they are finalized
            if is_prefetch && !self.low_latency {
                break;
            }
            if self.high_water.is_some_and(|hw| sequence <= hw) {
                continue;
            }
            if segment.uri.is_empty() {
                debug!(sequence, "Skipping segment without URI");
                continue;
            }

            let uri = match base_url.join(&segment.uri) {
                Ok(uri) => uri.to_string(),
                Err(e) => {
                    warn!(sequence, uri = %segment.uri, "Invalid segment URI: {}", e);
                    continue;
                }
            };

            self.high_water = Some(sequence);
            self.announced += 1;
            announcements.push(SegmentAnnouncement {
                sequence,
                uri,
                duration: segment.duration,
                is_ad: ad_flags.get(index).copied().unwrap_or(false),
                is_prefetch,
            });
        }

        announcements
    }
}

/// [`ManifestReader`] over HTTP live streaming playlists.
#[derive(Clone)]
pub struct HlsManifestReader {
    client: Client,
    config: PlaylistConfig,
}

enum Refresh {
    Updated(MediaPlaylist, String),
    Unchanged,
    Finished(FinishReason),
}

impl HlsManifestReader {
    pub fn new(client: Client, config: PlaylistConfig) -> Self {
        Self { client, config }
    }

    async fn fetch_text(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<String, DownloadError> {
        let request = self
            .client
            .get(url.clone())
            .timeout(self.config.fetch_timeout)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(status, url.path(), "playlist fetch"));
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            body = response.text() => body?,
        };

        if is_twitch_playlist(url.as_str()) {
            Ok(preprocess_twitch_playlist(&body))
        } else {
            Ok(body)
        }
    }

    async fn fetch_media(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(MediaPlaylist, String), DownloadError> {
        let body = self.fetch_text(url, cancel).await?;
        match parse(&body)? {
            Playlist::MediaPlaylist(pl) => Ok((pl, body)),
            Playlist::MasterPlaylist(_) => Err(DownloadError::playlist(format!(
                "expected a media playlist at {}",
                url.path()
            ))),
        }
    }

    async fn refresh(
        &self,
        url: &Url,
        last_body: &str,
        tx: &mpsc::Sender<ReaderEvent>,
        cancel: &CancellationToken,
    ) -> Refresh {
        let mut failures = 0u32;
        loop {
            match self.fetch_media(url, cancel).await {
                Ok((_, body)) if body == last_body => return Refresh::Unchanged,
                Ok((playlist, body)) => return Refresh::Updated(playlist, body),
                Err(DownloadError::Cancelled) => return Refresh::Finished(FinishReason::Cancelled),
                Err(e) => {
                    failures += 1;
                    warn!("Error refreshing playlist {}: {}", url.path(), e);

                    if failures > self.config.max_refresh_retries {
                        if e.is_gone() {
                            info!("Playlist {} is gone, stream ended", url.path());
                        } else {
                            let _ = tx.send(ReaderEvent::Error(e)).await;
                        }
                        return Refresh::Finished(FinishReason::PlaylistUnavailable);
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => return Refresh::Finished(FinishReason::Cancelled),
                        _ = tokio::time::sleep(self.config.refresh_retry_delay * failures) => {}
                    }
                }
            }
        }
    }

    async fn monitor(
        self,
        url: Url,
        mut playlist: MediaPlaylist,
        mut last_body: String,
        quality: String,
        tx: mpsc::Sender<ReaderEvent>,
        cancel: CancellationToken,
    ) {
        let mut cursor = PlaylistCursor::new(
            self.config.low_latency,
            is_twitch_playlist(url.as_str()),
        );

        if tx.send(ReaderEvent::Quality(quality)).await.is_err() {
            return;
        }

        let reason = 'monitor: loop {
            for announcement in cursor.process(&playlist, &url) {
                if tx.send(ReaderEvent::Segment(announcement)).await.is_err() {
                    debug!("Reader receiver dropped, stopping {}", url.path());
                    return;
                }
            }

            if playlist.end_list {
                info!("ENDLIST for {}. Stopping monitoring.", url.path());
                break FinishReason::EndList;
            }

            let refresh_delay = Duration::from_secs_f64(playlist.target_duration as f64 * 0.5)
                .max(self.config.min_refresh_interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'monitor FinishReason::Cancelled,
                    _ = tokio::time::sleep(refresh_delay) => {}
                }

                match self.refresh(&url, &last_body, &tx, &cancel).await {
                    Refresh::Updated(new_playlist, body) => {
                        playlist = new_playlist;
                        last_body = body;
                        break;
                    }
                    Refresh::Unchanged => continue,
                    Refresh::Finished(reason) => break 'monitor reason,
                }
            }
        };

        let summary = ReaderSummary {
            segments: cursor.announced(),
            reason,
        };
        debug!(?summary, "Playlist monitoring finished for {}", url.path());
        let _ = tx.send(ReaderEvent::Finish(summary)).await;
    }
}

#[async_trait]
impl ManifestReader for HlsManifestReader {
    async fn open(
        &self,
        url: &str,
        quality: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ReaderEvent>, DownloadError> {
        let initial_url =
            Url::parse(url).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;
        let body = self.fetch_text(&initial_url, &cancel).await?;

        let (media_url, playlist, body, selected) = match parse(&body)? {
            Playlist::MediaPlaylist(pl) => (initial_url, pl, body, quality.to_string()),
            Playlist::MasterPlaylist(master) => {
                let variant = select_variant(&master, quality).ok_or_else(|| {
                    DownloadError::playlist(format!("no variant matches quality `{quality}`"))
                })?;
                let label = variant_label(variant);
                let media_url = initial_url
                    .join(&variant.uri)
                    .map_err(|e| DownloadError::invalid_url(&variant.uri, e.to_string()))?;
                let (pl, body) = self.fetch_media(&media_url, &cancel).await?;
                (media_url, pl, body, label)
            }
        };

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(self.clone().monitor(media_url, playlist, body, selected, tx, cancel));
        Ok(rx)
    }
}

fn parse(body: &str) -> Result<Playlist, DownloadError> {
    m3u8_rs::parse_playlist_res(body.as_bytes())
        .map_err(|e| DownloadError::playlist(format!("failed to parse playlist: {e}")))
}

/// Variant for `quality`: the highest bandwidth for `best`/`source`, otherwise
/// the first whose `VIDEO` group or height contains the value.
fn select_variant<'a>(master: &'a MasterPlaylist, quality: &str) -> Option<&'a VariantStream> {
    let mut candidates = master.variants.iter().filter(|v| !v.is_i_frame);

    match quality {
        "" | "best" | "source" => candidates.max_by_key(|v| v.bandwidth),
        _ => candidates.find(|v| variant_label(v).contains(quality)),
    }
}

fn variant_label(variant: &VariantStream) -> String {
    variant
        .video
        .clone()
        .or_else(|| variant.resolution.map(|r| format!("{}p", r.height)))
        .unwrap_or_else(|| format!("{}k", variant.bandwidth / 1000))
}
