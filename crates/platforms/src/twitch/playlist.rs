use m3u8_rs::{MasterPlaylist, Playlist};

use super::models::Rendition;
use crate::error::PlatformError;

/// Parse a master playlist body into its renditions.
///
/// An empty body yields no renditions. A media playlist also yields none,
/// since it cannot be selected by quality. Variant URIs are kept as listed;
/// usher always answers with absolute URLs.
pub fn parse_master_playlist(body: &str) -> Result<Vec<Rendition>, PlatformError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let playlist = m3u8_rs::parse_playlist_res(body.as_bytes())
        .map_err(|e| PlatformError::PlaylistError(e.to_string()))?;

    match playlist {
        Playlist::MasterPlaylist(pl) => Ok(process_master_playlist(pl)),
        Playlist::MediaPlaylist(_) => Ok(Vec::new()),
    }
}

fn process_master_playlist(playlist: MasterPlaylist) -> Vec<Rendition> {
    let alternatives = playlist.alternatives;

    playlist
        .variants
        .into_iter()
        .filter(|variant| !variant.is_i_frame)
        .map(|variant| {
            let tag = variant.video.unwrap_or_default();
            let name = alternatives
                .iter()
                .find(|media| media.group_id == tag)
                .map(|media| media.name.clone());

            Rendition {
                tag,
                name,
                bandwidth: variant.bandwidth,
                resolution: variant.resolution.map(|r| (r.width, r.height)),
                frame_rate: variant.frame_rate,
                codecs: variant.codecs,
                uri: variant.uri,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) const SAMPLE_MASTER: &str = r#"#EXTM3U
#EXT-X-TWITCH-INFO:NODE="video-edge-c2a1b4.pdx01",MANIFEST-NODE-TYPE="weaver_cluster",SERVER-TIME="1710018309.00"
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="chunked",NAME="1080p60 (source)",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:BANDWIDTH=8534030,RESOLUTION=1920x1080,CODECS="avc1.64002A,mp4a.40.2",VIDEO="chunked",FRAME-RATE=60.000
https://video-weaver.pdx01.hls.ttvnw.net/v1/playlist/chunked.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="720p60",NAME="720p60",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:BANDWIDTH=3422999,RESOLUTION=1280x720,CODECS="avc1.4D401F,mp4a.40.2",VIDEO="720p60",FRAME-RATE=60.000
https://video-weaver.pdx01.hls.ttvnw.net/v1/playlist/720p60.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="480p30",NAME="480p",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:BANDWIDTH=1427999,RESOLUTION=852x480,CODECS="avc1.4D401F,mp4a.40.2",VIDEO="480p30",FRAME-RATE=30.000
https://video-weaver.pdx01.hls.ttvnw.net/v1/playlist/480p30.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="audio_only",NAME="audio_only",AUTOSELECT=NO,DEFAULT=NO
#EXT-X-STREAM-INF:BANDWIDTH=160000,CODECS="mp4a.40.2",VIDEO="audio_only"
https://video-weaver.pdx01.hls.ttvnw.net/v1/playlist/audio_only.m3u8
"#;
