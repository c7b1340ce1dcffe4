use chrono::{DateTime, Utc};
use serde::Deserialize;

/// The monitored channel. Lives for the whole process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Lower-cased login name.
    pub name: String,
    /// Numeric id, looked up lazily.
    pub id: Option<u64>,
    pub live: bool,
    pub last_vod_id: Option<u64>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            id: None,
            live: false,
            last_vod_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    Live,
    Vod(u64),
}

/// Signed playback token. Valid for a single manifest request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub signature: String,
    pub scope: TokenScope,
}

/// One selectable variant of a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    /// `VIDEO` group id, e.g. `chunked`, `720p60`, `audio_only`.
    pub tag: String,
    /// Human readable name from the matching `EXT-X-MEDIA` entry.
    pub name: Option<String>,
    pub bandwidth: u64,
    pub resolution: Option<(u64, u64)>,
    pub frame_rate: Option<f64>,
    pub codecs: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VodInfo {
    pub id: u64,
    pub published_at: Option<DateTime<Utc>>,
}

// GraphQL payloads

#[derive(Debug, Deserialize)]
pub(crate) struct GqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GqlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserIdData {
    pub user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserId {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenPayload {
    pub value: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamTokenData {
    #[serde(rename = "streamPlaybackAccessToken")]
    pub stream_playback_access_token: Option<TokenPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoTokenData {
    #[serde(rename = "videoPlaybackAccessToken")]
    pub video_playback_access_token: Option<TokenPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserVideosData {
    pub user: Option<UserVideos>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserVideos {
    pub videos: Option<VideoConnection>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoConnection {
    #[serde(default)]
    pub edges: Vec<VideoEdge>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoEdge {
    pub node: VideoNode,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoNode {
    pub id: String,
    #[serde(rename = "publishedAt")]
    pub published_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_lowercased() {
        let channel = Channel::new("SomeStreamer");
        assert_eq!(channel.name, "somestreamer");
        assert!(!channel.live);
    }

    #[test]
    fn parses_latest_video_response() {
        let body = r#"{"data":{"user":{"videos":{"edges":[{"node":{"id":"2001234567","publishedAt":"2024-03-09T21:05:09Z"}}]}}}}"#;
        let response: GqlResponse<UserVideosData> = serde_json::from_str(body).unwrap();
        let node = &response
            .data
            .unwrap()
            .user
            .unwrap()
            .videos
            .unwrap()
            .edges[0]
            .node;
        assert_eq!(node.id, "2001234567");
        assert_eq!(
            node.published_at.unwrap().to_rfc3339(),
            "2024-03-09T21:05:09+00:00"
        );
    }

    #[test]
    fn parses_gql_errors_without_data() {
        let body = r#"{"errors":[{"message":"service timeout"}]}"#;
        let response: GqlResponse<StreamTokenData> = serde_json::from_str(body).unwrap();
        assert!(response.data.is_none());
        assert_eq!(response.errors[0].message, "service timeout");
    }
}
