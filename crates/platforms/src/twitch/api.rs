use async_trait::async_trait;
use rand::RngExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::models::{
    AccessToken, GqlResponse, StreamTokenData, TokenPayload, TokenScope, UserIdData,
    UserVideosData, VideoTokenData, VodInfo,
};
use crate::error::PlatformError;

/// Remote calls the resolver depends on.
///
/// Every call is a single request; tokens are never cached by implementors.
#[async_trait]
pub trait TwitchApi: Send + Sync {
    /// Numeric id of `login`.
    async fn channel_id(&self, login: &str) -> Result<u64, PlatformError>;

    /// Fresh live playback token for `login`.
    async fn stream_token(&self, login: &str) -> Result<AccessToken, PlatformError>;

    /// Most recent archived broadcast of `login`, if any.
    async fn latest_vod(&self, login: &str) -> Result<Option<VodInfo>, PlatformError>;

    /// Fresh playback token for a VOD.
    async fn vod_token(&self, vod_id: u64) -> Result<AccessToken, PlatformError>;

    /// Master playlist text for the target named by `token.scope`.
    ///
    /// A 403 answer is reported as [`PlatformError::Forbidden`].
    async fn master_playlist(
        &self,
        login: &str,
        token: &AccessToken,
        low_latency: bool,
    ) -> Result<String, PlatformError>;
}

/// [`TwitchApi`] over the public GraphQL and usher endpoints.
pub struct TwitchClient {
    client: Client,
    auth_token: Option<String>,
}

impl TwitchClient {
    pub const CLIENT_ID: &str = "kimne78kx3ncx6brgo4mv6wki5h1ko";
    const GQL_API_URL: &str = "https://gql.twitch.tv/gql";
    const USHER_URL: &str = "https://usher.ttvnw.net";

    pub fn new(client: Client, auth_token: Option<String>) -> Self {
        Self {
            client,
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
        }
    }

    async fn post_gql<T: DeserializeOwned>(&self, query: String) -> Result<T, PlatformError> {
        let body = serde_json::json!({ "query": query });

        let mut request = self
            .client
            .post(Self::GQL_API_URL)
            .header("Client-ID", Self::CLIENT_ID)
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("OAuth {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::HttpStatus {
                status: status.as_u16(),
                url: Self::GQL_API_URL.to_string(),
            });
        }

        let text = response.text().await?;
        debug!("gql response: {}", text);

        let parsed: GqlResponse<T> = serde_json::from_str(&text)?;
        match parsed.data {
            Some(data) => Ok(data),
            None => {
                let message = parsed
                    .errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(PlatformError::GqlError(if message.is_empty() {
                    "response carried no data".to_string()
                } else {
                    message
                }))
            }
        }
    }
}

#[async_trait]
impl TwitchApi for TwitchClient {
    async fn channel_id(&self, login: &str) -> Result<u64, PlatformError> {
        let query = format!("query {{ user(login: {}) {{ id }} }}", gql_string(login));
        let data: UserIdData = self.post_gql(query).await?;
        let user = data
            .user
            .ok_or_else(|| PlatformError::GqlError(format!("user `{login}` not found")))?;
        parse_id(&user.id)
    }

    async fn stream_token(&self, login: &str) -> Result<AccessToken, PlatformError> {
        let query = format!(
            "query {{ streamPlaybackAccessToken(channelName: {}, params: {}) {{ value signature }} }}",
            gql_string(login),
            PLAYBACK_PARAMS
        );
        let data: StreamTokenData = self.post_gql(query).await?;
        into_token(data.stream_playback_access_token, TokenScope::Live)
    }

    async fn latest_vod(&self, login: &str) -> Result<Option<VodInfo>, PlatformError> {
        let query = format!(
            "query {{ user(login: {}) {{ videos(first: 1, type: ARCHIVE, sort: TIME) {{ edges {{ node {{ id publishedAt }} }} }} }} }}",
            gql_string(login)
        );
        let data: UserVideosData = self.post_gql(query).await?;

        let Some(node) = data
            .user
            .and_then(|u| u.videos)
            .and_then(|v| v.edges.into_iter().next())
            .map(|e| e.node)
        else {
            return Ok(None);
        };

        Ok(Some(VodInfo {
            id: parse_id(&node.id)?,
            published_at: node.published_at,
        }))
    }

    async fn vod_token(&self, vod_id: u64) -> Result<AccessToken, PlatformError> {
        let query = format!(
            "query {{ videoPlaybackAccessToken(id: \"{vod_id}\", params: {}) {{ value signature }} }}",
            PLAYBACK_PARAMS
        );
        let data: VideoTokenData = self.post_gql(query).await?;
        into_token(data.video_playback_access_token, TokenScope::Vod(vod_id))
    }

    async fn master_playlist(
        &self,
        login: &str,
        token: &AccessToken,
        low_latency: bool,
    ) -> Result<String, PlatformError> {
        let cache_buster = rand::rng().random_range(100_000u32..1_000_000u32);
        let url = usher_url(Self::USHER_URL, login, token, low_latency, cache_buster)?;
        debug!("Fetching master playlist {}", url.path());

        let response = self
            .client
            .get(url.clone())
            .header("Client-ID", Self::CLIENT_ID)
            .send()
            .await?;

        match response.status() {
            StatusCode::FORBIDDEN => Err(PlatformError::Forbidden(url.path().to_string())),
            status if !status.is_success() => Err(PlatformError::HttpStatus {
                status: status.as_u16(),
                url: url.path().to_string(),
            }),
            _ => Ok(response.text().await?),
        }
    }
}

const PLAYBACK_PARAMS: &str =
    r#"{ platform: "web", playerBackend: "mediaplayer", playerType: "site" }"#;

/// Quote `value` as a GraphQL string literal.
fn gql_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn parse_id(id: &str) -> Result<u64, PlatformError> {
    id.parse()
        .map_err(|_| PlatformError::GqlError(format!("invalid id `{id}`")))
}

fn into_token(
    payload: Option<TokenPayload>,
    scope: TokenScope,
) -> Result<AccessToken, PlatformError> {
    let payload =
        payload.ok_or_else(|| PlatformError::GqlError("no playback access token".to_string()))?;
    Ok(AccessToken {
        value: payload.value,
        signature: payload.signature,
        scope,
    })
}

/// Usher URL for the master playlist of `token.scope`.
pub fn usher_url(
    base: &str,
    login: &str,
    token: &AccessToken,
    low_latency: bool,
    cache_buster: u32,
) -> Result<Url, PlatformError> {
    let path = match token.scope {
        TokenScope::Live => format!("{base}/api/channel/hls/{login}.m3u8"),
        TokenScope::Vod(id) => format!("{base}/vod/{id}.m3u8"),
    };

    let low_latency = low_latency.to_string();
    let cache_buster = cache_buster.to_string();
    let url = Url::parse_with_params(
        &path,
        &[
            ("allow_source", "true"),
            ("allow_audio_only", "true"),
            ("fast_bread", low_latency.as_str()),
            ("player_backend", "mediaplayer"),
            ("playlist_include_framerate", "true"),
            ("reassignments_supported", "true"),
            ("supported_codecs", "vp09,avc1"),
            ("cdm", "wv"),
            ("sig", token.signature.as_str()),
            ("token", token.value.as_str()),
            ("p", cache_buster.as_str()),
            ("type", "any"),
        ],
    )?;
    Ok(url)
}
