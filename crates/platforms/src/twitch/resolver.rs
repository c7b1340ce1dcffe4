use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::api::TwitchApi;
use super::models::{AccessToken, Channel, Rendition};
use super::playlist::parse_master_playlist;
use super::quality::{quality_label, select_rendition};
use crate::error::PlatformError;

/// Why no stream could be resolved. None of these is fatal to monitoring.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No stream of '{quality}' quality found")]
    QualityNotFound {
        quality: String,
        available: Vec<String>,
    },
    #[error("No VOD found")]
    NoVod,
    #[error("Subscription required")]
    SubscriptionRequired,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverOptions {
    /// Request the low-latency (`fast_bread`) playlist.
    pub low_latency: bool,
    /// Resolve the latest archived broadcast instead of the live stream.
    pub vod: bool,
}

/// A resolved media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTarget {
    pub url: String,
    /// Tag of the selected rendition.
    pub tag: String,
    /// Publish date when the target is a VOD.
    pub date: Option<DateTime<Utc>>,
    pub vod_id: Option<u64>,
}

/// Resolves channel liveness and playable manifests.
///
/// Every manifest fetch requests its own token. Remote failures are logged
/// and degrade to "nothing found"; they are never returned as hard errors.
pub struct ChannelResolver {
    api: Arc<dyn TwitchApi>,
    channel: Channel,
    options: ResolverOptions,
}

impl ChannelResolver {
    pub fn new(api: Arc<dyn TwitchApi>, channel: &str, options: ResolverOptions) -> Self {
        Self {
            api,
            channel: Channel::new(channel),
            options,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Numeric channel id, looked up once and cached.
    pub async fn channel_id(&mut self) -> Option<u64> {
        if let Some(id) = self.channel.id {
            return Some(id);
        }

        match self.api.channel_id(&self.channel.name).await {
            Ok(id) => {
                debug!(channel = %self.channel.name, id, "Resolved channel id");
                self.channel.id = Some(id);
                Some(id)
            }
            Err(e) => {
                error!(channel = %self.channel.name, error = %e, "Failed to look up channel id");
                None
            }
        }
    }

    /// Whether the live master playlist currently lists any rendition.
    pub async fn is_live(&mut self) -> bool {
        let live = !self.live_renditions().await.is_empty();
        self.channel.live = live;
        live
    }

    /// Resolve the media playlist for `quality`.
    ///
    /// Callers must not start a recording when this returns an error.
    pub async fn get_stream(&mut self, quality: &str) -> Result<StreamTarget, ResolveError> {
        if self.options.vod {
            return self.get_vod_stream(quality).await;
        }

        let renditions = self.live_renditions().await;
        self.channel.live = !renditions.is_empty();
        let rendition = Self::select(&renditions, quality)?;

        Ok(StreamTarget {
            url: rendition.uri.clone(),
            tag: rendition.tag.clone(),
            date: None,
            vod_id: None,
        })
    }

    async fn get_vod_stream(&mut self, quality: &str) -> Result<StreamTarget, ResolveError> {
        let vod = match self.api.latest_vod(&self.channel.name).await {
            Ok(Some(vod)) => vod,
            Ok(None) => return Err(ResolveError::NoVod),
            Err(e) => {
                error!(channel = %self.channel.name, error = %e, "Failed to look up latest VOD");
                return Err(ResolveError::NoVod);
            }
        };
        self.channel.last_vod_id = Some(vod.id);

        let renditions = match self.api.vod_token(vod.id).await {
            Ok(token) => match self.fetch_renditions(&token).await {
                Ok(renditions) => renditions,
                Err(PlatformError::Forbidden(_)) => return Err(ResolveError::SubscriptionRequired),
                Err(e) => {
                    error!(vod = vod.id, error = %e, "Failed to load VOD playlist");
                    Vec::new()
                }
            },
            Err(e) => {
                error!(vod = vod.id, error = %e, "Failed to fetch VOD access token");
                Vec::new()
            }
        };

        let rendition = Self::select(&renditions, quality)?;
        Ok(StreamTarget {
            url: rendition.uri.clone(),
            tag: rendition.tag.clone(),
            date: vod.published_at,
            vod_id: Some(vod.id),
        })
    }

    async fn live_renditions(&self) -> Vec<Rendition> {
        let token = match self.api.stream_token(&self.channel.name).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    channel = %self.channel.name,
                    error = %e,
                    "Failed to fetch stream access token"
                );
                return Vec::new();
            }
        };

        match self.fetch_renditions(&token).await {
            Ok(renditions) => renditions,
            Err(e) => {
                // offline channels answer with an error status
                warn!(channel = %self.channel.name, error = %e, "Failed to load master playlist");
                Vec::new()
            }
        }
    }

    async fn fetch_renditions(&self, token: &AccessToken) -> Result<Vec<Rendition>, PlatformError> {
        let body = self
            .api
            .master_playlist(&self.channel.name, token, self.options.low_latency)
            .await?;
        parse_master_playlist(&body)
    }

    fn select<'a>(
        renditions: &'a [Rendition],
        quality: &str,
    ) -> Result<&'a Rendition, ResolveError> {
        match select_rendition(renditions, quality) {
            Some(rendition) => {
                debug!("Selected stream quality: {}", quality_label(&rendition.tag));
                Ok(rendition)
            }
            None => Err(ResolveError::QualityNotFound {
                quality: quality.to_string(),
                available: renditions.iter().map(|r| r.tag.clone()).collect(),
            }),
        }
    }
}
