use std::time::Duration;

use crate::retry::RetryPolicy;

/// Playlist monitoring settings
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// Announce `#EXT-X-TWITCH-PREFETCH` segments before they are finalized
    pub low_latency: bool,
    /// Timeout of each playlist request
    pub fetch_timeout: Duration,
    /// Lower bound of the refresh interval (target duration / 2 otherwise)
    pub min_refresh_interval: Duration,
    /// Consecutive refresh failures tolerated before the playlist is given up
    pub max_refresh_retries: u32,
    /// Delay after a failed refresh, multiplied by the failure count
    pub refresh_retry_delay: Duration,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            low_latency: false,
            fetch_timeout: Duration::from_secs(10),
            min_refresh_interval: Duration::from_secs(1),
            max_refresh_retries: 5,
            refresh_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Segment download/append settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Download and append segments flagged as advertisements
    pub keep_ads: bool,
    /// Keep transient segment files after they are appended
    pub keep_segments: bool,
    /// Timeout of each segment request
    pub segment_timeout: Duration,
    /// In-place retries of a failed segment download
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keep_ads: false,
            keep_segments: false,
            segment_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub playlist: PlaylistConfig,
    pub pipeline: PipelineConfig,
}
