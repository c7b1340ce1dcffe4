use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use clap::Parser;
use pipeline_common::TimeFormat;
use platforms_parser::twitch::ResolverOptions;
use serde::Deserialize;
use trec_engine::{EngineConfig, RetryPolicy};

use crate::error::AppError;

/// Config files looked up in the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILES: [&str; 2] = ["config.toml", "config.json"];

#[derive(Debug, Parser)]
#[command(name = "trec", version, about = "Record Twitch live streams and VODs")]
pub struct CliArgs {
    /// Channel to monitor
    #[arg(short, long, env = "TREC_CHANNEL")]
    pub channel: Option<String>,

    /// OAuth token used for GraphQL requests
    #[arg(long, env = "TREC_AUTH", hide_env_values = true)]
    pub auth: Option<String>,

    /// Rendition to record: best, source, audio or a literal tag such as 720p60
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Request the low-latency playlist and record prefetch segments
    #[arg(long)]
    pub low_latency: bool,

    /// Record the latest VOD instead of waiting for a live stream
    #[arg(long)]
    pub vod: bool,

    /// Directory recordings are written to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Output file name template (`:channel`, `:date`, `:time`, `:period`, ...)
    #[arg(short, long)]
    pub template: Option<String>,

    /// IANA timezone used by templates and log timestamps
    #[arg(long)]
    pub tz: Option<String>,

    /// Clock format of the `:time` token: en-GB or en-US
    #[arg(long)]
    pub tz_format: Option<String>,

    /// Keep transient segment files after they are appended
    #[arg(long)]
    pub keep_segments: bool,

    /// Record advertisement segments
    #[arg(long)]
    pub keep_ads: bool,

    /// In-place retries of a failed segment download
    #[arg(long, value_name = "N")]
    pub segment_retries: Option<u32>,

    /// Seconds between liveness polls while idle, 0 disables polling
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Config file (TOML or JSON)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log directory, `:channel` is expanded
    #[arg(long, value_name = "DIR")]
    pub logs: Option<String>,

    /// Show debug output on the console
    #[arg(short, long)]
    pub debug: bool,
}

/// Effective recorder settings: defaults < config file < command line.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub channel: String,
    pub auth: Option<String>,
    pub quality: String,
    #[serde(alias = "lowLatency")]
    pub low_latency: bool,
    pub vod: bool,
    #[serde(alias = "outputDir")]
    pub output_dir: String,
    pub template: String,
    pub tz: String,
    #[serde(alias = "tzFormat")]
    pub tz_format: String,
    #[serde(alias = "keepSegments")]
    pub keep_segments: bool,
    #[serde(alias = "keepAds")]
    pub keep_ads: bool,
    pub segment_retries: u32,
    pub poll_interval: u64,
    pub logs: String,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel: "TwitchUser".to_string(),
            auth: None,
            quality: "best".to_string(),
            low_latency: false,
            vod: false,
            output_dir: "./recordings".to_string(),
            template: ":shortYear.:month.:day :period -- :channel".to_string(),
            tz: "Europe/London".to_string(),
            tz_format: "en-GB".to_string(),
            keep_segments: false,
            keep_ads: false,
            segment_retries: 0,
            poll_interval: 0,
            logs: "logs".to_string(),
            debug: false,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("channel", &self.channel)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("quality", &self.quality)
            .field("low_latency", &self.low_latency)
            .field("vod", &self.vod)
            .field("output_dir", &self.output_dir)
            .field("template", &self.template)
            .field("tz", &self.tz)
            .field("tz_format", &self.tz_format)
            .field("keep_segments", &self.keep_segments)
            .field("keep_ads", &self.keep_ads)
            .field("segment_retries", &self.segment_retries)
            .field("poll_interval", &self.poll_interval)
            .field("logs", &self.logs)
            .field("debug", &self.debug)
            .finish()
    }
}

impl AppConfig {
    /// Build the effective config, looking for default config files in the
    /// working directory.
    pub fn load(args: &CliArgs) -> Result<Self, AppError> {
        Self::load_from(args, Path::new("."))
    }

    /// Like [`AppConfig::load`], with default config files resolved against `dir`.
    pub fn load_from(args: &CliArgs, dir: &Path) -> Result<Self, AppError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => match DEFAULT_CONFIG_FILES
                .iter()
                .map(|name| dir.join(name))
                .find(|path| path.is_file())
            {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, AppError> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(contents).map_err(|e| e.to_string())
        } else {
            toml::from_str(contents).map_err(|e| e.to_string())
        };

        parsed.map_err(|reason| AppError::ConfigParse {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn apply_args(&mut self, args: &CliArgs) {
        let overrides = [
            (&args.channel, &mut self.channel),
            (&args.quality, &mut self.quality),
            (&args.output_dir, &mut self.output_dir),
            (&args.template, &mut self.template),
            (&args.tz, &mut self.tz),
            (&args.tz_format, &mut self.tz_format),
            (&args.logs, &mut self.logs),
        ];
        for (arg, field) in overrides {
            if let Some(value) = arg {
                *field = value.clone();
            }
        }

        if args.auth.is_some() {
            self.auth = args.auth.clone();
        }
        if let Some(retries) = args.segment_retries {
            self.segment_retries = retries;
        }
        if let Some(interval) = args.poll_interval {
            self.poll_interval = interval;
        }

        self.low_latency |= args.low_latency;
        self.vod |= args.vod;
        self.keep_segments |= args.keep_segments;
        self.keep_ads |= args.keep_ads;
        self.debug |= args.debug;
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.channel.trim().is_empty() {
            return Err(AppError::InvalidConfig("channel must not be empty".to_string()));
        }
        if self.quality.trim().is_empty() {
            return Err(AppError::InvalidConfig("quality must not be empty".to_string()));
        }
        self.timezone()?;
        self.tz_format
            .parse::<TimeFormat>()
            .map_err(AppError::InvalidConfig)?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, AppError> {
        self.tz
            .parse::<Tz>()
            .map_err(|_| AppError::InvalidConfig(format!("unknown timezone `{}`", self.tz)))
    }

    pub fn time_format(&self) -> TimeFormat {
        self.tz_format.parse().unwrap_or_default()
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            low_latency: self.low_latency,
            vod: self.vod,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        engine.playlist.low_latency = self.low_latency;
        engine.pipeline.keep_ads = self.keep_ads;
        engine.pipeline.keep_segments = self.keep_segments;
        engine.pipeline.retry = RetryPolicy::with_max_retries(self.segment_retries);
        engine
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval > 0).then(|| Duration::from_secs(self.poll_interval))
    }
}
