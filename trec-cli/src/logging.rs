//! Console and file log sinks.
//!
//! The log directory receives four files:
//! - `all.log`: every event of the recorder crates, warnings from dependencies
//! - `out.log`: INFO events
//! - `dbg.log`: DEBUG and TRACE events
//! - `err.log`: WARN and ERROR events

use std::path::{Path, PathBuf};

use chrono::Utc;
use chrono_tz::Tz;
use pipeline_common::{TargetOs, render_channel_template};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::{FilterExt, Targets, filter_fn},
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;
use crate::error::AppError;

const DEFAULT_LOG_DIR: &str = "logs";

/// Crates whose events reach the log files below WARN.
const RECORDER_TARGETS: [&str; 4] = ["trec", "trec_engine", "platforms_parser", "pipeline_common"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Timestamps in the configured timezone.
#[derive(Debug, Clone, Copy)]
struct ZonedTimer(Tz);

impl FormatTime for ZonedTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Utc::now().with_timezone(&self.0);
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Log directory for `config`, with `:channel` expanded.
pub fn log_dir(config: &AppConfig) -> PathBuf {
    PathBuf::from(render_channel_template(
        &config.logs,
        &config.channel,
        TargetOs::current(),
        DEFAULT_LOG_DIR,
    ))
}

/// Console filter directive: recorder crates at INFO (DEBUG with `--debug`),
/// dependencies at WARN.
pub fn console_directive(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    let mut directive = RECORDER_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>();
    directive.push("warn".to_string());
    directive.join(",")
}

fn recorder_targets() -> Targets {
    Targets::new()
        .with_targets(RECORDER_TARGETS.iter().map(|target| (*target, Level::TRACE)))
        .with_default(Level::WARN)
}

fn file_writer(dir: &Path, name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    guards.push(guard);
    writer
}

/// Install the global subscriber.
///
/// Returns the writer guards, which must be kept alive for the process lifetime.
pub fn init_logging(config: &AppConfig) -> Result<Vec<WorkerGuard>, AppError> {
    let timer = ZonedTimer(config.timezone()?);
    let dir = log_dir(config);
    std::fs::create_dir_all(&dir)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directive(config.debug)));

    let mut guards = Vec::with_capacity(4);
    let all = file_writer(&dir, "all.log", &mut guards);
    let out = file_writer(&dir, "out.log", &mut guards);
    let dbg = file_writer(&dir, "dbg.log", &mut guards);
    let err = file_writer(&dir, "err.log", &mut guards);

    let layers: Vec<BoxedLayer> = vec![
        fmt::layer()
            .with_ansi(true)
            .with_timer(timer)
            .with_filter(console_filter)
            .boxed(),
        fmt::layer()
            .with_writer(all)
            .with_ansi(false)
            .with_timer(timer)
            .with_filter(recorder_targets())
            .boxed(),
        fmt::layer()
            .with_writer(out)
            .with_ansi(false)
            .with_timer(timer)
            .with_filter(recorder_targets().and(filter_fn(|meta| *meta.level() == Level::INFO)))
            .boxed(),
        fmt::layer()
            .with_writer(dbg)
            .with_ansi(false)
            .with_timer(timer)
            .with_filter(recorder_targets().and(filter_fn(|meta| *meta.level() >= Level::DEBUG)))
            .boxed(),
        fmt::layer()
            .with_writer(err)
            .with_ansi(false)
            .with_timer(timer)
            .with_filter(recorder_targets().and(filter_fn(|meta| *meta.level() <= Level::WARN)))
            .boxed(),
    ];

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| AppError::Logging(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guards)
}
