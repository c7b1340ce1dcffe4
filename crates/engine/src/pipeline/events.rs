use std::path::PathBuf;

use crate::error::DownloadError;
use crate::hls::ReaderSummary;

/// Stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Reader,
    Download { sequence: u64 },
    Append { sequence: u64 },
}

/// Totals of a finished pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSummary {
    pub appended: u64,
    /// Segments dropped after a download or append failure.
    pub failed: u64,
    pub skipped_ads: u64,
    /// Bytes written to the output file.
    pub bytes: u64,
    /// Output file, if any segment reached it.
    pub output: Option<PathBuf>,
    pub reader: Option<ReaderSummary>,
}

/// Progress of one recording.
///
/// `Started` is sent at most once, when the first segment is admitted.
/// `Finished` is sent exactly once, after parsing has completed and both
/// stages have drained. Nothing follows it.
#[derive(Debug)]
pub enum PipelineEvent {
    Started,
    Quality(String),
    OutputOpened(PathBuf),
    Error {
        source: ErrorSource,
        error: DownloadError,
        /// Whether recording had started when the error occurred.
        active: bool,
    },
    Finished(PipelineSummary),
}
