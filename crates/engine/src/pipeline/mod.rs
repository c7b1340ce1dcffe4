// Segment pipeline: reader events -> download stage -> append stage -> output file.
//
// Each stage is a single task draining an unbounded FIFO, so both stages
// preserve enqueue order while running concurrently with each other. The
// coordinator owns all counters and the completion barrier.

mod appender;
mod events;
mod fetcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline_common::{CompletionBarrier, DEFAULT_FILE_STEM};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub use appender::{AppendOutcome, SegmentAppender};
pub use events::{ErrorSource, PipelineEvent, PipelineSummary};
pub use fetcher::{HttpSegmentFetcher, SegmentDownloader};

use crate::config::PipelineConfig;
use crate::error::DownloadError;
use crate::hls::{ReaderEvent, SegmentAnnouncement};

/// Subdirectory of the output directory holding transient segment files.
pub const SEGMENTS_DIR: &str = "segments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    ParseComplete,
    DownloadIdle,
    AppendIdle,
}

struct AppendJob {
    sequence: u64,
    path: PathBuf,
}

enum WorkerEvent {
    Downloaded(AppendJob),
    DownloadFailed { sequence: u64, error: DownloadError },
    Appended { sequence: u64, outcome: AppendOutcome },
    AppendFailed { sequence: u64, error: DownloadError },
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    pub events: mpsc::Receiver<PipelineEvent>,
    task: JoinHandle<PipelineSummary>,
}

impl PipelineHandle {
    /// Wait for the coordinator to exit. Resolves after `Finished` was sent.
    pub async fn join(self) -> Option<PipelineSummary> {
        self.task.await.ok()
    }

    /// Drop in-flight work. No `Finished` event follows.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Download/append pipeline for one recording.
pub struct Pipeline {
    downloader: Arc<dyn SegmentDownloader>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(downloader: Arc<dyn SegmentDownloader>, config: PipelineConfig) -> Self {
        Self { downloader, config }
    }

    /// Consume `reader` and record into `output_path` (or the next free
    /// `" (part N)"` path next to it).
    ///
    /// Creates the output and segment directories first; failing to do so
    /// aborts the attempt before anything is spawned.
    pub async fn start(
        self,
        reader: mpsc::Receiver<ReaderEvent>,
        output_path: PathBuf,
    ) -> Result<PipelineHandle, DownloadError> {
        let output_dir = output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let segments_dir = output_dir.join(SEGMENTS_DIR);
        tokio::fs::create_dir_all(&segments_dir).await?;

        let base_name = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_FILE_STEM.to_string());

        let (events_tx, events_rx) = mpsc::channel(64);
        let coordinator = Coordinator {
            downloader: self.downloader,
            config: self.config,
            segments_dir,
            base_name,
            output_path,
            events: events_tx,
        };
        let task = tokio::spawn(coordinator.run(reader));

        Ok(PipelineHandle {
            events: events_rx,
            task,
        })
    }
}

struct Coordinator {
    downloader: Arc<dyn SegmentDownloader>,
    config: PipelineConfig,
    segments_dir: PathBuf,
    base_name: String,
    output_path: PathBuf,
    events: mpsc::Sender<PipelineEvent>,
}

impl Coordinator {
    async fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).await.is_err() {
            trace!("Pipeline event receiver dropped");
        }
    }

    async fn run(self, mut reader: mpsc::Receiver<ReaderEvent>) -> PipelineSummary {
        let (download_tx, download_rx) = mpsc::unbounded_channel::<SegmentAnnouncement>();
        let (append_tx, append_rx) = mpsc::unbounded_channel::<AppendJob>();
        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let download_task = tokio::spawn(download_worker(
            Arc::clone(&self.downloader),
            self.segments_dir.clone(),
            self.base_name.clone(),
            self.config.keep_segments,
            download_rx,
            worker_tx.clone(),
        ));
        let append_task = tokio::spawn(append_worker(
            SegmentAppender::new(self.output_path.clone(), self.config.keep_segments),
            append_rx,
            worker_tx,
        ));

        let mut barrier = CompletionBarrier::new([
            (Completion::ParseComplete, false),
            (Completion::DownloadIdle, true),
            (Completion::AppendIdle, true),
        ]);
        let mut summary = PipelineSummary::default();
        let mut pending_downloads: usize = 0;
        let mut pending_appends: usize = 0;
        let mut started = false;
        let mut parsing = true;

        loop {
            let fired = tokio::select! {
                event = reader.recv(), if parsing => match event {
                    Some(ReaderEvent::Quality(quality)) => {
                        debug!("Recording quality {}", quality);
                        self.emit(PipelineEvent::Quality(quality)).await;
                        false
                    }
                    Some(ReaderEvent::Segment(segment)) => {
                        if segment.is_ad && !self.config.keep_ads {
                            debug!(sequence = segment.sequence, "Skipping ad segment");
                            summary.skipped_ads += 1;
                            continue;
                        }
                        if !started {
                            started = true;
                            self.emit(PipelineEvent::Started).await;
                        }
                        pending_downloads += 1;
                        barrier.set(Completion::DownloadIdle, false);
                        if download_tx.send(segment).is_err() {
                            warn!("Download stage stopped unexpectedly");
                        }
                        false
                    }
                    Some(ReaderEvent::Error(error)) => {
                        self.emit(PipelineEvent::Error {
                            source: ErrorSource::Reader,
                            error,
                            active: started,
                        })
                        .await;
                        false
                    }
                    Some(ReaderEvent::Finish(reader_summary)) => {
                        debug!(?reader_summary, "Manifest parsing complete");
                        summary.reader = Some(reader_summary);
                        parsing = false;
                        barrier.set(Completion::ParseComplete, true)
                    }
                    None => {
                        debug!("Manifest reader closed without a finish event");
                        parsing = false;
                        barrier.set(Completion::ParseComplete, true)
                    }
                },

                Some(worker_event) = worker_rx.recv() => match worker_event {
                    WorkerEvent::Downloaded(job) => {
                        // the append is queued before the download stage may report idle
                        pending_appends += 1;
                        barrier.set(Completion::AppendIdle, false);
                        if append_tx.send(job).is_err() {
                            warn!("Append stage stopped unexpectedly");
                        }
                        pending_downloads -= 1;
                        barrier.set(Completion::DownloadIdle, pending_downloads == 0)
                    }
                    WorkerEvent::DownloadFailed { sequence, error } => {
                        warn!(sequence, "Segment download failed: {}", error);
                        summary.failed += 1;
                        self.emit(PipelineEvent::Error {
                            source: ErrorSource::Download { sequence },
                            error,
                            active: started,
                        })
                        .await;
                        pending_downloads -= 1;
                        barrier.set(Completion::DownloadIdle, pending_downloads == 0)
                    }
                    WorkerEvent::Appended { sequence, outcome } => {
                        if let Some(path) = outcome.opened {
                            summary.output = Some(path.clone());
                            self.emit(PipelineEvent::OutputOpened(path)).await;
                        }
                        debug!(sequence, bytes = outcome.bytes, "Segment appended");
                        summary.appended += 1;
                        summary.bytes += outcome.bytes;
                        pending_appends -= 1;
                        barrier.set(Completion::AppendIdle, pending_appends == 0)
                    }
                    WorkerEvent::AppendFailed { sequence, error } => {
                        warn!(sequence, "Segment append failed: {}", error);
                        summary.failed += 1;
                        self.emit(PipelineEvent::Error {
                            source: ErrorSource::Append { sequence },
                            error,
                            active: started,
                        })
                        .await;
                        pending_appends -= 1;
                        barrier.set(Completion::AppendIdle, pending_appends == 0)
                    }
                },
            };

            if fired {
                break;
            }
        }

        drop(download_tx);
        drop(append_tx);
        let _ = download_task.await;
        let _ = append_task.await;

        info!(
            appended = summary.appended,
            failed = summary.failed,
            skipped_ads = summary.skipped_ads,
            bytes = summary.bytes,
            "Pipeline finished"
        );
        self.emit(PipelineEvent::Finished(summary.clone())).await;
        summary
    }
}

async fn download_worker(
    downloader: Arc<dyn SegmentDownloader>,
    segments_dir: PathBuf,
    base_name: String,
    keep_segments: bool,
    mut jobs: mpsc::UnboundedReceiver<SegmentAnnouncement>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    while let Some(segment) = jobs.recv().await {
        let path = segments_dir.join(format!("{base_name}_{}.ts", segment.sequence));
        let event = match downloader.download(&segment, &path).await {
            Ok(_) => WorkerEvent::Downloaded(AppendJob {
                sequence: segment.sequence,
                path,
            }),
            Err(error) => {
                if !keep_segments && tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    let _ = tokio::fs::remove_file(&path).await;
                }
                WorkerEvent::DownloadFailed {
                    sequence: segment.sequence,
                    error,
                }
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

async fn append_worker(
    mut appender: SegmentAppender,
    mut jobs: mpsc::UnboundedReceiver<AppendJob>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    while let Some(job) = jobs.recv().await {
        let event = match appender.append(&job.path).await {
            Ok(outcome) => WorkerEvent::Appended {
                sequence: job.sequence,
                outcome,
            },
            Err(error) => WorkerEvent::AppendFailed {
                sequence: job.sequence,
                error,
            },
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::hls::{FinishReason, ReaderSummary};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    #[derive(Default)]
    struct FakeDownloader {
        delays: HashMap<u64, Duration>,
        failing: HashSet<u64>,
    }

    #[async_trait]
    impl SegmentDownloader for FakeDownloader {
        async fn download(
            &self,
            segment: &SegmentAnnouncement,
            destination: &Path,
        ) -> Result<u64, DownloadError> {
            if let Some(delay) = self.delays.get(&segment.sequence) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(&segment.sequence) {
                tokio::fs::write(destination, b"partial").await?;
                return Err(DownloadError::segment_fetch("connection reset", false));
            }
            let body = format!("seg{};", segment.sequence);
            tokio::fs::write(destination, body.as_bytes()).await?;
            Ok(body.len() as u64)
        }
    }

    fn segment(sequence: u64, is_ad: bool) -> ReaderEvent {
        ReaderEvent::Segment(SegmentAnnouncement {
            sequence,
            uri: format!("https://example.com/{sequence}.ts"),
            duration: 2.0,
            is_ad,
            is_prefetch: false,
        })
    }

    fn finish(segments: u64) -> ReaderEvent {
        ReaderEvent::Finish(ReaderSummary {
            segments,
            reason: FinishReason::EndList,
        })
    }

    async fn run_pipeline(
        downloader: FakeDownloader,
        config: PipelineConfig,
        output: PathBuf,
        input: Vec<ReaderEvent>,
    ) -> Vec<PipelineEvent> {
        init_tracing();
        let (tx, rx) = mpsc::channel(64);
        for event in input {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let mut handle = Pipeline::new(Arc::new(downloader), config)
            .start(rx, output)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) =
            tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
                .await
                .unwrap()
        {
            events.push(event);
        }
        assert!(handle.join().await.is_some());
        events
    }

    fn summary_of(events: &[PipelineEvent]) -> PipelineSummary {
        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Finished(summary) => Some(summary.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 1, "Finished must be sent exactly once");
        assert!(matches!(events.last(), Some(PipelineEvent::Finished(_))));
        finished[0].clone()
    }

    #[tokio::test]
    async fn appends_segments_in_announcement_order() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("rec.ts");
        let downloader = FakeDownloader {
            delays: HashMap::from([
                (1, Duration::from_millis(40)),
                (2, Duration::from_millis(5)),
                (3, Duration::from_millis(20)),
            ]),
            ..Default::default()
        };

        let events = run_pipeline(
            downloader,
            PipelineConfig::default(),
            output.clone(),
            vec![
                ReaderEvent::Quality("720p60".to_string()),
                segment(1, false),
                segment(2, false),
                segment(3, false),
                finish(3),
            ],
        )
        .await;

        assert!(matches!(&events[0], PipelineEvent::Quality(q) if q == "720p60"));
        assert!(matches!(events[1], PipelineEvent::Started));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, PipelineEvent::OutputOpened(p) if p == &output))
        );

        let summary = summary_of(&events);
        assert_eq!(summary.appended, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.bytes, 15);
        assert_eq!(summary.output.as_deref(), Some(output.as_path()));
        assert_eq!(
            summary.reader.map(|r| r.reason),
            Some(FinishReason::EndList)
        );

        assert_eq!(
            tokio::fs::read_to_string(&output).await.unwrap(),
            "seg1;seg2;seg3;"
        );
        let mut leftovers = tokio::fs::read_dir(dir.path().join(SEGMENTS_DIR))
            .await
            .unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skips_ads_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let input = || vec![segment(1, false), segment(2, true), segment(3, false), finish(3)];

        let skipped = dir.path().join("skipped.ts");
        let events = run_pipeline(
            FakeDownloader::default(),
            PipelineConfig::default(),
            skipped.clone(),
            input(),
        )
        .await;
        let summary = summary_of(&events);
        assert_eq!(summary.skipped_ads, 1);
        assert_eq!(summary.appended, 2);
        assert_eq!(
            tokio::fs::read_to_string(&skipped).await.unwrap(),
            "seg1;seg3;"
        );

        let kept = dir.path().join("kept.ts");
        let config = PipelineConfig {
            keep_ads: true,
            ..Default::default()
        };
        let events = run_pipeline(FakeDownloader::default(), config, kept.clone(), input()).await;
        assert_eq!(summary_of(&events).skipped_ads, 0);
        assert_eq!(
            tokio::fs::read_to_string(&kept).await.unwrap(),
            "seg1;seg2;seg3;"
        );
    }

    #[tokio::test]
    async fn waits_for_both_stages_after_parsing_completes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("rec.ts");
        let downloader = FakeDownloader {
            delays: (1..=4).map(|s| (s, Duration::from_millis(30))).collect(),
            ..Default::default()
        };

        // finish arrives long before any download completes
        let events = run_pipeline(
            downloader,
            PipelineConfig::default(),
            output.clone(),
            vec![
                segment(1, false),
                segment(2, false),
                segment(3, false),
                segment(4, false),
                finish(4),
            ],
        )
        .await;

        assert_eq!(summary_of(&events).appended, 4);
        assert_eq!(
            tokio::fs::read_to_string(&output).await.unwrap(),
            "seg1;seg2;seg3;seg4;"
        );
    }

    #[tokio::test]
    async fn empty_session_finishes_without_starting() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("rec.ts");

        let events = run_pipeline(
            FakeDownloader::default(),
            PipelineConfig::default(),
            output.clone(),
            vec![ReaderEvent::Quality("best".to_string()), finish(0)],
        )
        .await;

        assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Started)));
        let summary = summary_of(&events);
        assert_eq!(summary.appended, 0);
        assert_eq!(summary.output, None);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn closed_reader_counts_as_parse_complete() {
        let dir = tempfile::tempdir().unwrap();
        let events = run_pipeline(
            FakeDownloader::default(),
            PipelineConfig::default(),
            dir.path().join("rec.ts"),
            vec![segment(1, false)],
        )
        .await;

        let summary = summary_of(&events);
        assert_eq!(summary.appended, 1);
        assert_eq!(summary.reader, None);
    }

    #[tokio::test]
    async fn failed_download_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("rec.ts");
        let downloader = FakeDownloader {
            failing: HashSet::from([2]),
            ..Default::default()
        };

        let events = run_pipeline(
            downloader,
            PipelineConfig::default(),
            output.clone(),
            vec![segment(1, false), segment(2, false), segment(3, false), finish(3)],
        )
        .await;

        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Error { source, active, .. } => Some((*source, *active)),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![(ErrorSource::Download { sequence: 2 }, true)]);

        let summary = summary_of(&events);
        assert_eq!(summary.appended, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            tokio::fs::read_to_string(&output).await.unwrap(),
            "seg1;seg3;"
        );
        assert!(!dir.path().join(SEGMENTS_DIR).join("rec_2.ts").exists());
    }

    #[tokio::test]
    async fn reader_error_before_start_is_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let events = run_pipeline(
            FakeDownloader::default(),
            PipelineConfig::default(),
            dir.path().join("rec.ts"),
            vec![
                ReaderEvent::Error(DownloadError::playlist("bad manifest")),
                finish(0),
            ],
        )
        .await;

        assert!(matches!(
            events[0],
            PipelineEvent::Error {
                source: ErrorSource::Reader,
                active: false,
                ..
            }
        ));
        summary_of(&events);
    }

    #[tokio::test]
    async fn keeps_segments_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            keep_segments: true,
            ..Default::default()
        };
        run_pipeline(
            FakeDownloader::default(),
            config,
            dir.path().join("rec.ts"),
            vec![segment(7, false), finish(1)],
        )
        .await;

        let kept = dir.path().join(SEGMENTS_DIR).join("rec_7.ts");
        assert_eq!(tokio::fs::read_to_string(&kept).await.unwrap(), "seg7;");
    }

    #[tokio::test]
    async fn start_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"").await.unwrap();

        let (_tx, rx) = mpsc::channel(1);
        let result = Pipeline::new(
            Arc::new(FakeDownloader::default()),
            PipelineConfig::default(),
        )
        .start(rx, blocker.join("rec.ts"))
        .await;

        assert!(matches!(result, Err(DownloadError::Io { .. })));
    }
}
