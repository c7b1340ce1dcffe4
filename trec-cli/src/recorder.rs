//! Channel monitor and recording orchestration.
//!
//! A single task owns the channel state machine and at most one active
//! recording. Push events, idle polls, pipeline events and the shutdown signal
//! are multiplexed in one `select!` loop, so job status is never shared.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pipeline_common::{TargetOs, TemplateContext, reserve_file, resolve_output_path};
use platforms_parser::pubsub::{PushEvent, PushListener};
use platforms_parser::twitch::{
    ChannelResolver, ChannelSignal, ChannelState, Transition, TwitchApi, TwitchClient,
    quality_label,
};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trec_engine::EngineConfig;
use trec_engine::hls::{HlsManifestReader, ManifestReader};
use trec_engine::pipeline::{
    HttpSegmentFetcher, Pipeline, PipelineEvent, PipelineHandle, PipelineSummary,
    SegmentDownloader,
};

use crate::config::AppConfig;
use crate::job::{JobStatus, RecordingJob};
use crate::panic_hook::PARTIAL_RECORDING_NOTICE;

const OUTPUT_EXTENSION: &str = "ts";

/// Why [`Recorder::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The shutdown signal fired.
    Interrupted,
    /// VOD mode: the VOD was recorded, or could not be resolved.
    VodComplete,
}

struct ActiveRecording {
    job: RecordingJob,
    pipeline: PipelineHandle,
    reader_cancel: CancellationToken,
}

pub struct Recorder {
    config: AppConfig,
    engine: EngineConfig,
    resolver: ChannelResolver,
    reader: Arc<dyn ManifestReader>,
    downloader: Arc<dyn SegmentDownloader>,
    cancel: CancellationToken,
    push: Option<mpsc::Receiver<PushEvent>>,
    recording_flag: Arc<AtomicBool>,
}

impl Recorder {
    pub fn new(
        config: AppConfig,
        api: Arc<dyn TwitchApi>,
        reader: Arc<dyn ManifestReader>,
        downloader: Arc<dyn SegmentDownloader>,
        cancel: CancellationToken,
    ) -> Self {
        let resolver = ChannelResolver::new(api, &config.channel, config.resolver_options());
        let engine = config.engine_config();
        Self {
            config,
            engine,
            resolver,
            reader,
            downloader,
            cancel,
            push: None,
            recording_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take stream edges from `events` instead of subscribing to PubSub.
    pub fn with_push_events(mut self, events: mpsc::Receiver<PushEvent>) -> Self {
        self.push = Some(events);
        self
    }

    /// Set from the first recorded segment until the recording ends.
    pub fn recording_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.recording_flag)
    }

    /// Recorder talking to Twitch over `client`.
    pub fn with_http(config: AppConfig, client: Client, cancel: CancellationToken) -> Self {
        let engine = config.engine_config();
        let api = Arc::new(TwitchClient::new(client.clone(), config.auth.clone()));
        let reader = Arc::new(HlsManifestReader::new(client.clone(), engine.playlist.clone()));
        let downloader = Arc::new(
            HttpSegmentFetcher::new(
                client,
                engine.pipeline.segment_timeout,
                engine.pipeline.retry.clone(),
            )
            .with_cancellation(cancel.clone()),
        );
        Self::new(config, api, reader, downloader, cancel)
    }

    /// Monitor the channel until `shutdown` resolves (or, in VOD mode, until
    /// the VOD is recorded).
    pub async fn run<F>(mut self, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut state = ChannelState::default();
        let mut recording: Option<ActiveRecording> = None;
        let mut push: Option<mpsc::Receiver<PushEvent>> = None;
        let mut poll: Option<Interval> = None;

        if self.config.vod {
            recording = self.start_recording().await;
            if recording.is_none() {
                self.cancel.cancel();
                return RunOutcome::VodComplete;
            }
        } else {
            if self.resolver.is_live().await {
                self.on_signal(ChannelSignal::WentLive, &mut state, &mut recording).await;
            } else {
                info!("{} is offline", self.config.channel);
            }
            push = match self.push.take() {
                Some(events) => Some(events),
                None => self.subscribe().await,
            };
            poll = self.config.poll_interval().map(idle_poll);
        }

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    if let Some(active) = recording.take() {
                        abort(active, &self.recording_flag);
                    }
                    break RunOutcome::Interrupted;
                }

                event = next_push_event(&mut push) => match event {
                    Some(event) => self.on_push_event(event, &mut state, &mut recording).await,
                    None => {
                        warn!("Push listener stopped, relying on polling");
                        push = None;
                    }
                },

                _ = next_tick(&mut poll), if recording.is_none() => {
                    let signal = if self.resolver.is_live().await {
                        ChannelSignal::WentLive
                    } else {
                        ChannelSignal::NoRenditions
                    };
                    self.on_signal(signal, &mut state, &mut recording).await;
                }

                event = next_pipeline_event(&mut recording) => {
                    let summary = match event {
                        Some(PipelineEvent::Finished(summary)) => Some(summary),
                        Some(event) => {
                            if let Some(active) = recording.as_mut() {
                                self.on_pipeline_event(active, event);
                            }
                            continue;
                        }
                        None => None,
                    };

                    if let Some(active) = recording.take() {
                        finish(active, summary.as_ref(), &self.recording_flag);
                    }
                    if self.config.vod {
                        break RunOutcome::VodComplete;
                    }
                    self.after_recording(&mut state, &mut recording).await;
                }
            }
        };

        self.cancel.cancel();
        outcome
    }

    async fn subscribe(&mut self) -> Option<mpsc::Receiver<PushEvent>> {
        match self.resolver.channel_id().await {
            Some(id) => {
                let (events, _task) = PushListener::new(id).spawn(self.cancel.child_token());
                Some(events)
            }
            None => {
                warn!(
                    "Could not look up the id of {}, live notifications are disabled",
                    self.config.channel
                );
                None
            }
        }
    }

    async fn on_push_event(
        &mut self,
        event: PushEvent,
        state: &mut ChannelState,
        recording: &mut Option<ActiveRecording>,
    ) {
        let signal = match event {
            PushEvent::Connected => {
                debug!("Listening for stream events of {}", self.config.channel);
                return;
            }
            PushEvent::Reconnected => {
                info!("Reconnected to stream events of {}", self.config.channel);
                return;
            }
            PushEvent::Closed => {
                debug!("Push connection closed");
                return;
            }
            PushEvent::Error(e) => {
                warn!(error = %e, "Push listener error");
                return;
            }
            PushEvent::StreamUp => ChannelSignal::WentLive,
            PushEvent::StreamDown => ChannelSignal::WentOffline,
        };

        self.on_signal(signal, state, recording).await;
    }

    /// Feed `signal` to the state machine. A live signal while already live
    /// but not recording retries the recording, since an earlier start failed.
    async fn on_signal(
        &mut self,
        signal: ChannelSignal,
        state: &mut ChannelState,
        recording: &mut Option<ActiveRecording>,
    ) {
        let retry = signal == ChannelSignal::WentLive && recording.is_none();
        match state.apply(signal) {
            Some(transition) => self.on_transition(transition, recording).await,
            None if retry && state.is_live() => {
                info!("{} is live, retrying the recording", self.config.channel);
                *recording = self.start_recording().await;
            }
            None => {}
        }
    }

    async fn on_transition(
        &mut self,
        transition: Transition,
        recording: &mut Option<ActiveRecording>,
    ) {
        match transition {
            Transition::CameOnline => {
                info!("{} is live", self.config.channel);
                if recording.is_none() {
                    *recording = self.start_recording().await;
                }
            }
            // the pipeline ends by itself once the playlist is gone
            Transition::WentOffline => info!("{} is offline", self.config.channel),
        }
    }

    /// A live recording ended: record again if the channel is still live,
    /// otherwise mark it offline.
    async fn after_recording(
        &mut self,
        state: &mut ChannelState,
        recording: &mut Option<ActiveRecording>,
    ) {
        if !state.is_live() {
            return;
        }

        if self.resolver.is_live().await {
            debug!("{} is still live, starting a new recording", self.config.channel);
            *recording = self.start_recording().await;
        } else {
            self.on_signal(ChannelSignal::NoRenditions, state, recording).await;
        }
    }

    async fn start_recording(&mut self) -> Option<ActiveRecording> {
        let quality = self.config.quality.clone();
        let target = match self.resolver.get_stream(&quality).await {
            Ok(target) => target,
            Err(e) => {
                error!("• Recording of Stream failed: {}", e);
                return None;
            }
        };
        debug!(
            quality = quality_label(&target.tag),
            vod = ?target.vod_id,
            "Resolved media playlist {}",
            target.url
        );

        let output = self.output_path(target.date);
        let reader_cancel = self.cancel.child_token();

        let events = match self
            .reader
            .open(&target.url, &target.tag, reader_cancel.clone())
            .await
        {
            Ok(events) => events,
            Err(e) => {
                error!("• Recording of Stream failed: {}", e);
                return None;
            }
        };

        let pipeline = Pipeline::new(Arc::clone(&self.downloader), self.engine.pipeline.clone());
        let handle = match pipeline.start(events, output.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                reader_cancel.cancel();
                error!("• Recording of Stream failed: {}", e);
                return None;
            }
        };

        let job = RecordingJob::new(&self.config.channel, quality, output, target.date);
        debug!(
            job = %job.id,
            channel = %job.channel,
            quality = %job.quality,
            vod_date = ?job.vod_date,
            "Recording job created for {}",
            job.output.display()
        );

        Some(ActiveRecording {
            job,
            pipeline: handle,
            reader_cancel,
        })
    }

    fn output_path(&self, date: Option<DateTime<Utc>>) -> PathBuf {
        let context = TemplateContext {
            channel: &self.config.channel,
            timestamp: date.unwrap_or_else(Utc::now),
            timezone: &self.config.tz,
            time_format: self.config.time_format(),
        };
        let path = resolve_output_path(
            &self.config.output_dir,
            &self.config.template,
            OUTPUT_EXTENSION,
            &context,
            TargetOs::current(),
        );
        reserve_file(&path)
    }

    fn on_pipeline_event(&self, active: &mut ActiveRecording, event: PipelineEvent) {
        match event {
            PipelineEvent::Started => match active.job.transition(JobStatus::Active) {
                Ok(()) => {
                    self.recording_flag.store(true, Ordering::SeqCst);
                    info!("• Recording live stream to file");
                }
                Err(e) => warn!("{}", e),
            },
            PipelineEvent::Quality(quality) => {
                debug!("Recording {} at {}", self.config.channel, quality_label(&quality));
            }
            PipelineEvent::OutputOpened(path) => {
                info!("Writing to {}", path.display());
                active.job.output = path;
            }
            PipelineEvent::Error {
                source,
                error,
                active: recording,
            } => {
                if recording && active.job.take_first_error() {
                    warn!("• Error recording live stream; a partial recording has been saved");
                }
                debug!(?source, "Recording error: {}", error);
            }
            PipelineEvent::Finished(_) => {}
        }
    }
}

fn finish(mut active: ActiveRecording, summary: Option<&PipelineSummary>, flag: &AtomicBool) {
    flag.store(false, Ordering::SeqCst);
    active.reader_cancel.cancel();
    let was_active = active.job.is_active();
    if let Err(e) = active.job.transition(JobStatus::Finished) {
        warn!("{}", e);
    }
    debug!(job = %active.job.id, status = %active.job.status(), "Recording job closed");

    match summary {
        Some(summary) if was_active => info!(
            segments = summary.appended,
            failed = summary.failed,
            skipped_ads = summary.skipped_ads,
            bytes = summary.bytes,
            path = %active.job.output.display(),
            "• Recording live stream completed"
        ),
        Some(_) => warn!("• Recording of Stream failed: no segments were recorded"),
        None => error!("• Recording of Stream failed: pipeline stopped unexpectedly"),
    }
}

fn abort(mut active: ActiveRecording, flag: &AtomicBool) {
    flag.store(false, Ordering::SeqCst);
    active.pipeline.abort();
    active.reader_cancel.cancel();
    if active.job.transition(JobStatus::Aborted).is_ok() {
        warn!("{}", PARTIAL_RECORDING_NOTICE);
    }
}

fn idle_poll(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_push_event(push: &mut Option<mpsc::Receiver<PushEvent>>) -> Option<PushEvent> {
    match push {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_pipeline_event(recording: &mut Option<ActiveRecording>) -> Option<PipelineEvent> {
    match recording {
        Some(active) => active.pipeline.events.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use platforms_parser::PlatformError;
    use platforms_parser::twitch::{AccessToken, TokenScope, VodInfo};
    use tokio::sync::oneshot;
    use trec_engine::DownloadError;
    use trec_engine::hls::{FinishReason, ReaderEvent, ReaderSummary, SegmentAnnouncement};

    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"chunked\",NAME=\"1080p60 (source)\",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:BANDWIDTH=8534030,RESOLUTION=1920x1080,VIDEO=\"chunked\"
https://video-weaver.example.hls.ttvnw.net/v1/playlist/chunked.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"audio_only\",NAME=\"audio_only\",AUTOSELECT=NO,DEFAULT=NO
#EXT-X-STREAM-INF:BANDWIDTH=160000,CODECS=\"mp4a.40.2\",VIDEO=\"audio_only\"
https://video-weaver.example.hls.ttvnw.net/v1/playlist/audio_only.m3u8
";

    /// Answers the n-th live master playlist request with `statuses[n]`
    /// (200 serves the playlist). Requests past the script get a 404.
    struct FakeApi {
        statuses: Vec<u16>,
        vod: Option<VodInfo>,
        requests: AtomicUsize,
    }

    impl FakeApi {
        fn scripted(statuses: &[u16]) -> Self {
            Self {
                statuses: statuses.to_vec(),
                vod: None,
                requests: AtomicUsize::new(0),
            }
        }

        /// Live for the first `checks` requests.
        fn live_for(checks: usize) -> Self {
            Self::scripted(&vec![200; checks])
        }

        fn with_vod(mut self, vod: VodInfo) -> Self {
            self.vod = Some(vod);
            self
        }
    }

    #[async_trait]
    impl TwitchApi for FakeApi {
        async fn channel_id(&self, _login: &str) -> Result<u64, PlatformError> {
            Err(PlatformError::GqlError("user not found".into()))
        }

        async fn stream_token(&self, _login: &str) -> Result<AccessToken, PlatformError> {
            Ok(AccessToken {
                value: "live".into(),
                signature: "sig".into(),
                scope: TokenScope::Live,
            })
        }

        async fn latest_vod(&self, _login: &str) -> Result<Option<VodInfo>, PlatformError> {
            Ok(self.vod.clone())
        }

        async fn vod_token(&self, vod_id: u64) -> Result<AccessToken, PlatformError> {
            Ok(AccessToken {
                value: "vod".into(),
                signature: "sig".into(),
                scope: TokenScope::Vod(vod_id),
            })
        }

        async fn master_playlist(
            &self,
            _login: &str,
            token: &AccessToken,
            _low_latency: bool,
        ) -> Result<String, PlatformError> {
            if token.scope != TokenScope::Live {
                return Ok(MASTER.to_string());
            }
            let request = self.requests.fetch_add(1, Ordering::SeqCst);
            match self.statuses.get(request).copied().unwrap_or(404) {
                200 => Ok(MASTER.to_string()),
                status => Err(PlatformError::HttpStatus {
                    status,
                    url: "/api/channel/hls/somebody.m3u8".into(),
                }),
            }
        }
    }

    /// Announces `segments` sequence numbers, then finishes. With `end_of_stream`
    /// set, the finish waits until that token is cancelled.
    struct FakeReader {
        segments: u64,
        end_of_stream: Option<CancellationToken>,
        opened: AtomicUsize,
    }

    impl FakeReader {
        fn new(segments: u64) -> Arc<Self> {
            Arc::new(Self {
                segments,
                end_of_stream: None,
                opened: AtomicUsize::new(0),
            })
        }

        fn until(segments: u64, end_of_stream: CancellationToken) -> Arc<Self> {
            Arc::new(Self {
                segments,
                end_of_stream: Some(end_of_stream),
                opened: AtomicUsize::new(0),
            })
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ManifestReader for FakeReader {
        async fn open(
            &self,
            _url: &str,
            quality: &str,
            cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<ReaderEvent>, DownloadError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(64);
            tx.send(ReaderEvent::Quality(quality.to_string())).await.unwrap();
            for sequence in 1..=self.segments {
                tx.send(ReaderEvent::Segment(SegmentAnnouncement {
                    sequence,
                    uri: format!("https://example.com/{sequence}.ts"),
                    duration: 2.0,
                    is_ad: false,
                    is_prefetch: false,
                }))
                .await
                .unwrap();
            }

            let finish = ReaderEvent::Finish(ReaderSummary {
                segments: self.segments,
                reason: FinishReason::EndList,
            });
            match self.end_of_stream.clone() {
                Some(end) => {
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = end.cancelled() => {
                                let _ = tx.send(finish).await;
                            }
                            _ = cancel.cancelled() => {}
                        }
                    });
                }
                None => tx.send(finish).await.unwrap(),
            }
            Ok(rx)
        }
    }

    /// Writes `<sequence>;` per segment; sequences in `failing` fail.
    #[derive(Default)]
    struct FakeDownloader {
        failing: Vec<u64>,
    }

    #[async_trait]
    impl SegmentDownloader for FakeDownloader {
        async fn download(
            &self,
            segment: &SegmentAnnouncement,
            destination: &Path,
        ) -> Result<u64, DownloadError> {
            if self.failing.contains(&segment.sequence) {
                return Err(DownloadError::SegmentFetch {
                    reason: format!("segment {} failed", segment.sequence),
                    retryable: false,
                });
            }
            let body = format!("{};", segment.sequence);
            tokio::fs::write(destination, body.as_bytes()).await?;
            Ok(body.len() as u64)
        }
    }

    /// Shared buffer for log assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(dir: &Path, vod: bool) -> AppConfig {
        AppConfig {
            channel: "somebody".to_string(),
            vod,
            output_dir: dir.to_string_lossy().into_owned(),
            template: ":channel".to_string(),
            ..AppConfig::default()
        }
    }

    fn recorder(config: AppConfig, api: FakeApi, reader: Arc<FakeReader>) -> Recorder {
        recorder_with(config, api, reader, FakeDownloader::default())
    }

    fn recorder_with(
        config: AppConfig,
        api: FakeApi,
        reader: Arc<FakeReader>,
        downloader: FakeDownloader,
    ) -> Recorder {
        Recorder::new(
            config,
            Arc::new(api),
            reader,
            Arc::new(downloader),
            CancellationToken::new(),
        )
    }

    async fn recordings(dir: &Path) -> HashMap<String, String> {
        let mut files = HashMap::new();
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_type().await.unwrap().is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                files.insert(name, tokio::fs::read_to_string(entry.path()).await.unwrap());
            }
        }
        files
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let wait = async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn records_vod_once_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::live_for(0).with_vod(VodInfo {
            id: 42,
            published_at: None,
        });
        let reader = FakeReader::new(3);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            recorder(config(dir.path(), true), api, Arc::clone(&reader))
                .run(std::future::pending::<()>()),
        )
        .await
        .unwrap();

        assert_eq!(outcome, RunOutcome::VodComplete);
        assert_eq!(reader.opened(), 1);
        assert_eq!(
            recordings(dir.path()).await,
            HashMap::from([("somebody.ts".to_string(), "1;2;3;".to_string())])
        );
    }

    #[tokio::test]
    async fn missing_vod_exits_without_recording() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FakeReader::new(3);

        let outcome = recorder(config(dir.path(), true), FakeApi::live_for(0), Arc::clone(&reader))
            .run(std::future::pending::<()>())
            .await;

        assert_eq!(outcome, RunOutcome::VodComplete);
        assert_eq!(reader.opened(), 0);
        assert!(recordings(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn records_live_stream_then_goes_offline() {
        let dir = tempfile::tempdir().unwrap();
        // startup check and stream resolution see the channel live, the
        // check after the recording does not
        let reader = FakeReader::new(2);

        let outcome = recorder(config(dir.path(), false), FakeApi::live_for(2), Arc::clone(&reader))
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await;

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(reader.opened(), 1);
        assert_eq!(
            recordings(dir.path()).await,
            HashMap::from([("somebody.ts".to_string(), "1;2;".to_string())])
        );
    }

    #[tokio::test]
    async fn restarts_into_a_new_part_while_still_live() {
        let dir = tempfile::tempdir().unwrap();
        // live for startup, first resolution, the post-recording check and
        // the second resolution; offline afterwards
        let reader = FakeReader::new(1);

        recorder(config(dir.path(), false), FakeApi::live_for(4), Arc::clone(&reader))
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await;

        assert_eq!(reader.opened(), 2);
        assert_eq!(
            recordings(dir.path()).await,
            HashMap::from([
                ("somebody.ts".to_string(), "1;".to_string()),
                ("somebody (part 2).ts".to_string(), "1;".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn offline_channel_waits_for_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FakeReader::new(1);

        let outcome = recorder(config(dir.path(), false), FakeApi::live_for(0), Arc::clone(&reader))
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(reader.opened(), 0);
    }

    #[tokio::test]
    async fn failed_start_is_retried_on_the_next_poll() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            poll_interval: 1,
            ..config(dir.path(), false)
        };
        // live at startup, a transient 502 on the first resolution, live again
        // for the poll and its resolution, offline after the recording
        let api = FakeApi::scripted(&[200, 502, 200, 200]);
        let reader = FakeReader::new(1);

        let outcome = recorder(config, api, Arc::clone(&reader))
            .run(tokio::time::sleep(Duration::from_millis(1600)))
            .await;

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(reader.opened(), 1);
        assert_eq!(
            recordings(dir.path()).await,
            HashMap::from([("somebody.ts".to_string(), "1;".to_string())])
        );
    }

    #[tokio::test]
    async fn failed_restart_is_retried_by_a_push_edge() {
        let dir = tempfile::tempdir().unwrap();
        // live at startup and for the first recording, the post-recording
        // check still sees renditions but the restart hits a 502
        let api = FakeApi::scripted(&[200, 200, 200, 502, 200]);
        let reader = FakeReader::new(1);
        let (push_tx, push_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let recorder = recorder(config(dir.path(), false), api, Arc::clone(&reader))
            .with_push_events(push_rx);
        let run = tokio::spawn(recorder.run(async {
            let _ = stop_rx.await;
        }));

        wait_until("the first recording", || reader.opened() == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        push_tx.send(PushEvent::StreamUp).await.unwrap();
        wait_until("the retried recording", || reader.opened() == 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        stop_tx.send(()).unwrap();
        assert_eq!(run.await.unwrap(), RunOutcome::Interrupted);
        assert_eq!(
            recordings(dir.path()).await,
            HashMap::from([
                ("somebody.ts".to_string(), "1;".to_string()),
                ("somebody (part 2).ts".to_string(), "1;".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn push_edges_start_and_end_a_recording() {
        let dir = tempfile::tempdir().unwrap();
        // offline at startup, live when stream-up resolves the playlist
        let api = Arc::new(FakeApi::scripted(&[404, 200]));
        let end_of_stream = CancellationToken::new();
        let reader = FakeReader::until(2, end_of_stream.clone());
        let (push_tx, push_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let recorder = Recorder::new(
            config(dir.path(), false),
            Arc::clone(&api) as Arc<dyn TwitchApi>,
            Arc::clone(&reader) as Arc<dyn ManifestReader>,
            Arc::new(FakeDownloader::default()),
            CancellationToken::new(),
        )
        .with_push_events(push_rx);
        let flag = recorder.recording_flag();
        let run = tokio::spawn(recorder.run(async {
            let _ = stop_rx.await;
        }));

        push_tx.send(PushEvent::Connected).await.unwrap();
        push_tx.send(PushEvent::StreamUp).await.unwrap();
        wait_until("the recording to start", || flag.load(Ordering::SeqCst)).await;
        assert_eq!(reader.opened(), 1);

        // stream-down marks the channel offline; the recording runs until the
        // playlist ends and no liveness check follows it
        push_tx.send(PushEvent::StreamDown).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        end_of_stream.cancel();
        wait_until("the recording to finish", || !flag.load(Ordering::SeqCst)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        stop_tx.send(()).unwrap();
        assert_eq!(run.await.unwrap(), RunOutcome::Interrupted);
        assert_eq!(api.requests.load(Ordering::SeqCst), 2);
        assert_eq!(reader.opened(), 1);
        assert_eq!(
            recordings(dir.path()).await,
            HashMap::from([("somebody.ts".to_string(), "1;2;".to_string())])
        );
    }

    #[tokio::test]
    async fn shutdown_aborts_an_active_recording() {
        let dir = tempfile::tempdir().unwrap();
        let end_of_stream = CancellationToken::new();
        let reader = FakeReader::until(1, end_of_stream);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let api = FakeApi::live_for(2);
        let recorder = recorder(config(dir.path(), false), api, Arc::clone(&reader));
        let flag = recorder.recording_flag();
        let run = tokio::spawn(recorder.run(async {
            let _ = stop_rx.await;
        }));

        wait_until("the recording to start", || flag.load(Ordering::SeqCst)).await;
        stop_tx.send(()).unwrap();

        assert_eq!(run.await.unwrap(), RunOutcome::Interrupted);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn segment_errors_are_reported_once_per_recording() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let reader = FakeReader::new(4);
        let downloader = FakeDownloader {
            failing: vec![2, 3],
        };

        recorder_with(config(dir.path(), false), FakeApi::live_for(2), reader, downloader)
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await;

        let logs = logs.contents();
        assert_eq!(
            logs.matches("Error recording live stream; a partial recording has been saved")
                .count(),
            1,
            "{logs}"
        );
        assert!(logs.contains("Recording live stream completed"), "{logs}");
        assert_eq!(
            recordings(dir.path()).await,
            HashMap::from([("somebody.ts".to_string(), "1;4;".to_string())])
        );
    }
}
