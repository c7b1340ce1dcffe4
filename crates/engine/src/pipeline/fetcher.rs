// Segment fetcher: streams one media segment to its transient file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::DownloadError;
use crate::hls::SegmentAnnouncement;
use crate::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Download `segment` into `destination`, returning the number of bytes written.
    async fn download(
        &self,
        segment: &SegmentAnnouncement,
        destination: &Path,
    ) -> Result<u64, DownloadError>;
}

/// HTTP [`SegmentDownloader`] with optional retries.
pub struct HttpSegmentFetcher {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpSegmentFetcher {
    pub fn new(client: Client, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort pending retries when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn fetch_once(&self, uri: &str, destination: &Path) -> Result<u64, DownloadError> {
        let response = self.client.get(uri).timeout(self.timeout).send().await.map_err(|e| {
            DownloadError::segment_fetch(e.to_string(), is_retryable_reqwest_error(&e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(status, uri, "segment download"));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                DownloadError::segment_fetch(e.to_string(), is_retryable_reqwest_error(&e))
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        trace!(bytes = written, "Wrote {}", destination.display());
        Ok(written)
    }
}

#[async_trait]
impl SegmentDownloader for HttpSegmentFetcher {
    async fn download(
        &self,
        segment: &SegmentAnnouncement,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        debug!(sequence = segment.sequence, "Downloading segment");
        retry_with_backoff(&self.retry, &self.cancel, |_| async {
            RetryAction::from(self.fetch_once(&segment.uri, destination).await)
        })
        .await
    }
}
