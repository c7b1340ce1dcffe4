use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use pipeline_common::reserve_file;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::DownloadError;

const MAX_RESERVE_ATTEMPTS: u32 = 16;

/// Result of one append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub bytes: u64,
    /// Set on the append that created the output file.
    pub opened: Option<PathBuf>,
}

/// Concatenates transient segment files into the output file, in call order.
///
/// The output is created on the first append, at a freshly reserved path and
/// with `create_new`, so an existing file is never overwritten.
pub struct SegmentAppender {
    target: PathBuf,
    output: Option<(PathBuf, File)>,
    keep_segments: bool,
}

impl SegmentAppender {
    pub fn new(target: PathBuf, keep_segments: bool) -> Self {
        Self {
            target,
            output: None,
            keep_segments,
        }
    }

    /// Path actually written, once opened.
    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_ref().map(|(path, _)| path.as_path())
    }

    pub async fn append(&mut self, segment: &Path) -> Result<AppendOutcome, DownloadError> {
        let mut opened = None;
        if self.output.is_none() {
            let (path, file) = open_reserved(&self.target).await?;
            opened = Some(path.clone());
            self.output = Some((path, file));
        }
        let Some((_, file)) = self.output.as_mut() else {
            return Err(DownloadError::Internal {
                reason: "output file not open".to_string(),
            });
        };

        let mut source = File::open(segment).await?;
        let bytes = tokio::io::copy(&mut source, file).await?;
        file.flush().await?;
        drop(source);

        if !self.keep_segments
            && let Err(e) = tokio::fs::remove_file(segment).await
        {
            warn!("Failed to delete segment {}: {}", segment.display(), e);
        }

        Ok(AppendOutcome { bytes, opened })
    }
}

async fn open_reserved(target: &Path) -> Result<(PathBuf, File), DownloadError> {
    let mut last_error = None;

    for _ in 0..MAX_RESERVE_ATTEMPTS {
        let path = reserve_file(target);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                info!("Writing recording to {}", path.display());
                return Ok((path, file));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} was created concurrently, reserving again", path.display());
                last_error = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(last_error
        .map(DownloadError::from)
        .unwrap_or_else(|| DownloadError::Internal {
            reason: format!("could not reserve {}", target.display()),
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_in_order_and_removes_segments() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a_1.ts");
        let second = dir.path().join("a_2.ts");
        tokio::fs::write(&first, b"one").await.unwrap();
        tokio::fs::write(&second, b"two").await.unwrap();

        let target = dir.path().join("out.ts");
        let mut appender = SegmentAppender::new(target.clone(), false);

        let outcome = appender.append(&first).await.unwrap();
        assert_eq!(outcome.bytes, 3);
        assert_eq!(outcome.opened.as_deref(), Some(target.as_path()));

        let outcome = appender.append(&second).await.unwrap();
        assert_eq!(outcome.opened, None);

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"onetwo");
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[tokio::test]
    async fn never_overwrites_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.ts");
        tokio::fs::write(&target, b"previous").await.unwrap();

        let segment = dir.path().join("s.ts");
        tokio::fs::write(&segment, b"new").await.unwrap();

        let mut appender = SegmentAppender::new(target.clone(), true);
        let outcome = appender.append(&segment).await.unwrap();

        let part2 = dir.path().join("out (part 2).ts");
        assert_eq!(outcome.opened, Some(part2.clone()));
        assert_eq!(appender.output_path(), Some(part2.as_path()));
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"previous");
        assert_eq!(tokio::fs::read(&part2).await.unwrap(), b"new");
        // kept on request
        assert!(segment.exists());
    }

    #[tokio::test]
    async fn missing_segment_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = SegmentAppender::new(dir.path().join("out.ts"), false);
        let result = appender.append(&dir.path().join("missing.ts")).await;
        assert!(matches!(result, Err(DownloadError::Io { .. })));
    }
}
