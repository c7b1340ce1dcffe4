use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Active,
    Finished,
    Aborted,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Finished => "finished",
            JobStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl JobStatus {
    fn can_become(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Active)
                | (JobStatus::Pending, JobStatus::Finished)
                | (JobStatus::Active, JobStatus::Finished)
                | (JobStatus::Active, JobStatus::Aborted)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("recording job cannot go from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One recording attempt of a channel.
#[derive(Debug, Clone)]
pub struct RecordingJob {
    pub id: Uuid,
    pub channel: String,
    pub quality: String,
    /// Reserved output path, replaced by the path actually opened.
    pub output: PathBuf,
    pub vod_date: Option<DateTime<Utc>>,
    status: JobStatus,
    error_reported: bool,
}

impl RecordingJob {
    pub fn new(
        channel: impl Into<String>,
        quality: impl Into<String>,
        output: PathBuf,
        vod_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            quality: quality.into(),
            output,
            vod_date,
            status: JobStatus::Pending,
            error_reported: false,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_become(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Returns `true` only for the first call, so an active job reports its
    /// partial-recording error once.
    pub fn take_first_error(&mut self) -> bool {
        !std::mem::replace(&mut self.error_reported, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RecordingJob {
        RecordingJob::new("somebody", "best", PathBuf::from("out.ts"), None)
    }

    #[test]
    fn normal_lifecycle() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        job.transition(JobStatus::Active).unwrap();
        assert!(job.is_active());
        job.transition(JobStatus::Finished).unwrap();
        assert_eq!(job.status(), JobStatus::Finished);
    }

    #[test]
    fn empty_session_finishes_from_pending() {
        let mut job = job();
        assert!(job.transition(JobStatus::Finished).is_ok());
    }

    #[test]
    fn rejects_invalid_transitions() {
        let mut job = job();
        assert_eq!(
            job.transition(JobStatus::Aborted),
            Err(InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Aborted,
            })
        );

        job.transition(JobStatus::Active).unwrap();
        job.transition(JobStatus::Aborted).unwrap();
        assert!(job.transition(JobStatus::Finished).is_err());
        assert!(job.transition(JobStatus::Active).is_err());
        assert_eq!(job.status(), JobStatus::Aborted);
    }

    #[test]
    fn first_error_is_reported_once() {
        let mut job = job();
        assert!(job.take_first_error());
        assert!(!job.take_first_error());
    }
}
