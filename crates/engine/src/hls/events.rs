use crate::error::DownloadError;

/// A media segment announced by a [`super::ManifestReader`].
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAnnouncement {
    /// Media sequence number, strictly increasing within one reader session.
    pub sequence: u64,
    /// Absolute segment URL.
    pub uri: String,
    pub duration: f32,
    pub is_ad: bool,
    /// Speculative segment the playlist has not finalized yet.
    pub is_prefetch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The playlist carried `#EXT-X-ENDLIST`.
    EndList,
    /// The playlist could not be refreshed any more.
    PlaylistUnavailable,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSummary {
    /// Segments announced during the session.
    pub segments: u64,
    pub reason: FinishReason,
}

/// Output of a manifest reader session.
///
/// `Quality` is sent once, first. `Finish` is sent once, last.
#[derive(Debug)]
pub enum ReaderEvent {
    Quality(String),
    Segment(SegmentAnnouncement),
    Error(DownloadError),
    Finish(ReaderSummary),
}
