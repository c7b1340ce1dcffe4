mod events;
mod reader;
mod twitch;

pub use events::{FinishReason, ReaderEvent, ReaderSummary, SegmentAnnouncement};
pub use reader::{HlsManifestReader, ManifestReader, PlaylistCursor};
pub use twitch::{
    PREFETCH_SEGMENT_TITLE, TwitchAdTracker, is_twitch_playlist, preprocess_twitch_playlist,
};
