//! # Recording engine
//!
//! Turns a live HLS media playlist into one ordered output file.
//!
//! - [`hls`]: the [`hls::ManifestReader`] seam and its HLS implementation,
//!   announcing each media sequence number once, in order
//! - [`pipeline`]: two FIFO stages (download, append) of concurrency one,
//!   joined by a completion barrier that fires the terminal event once
//! - [`retry`]: optional backoff for transient segment failures
//!
pub mod config;
pub mod error;
pub mod hls;
pub mod pipeline;
pub mod retry;

pub use config::EngineConfig;
pub use error::DownloadError;
pub use retry::RetryPolicy;
