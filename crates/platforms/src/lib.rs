//! Twitch channel monitoring primitives.
//!
//! - [`twitch`]: GraphQL/usher access behind the [`twitch::TwitchApi`] seam,
//!   master playlist parsing, quality selection and the [`twitch::ChannelResolver`]
//! - [`pubsub`]: auto-reconnecting PubSub listener for stream-up/stream-down edges
//!
pub mod client;
pub mod error;
pub mod pubsub;
pub mod twitch;

pub use client::default_client;
pub use error::PlatformError;
