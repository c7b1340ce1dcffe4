mod api;
mod models;
mod playlist;
mod quality;
mod resolver;
mod state;

pub use api::{TwitchApi, TwitchClient, usher_url};
pub use models::{AccessToken, Channel, Rendition, TokenScope, VodInfo};
pub use playlist::parse_master_playlist;
pub use quality::{quality_label, quality_tag, select_rendition};
pub use resolver::{ChannelResolver, ResolveError, ResolverOptions, StreamTarget};
pub use state::{ChannelSignal, ChannelState, Transition};
