//! Twitch PubSub wire format.
//!
//! Frames are JSON text messages tagged by `type`. Topic payloads arrive as a
//! JSON document encoded inside the `data.message` string.

use serde::Deserialize;
use serde_json::json;

/// PubSub endpoint.
pub const PUBSUB_URL: &str = "wss://pubsub-edge.twitch.tv";

/// Topic carrying stream-up/stream-down for a channel id.
pub fn playback_topic(channel_id: u64) -> String {
    format!("video-playback-by-id.{channel_id}")
}

pub fn listen_message(topic: &str, nonce: &str) -> String {
    json!({
        "type": "LISTEN",
        "nonce": nonce,
        "data": { "topics": [topic] },
    })
    .to_string()
}

pub fn ping_message() -> String {
    json!({ "type": "PING" }).to_string()
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Pong,
    /// The server is about to drop the connection.
    Reconnect,
    /// Answer to a LISTEN. `error` is `None` on success.
    Response {
        nonce: Option<String>,
        error: Option<String>,
    },
    Message {
        topic: String,
        event: PlaybackEvent,
    },
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    StreamUp,
    StreamDown,
    /// Any other playback payload (`viewcount`, `commercial`, ...).
    Other(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    nonce: Option<String>,
    error: Option<String>,
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    topic: String,
    message: String,
}

#[derive(Deserialize)]
struct RawPlayback {
    #[serde(rename = "type")]
    kind: String,
}

pub fn decode(text: &str) -> Result<ServerMessage, serde_json::Error> {
    let frame: RawFrame = serde_json::from_str(text)?;

    let message = match frame.kind.as_str() {
        "PONG" => ServerMessage::Pong,
        "RECONNECT" => ServerMessage::Reconnect,
        "RESPONSE" => ServerMessage::Response {
            nonce: frame.nonce,
            error: frame.error.filter(|e| !e.is_empty()),
        },
        "MESSAGE" => {
            let Some(data) = frame.data else {
                return Ok(ServerMessage::Unknown(frame.kind));
            };
            let payload: RawPlayback = serde_json::from_str(&data.message)?;
            let event = match payload.kind.as_str() {
                "stream-up" => PlaybackEvent::StreamUp,
                "stream-down" => PlaybackEvent::StreamDown,
                _ => PlaybackEvent::Other(payload.kind),
            };
            ServerMessage::Message {
                topic: data.topic,
                event,
            }
        }
        _ => ServerMessage::Unknown(frame.kind),
    };

    Ok(message)
}
