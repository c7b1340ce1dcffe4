//! Auto-reconnecting PubSub listener for channel live/offline edges.

mod protocol;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub use protocol::{
    PUBSUB_URL, PlaybackEvent, ServerMessage, decode, listen_message, ping_message, playback_topic,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events emitted by [`PushListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Connected,
    Reconnected,
    Closed,
    Error(String),
    StreamUp,
    StreamDown,
}

#[derive(Clone, Copy, Debug)]
pub struct PushListenerConfig {
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Twitch drops clients that stay silent for more than 5 minutes.
    pub ping_interval: Duration,
    /// A PING without a PONG within this window means the socket is dead.
    pub pong_timeout: Duration,
}

impl Default for PushListenerConfig {
    fn default() -> Self {
        Self {
            base_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            ping_interval: Duration::from_secs(4 * 60),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Reconnect,
    ReceiverDropped,
}

/// Subscribes to `video-playback-by-id.<channel id>` and forwards stream edges.
///
/// The connection is re-established on close, error or a server `RECONNECT`,
/// with exponential backoff and no attempt limit, until cancelled.
pub struct PushListener {
    url: String,
    topic: String,
    config: PushListenerConfig,
}

impl PushListener {
    pub fn new(channel_id: u64) -> Self {
        Self {
            url: PUBSUB_URL.to_string(),
            topic: playback_topic(channel_id),
            config: PushListenerConfig::default(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_config(mut self, config: PushListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start listening in a background task.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<PushEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = tokio::spawn(async move { self.run(tx, cancel).await });
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<PushEvent>, cancel: CancellationToken) {
        let mut delay = self.config.base_reconnect_delay;
        let mut connected_before = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            debug!("Connecting to PubSub {}", self.url);
            let connect_result = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = cancel.cancelled() => break,
            };

            match connect_result {
                Ok((mut ws, _)) => {
                    let nonce = uuid::Uuid::new_v4().simple().to_string();
                    let listen = listen_message(&self.topic, &nonce);

                    if let Err(e) = ws.send(Message::text(listen)).await {
                        warn!("Failed to subscribe to {}: {}", self.topic, e);
                        if !emit(&tx, PushEvent::Error(e.to_string())).await {
                            break;
                        }
                    } else {
                        let event = if connected_before {
                            info!("Reconnected to Twitch PubSub");
                            PushEvent::Reconnected
                        } else {
                            info!("Connected to Twitch PubSub");
                            PushEvent::Connected
                        };
                        connected_before = true;
                        delay = self.config.base_reconnect_delay;

                        if !emit(&tx, event).await {
                            break;
                        }

                        match self.session(&mut ws, &tx, &cancel).await {
                            SessionEnd::Shutdown => {
                                let _ = ws.close(None).await;
                                break;
                            }
                            SessionEnd::ReceiverDropped => break,
                            SessionEnd::Reconnect => {
                                debug!("Disconnected from Twitch PubSub");
                                if !emit(&tx, PushEvent::Closed).await {
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("PubSub connection failed: {}", e);
                    if !emit(&tx, PushEvent::Error(e.to_string())).await {
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = cancel.cancelled() => break,
            }
            delay = (delay * 2).min(self.config.max_reconnect_delay);
        }

        debug!("PubSub listener for {} stopped", self.topic);
    }

    async fn session(
        &self,
        ws: &mut WsStream,
        tx: &mpsc::Sender<PushEvent>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let period = self.config.ping_interval;
        let mut ping_timer = tokio::time::interval_at(Instant::now() + period, period);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Shutdown,

                _ = ping_timer.tick() => {
                    if let Err(e) = ws.send(Message::text(ping_message())).await {
                        warn!("Failed to send PubSub ping: {}", e);
                        return SessionEnd::Reconnect;
                    }
                    trace!("Sent PubSub ping");
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                }

                _ = sleep_until(pong_deadline) => {
                    warn!("No PubSub PONG within {:?}, reconnecting", self.config.pong_timeout);
                    return SessionEnd::Reconnect;
                }

                msg = ws.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => return SessionEnd::Reconnect,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!("PubSub socket error: {}", e);
                            if !emit(tx, PushEvent::Error(e.to_string())).await {
                                return SessionEnd::ReceiverDropped;
                            }
                            return SessionEnd::Reconnect;
                        }
                    };

                    trace!("PubSub frame: {}", text.as_str());
                    let event = match decode(text.as_str()) {
                        Ok(ServerMessage::Message { event: PlaybackEvent::StreamUp, .. }) => {
                            debug!("stream up");
                            PushEvent::StreamUp
                        }
                        Ok(ServerMessage::Message { event: PlaybackEvent::StreamDown, .. }) => {
                            debug!("stream down");
                            PushEvent::StreamDown
                        }
                        Ok(ServerMessage::Pong) => {
                            trace!("PubSub pong");
                            pong_deadline = None;
                            continue;
                        }
                        Ok(ServerMessage::Reconnect) => {
                            info!("PubSub requested a reconnect");
                            return SessionEnd::Reconnect;
                        }
                        Ok(ServerMessage::Response { error: Some(error), .. }) => {
                            PushEvent::Error(format!("LISTEN {} rejected: {error}", self.topic))
                        }
                        Ok(other) => {
                            trace!("Ignoring PubSub frame {:?}", other);
                            continue;
                        }
                        Err(e) => {
                            warn!("Failed to decode PubSub frame: {}", e);
                            continue;
                        }
                    };

                    if !emit(tx, event).await {
                        return SessionEnd::ReceiverDropped;
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Forward `event`; `false` once nobody is listening.
async fn emit(tx: &mpsc::Sender<PushEvent>, event: PushEvent) -> bool {
    tx.send(event).await.is_ok()
}
