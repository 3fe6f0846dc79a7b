//! WebSocket connection supervisor.
//!
//! One background task owns the socket for its whole life: it connects,
//! pumps frames in both directions, and on any drop waits out a backoff
//! delay before connecting again. Each successful connect starts a new
//! **generation**; inbound messages carry the generation they arrived on and
//! the status watch reports `(state, generation)`, so consumers can tell
//! whether a request's connection is still the live one.
//!
//! Outbound policy: [`ReliableChannel::send`] never blocks. Every message is
//! addressed to a generation. While that generation is not the live
//! connection, or when the bounded queue is full, the message is dropped and
//! an error returned. Frames still queued when a connection ends are
//! discarded before the next connection starts, so a new connection never
//! carries responses addressed to an old one.
//!
//! Liveness: a ping goes out every `keepalive` interval. A connection on
//! which nothing at all (data, ping, or pong) has arrived for two intervals
//! is dropped and reconnected.

use std::sync::Arc;
use std::time::Duration;

use droidclaw_types::{AgentConfig, InboundMessage, OutboundMessage, ProtocolError, ReconnectConfig};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_rustls::rustls::ClientConfig;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backoff::Backoff;
use crate::{tls, ChannelError, OutboundSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on a single connect handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive intervals without any inbound frame before a connection is
/// considered dead.
const MISSED_KEEPALIVES: u32 = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Published connection status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Generation of the most recent successful connection (0 before the first).
    pub generation: u64,
}

impl ChannelStatus {
    /// Whether connection `generation` is the one currently live.
    pub fn is_live(&self, generation: u64) -> bool {
        self.state == ConnectionState::Connected && self.generation == generation
    }
}

/// One decoded inbound message and the connection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub generation: u64,
    pub message: InboundMessage,
}

/// Resolved connection settings.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub url: Url,
    pub token: Option<String>,
    pub keepalive: Duration,
    pub outbound_capacity: usize,
    pub reconnect: ReconnectConfig,
    /// TLS client config for `wss://`; `None` uses the web PKI defaults.
    pub tls: Option<Arc<ClientConfig>>,
}

impl ChannelSettings {
    /// Settings from the agent configuration, reading the bearer token from
    /// the environment.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ChannelError> {
        let url = Url::parse(&config.server.url).map_err(|e| ChannelError::InvalidUrl {
            url: config.server.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl {
                url: config.server.url.clone(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }
        let tls = match url.scheme() {
            "wss" => Some(tls::client_config(config.server.ca_cert.as_deref())?),
            _ => None,
        };
        Ok(Self {
            url,
            token: config.server.token(),
            keepalive: config.server.keepalive(),
            outbound_capacity: config.server.outbound_capacity.max(1),
            reconnect: config.reconnect.clone(),
            tls,
        })
    }
}

// ---------------------------------------------------------------------------
// ReliableChannel
// ---------------------------------------------------------------------------

/// Handle to the connection supervisor. Cheap to clone.
///
/// Dropping every handle shuts the supervisor down.
#[derive(Debug, Clone)]
pub struct ReliableChannel {
    outbound_tx: mpsc::Sender<Outbound>,
    status_rx: watch::Receiver<ChannelStatus>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ReliableChannel {
    /// Start the supervisor. Returns the handle, the inbound message queue,
    /// and the supervisor task.
    pub fn spawn(
        settings: ChannelSettings,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<InboundEnvelope>,
        JoinHandle<()>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            settings,
            outbound_rx,
            inbound_tx,
            status_tx,
            shutdown_rx,
        };
        let handle = tokio::spawn(supervisor.run());

        let channel = Self {
            outbound_tx,
            status_rx,
            shutdown_tx: Arc::new(shutdown_tx),
        };
        (channel, inbound_rx, handle)
    }

    /// Queue `message` for connection `generation`, which must be the live
    /// one.
    pub fn send(&self, generation: u64, message: OutboundMessage) -> Result<(), ChannelError> {
        if !self.status_rx.borrow().is_live(generation) {
            debug!(
                generation,
                request_id = message.request_id().unwrap_or(""),
                "dropping outbound message, connection not live"
            );
            return Err(ChannelError::NotConnected);
        }
        self.outbound_tx
            .try_send(Outbound {
                generation,
                message,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(outbound) => {
                    warn!(
                        generation,
                        request_id = outbound.message.request_id().unwrap_or(""),
                        "dropping outbound message, queue full"
                    );
                    ChannelError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => ChannelError::Shutdown,
            })
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    /// Stop reconnecting and close the live socket, if any.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl OutboundSink for ReliableChannel {
    fn send(&self, generation: u64, message: OutboundMessage) -> Result<(), ChannelError> {
        ReliableChannel::send(self, generation, message)
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// A queued message and the connection it is addressed to.
#[derive(Debug)]
struct Outbound {
    generation: u64,
    message: OutboundMessage,
}

enum ConnectionEnd {
    Dropped(String),
    Shutdown,
}

struct Supervisor {
    settings: ChannelSettings,
    outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: mpsc::UnboundedSender<InboundEnvelope>,
    status_tx: watch::Sender<ChannelStatus>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut backoff = Backoff::new(&self.settings.reconnect);
        let mut generation = 0u64;
        let url = self.settings.url.to_string();

        info!(url = %url, "control channel started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.publish(ConnectionState::Connecting, generation);

            let connected = tokio::select! {
                result = connect(&self.settings) => result,
                _ = self.shutdown_rx.changed() => break,
            };

            match connected {
                Ok(ws) => {
                    generation += 1;
                    backoff.reset();
                    self.discard_stale();
                    self.publish(ConnectionState::Connected, generation);
                    info!(url = %url, generation, "control channel connected");

                    let end = self.pump(ws, generation).await;
                    self.publish(ConnectionState::Disconnected, generation);
                    match end {
                        ConnectionEnd::Shutdown => break,
                        ConnectionEnd::Dropped(reason) => {
                            warn!(generation, reason = %reason, "control channel dropped");
                        }
                    }
                }
                Err(e) => {
                    self.publish(ConnectionState::Disconnected, generation);
                    warn!(error = %e, attempt = backoff.attempt(), "connect failed");
                }
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.publish(ConnectionState::Disconnected, generation);
        info!("control channel stopped");
    }

    fn publish(&self, state: ConnectionState, generation: u64) {
        self.status_tx.send_replace(ChannelStatus { state, generation });
    }

    /// Drop frames queued for a connection that no longer exists.
    fn discard_stale(&mut self) {
        let mut dropped = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded outbound frames from previous connection");
        }
    }

    /// Move frames until the connection ends.
    async fn pump(&mut self, ws: WsStream, generation: u64) -> ConnectionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut keepalive = tokio::time::interval(self.settings.keepalive);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        keepalive.tick().await;
        let silence_limit = self.settings.keepalive * MISSED_KEEPALIVES;
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                frame = stream.next() => {
                    if matches!(frame, Some(Ok(_))) {
                        last_inbound = Instant::now();
                    }
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text.to_string(),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                debug!("dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            return ConnectionEnd::Dropped(format!("closed by server: {frame:?}"));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return ConnectionEnd::Dropped(e.to_string()),
                        None => return ConnectionEnd::Dropped("stream ended".into()),
                    };
                    if !self.deliver(&text, generation) {
                        return ConnectionEnd::Shutdown;
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(Outbound { generation: addressed, message }) = outbound else {
                        return ConnectionEnd::Shutdown;
                    };
                    if addressed != generation {
                        debug!(
                            generation,
                            addressed,
                            request_id = message.request_id().unwrap_or(""),
                            "discarding frame addressed to another connection"
                        );
                        continue;
                    }
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(
                                request_id = message.request_id().unwrap_or(""),
                                error = %e,
                                "failed to encode outbound message"
                            );
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return ConnectionEnd::Dropped(e.to_string());
                    }
                }
                _ = keepalive.tick() => {
                    if last_inbound.elapsed() >= silence_limit {
                        return ConnectionEnd::Dropped(format!(
                            "keepalive timeout: nothing received for {}ms",
                            last_inbound.elapsed().as_millis()
                        ));
                    }
                    if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                        return ConnectionEnd::Dropped(e.to_string());
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return ConnectionEnd::Shutdown;
                }
            }
        }
    }

    /// Decode and forward one frame. Returns `false` once nobody consumes
    /// inbound messages any more.
    fn deliver(&self, text: &str, generation: u64) -> bool {
        let message = match InboundMessage::decode(text) {
            Ok(message) => message,
            Err(e @ ProtocolError::MissingRequestId { .. }) => {
                error!(generation, error = %e, "dropping inbound message");
                return true;
            }
            Err(e) => {
                warn!(generation, error = %e, "dropping undecodable inbound frame");
                return true;
            }
        };
        debug!(generation, kind = message.kind(), "inbound message");
        self.inbound_tx
            .send(InboundEnvelope {
                generation,
                message,
            })
            .is_ok()
    }
}

async fn connect(settings: &ChannelSettings) -> Result<WsStream, ChannelError> {
    let url = settings.url.to_string();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ChannelError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    if let Some(token) = &settings.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
            ChannelError::Connect {
                url: url.clone(),
                reason: format!("invalid bearer token: {e}"),
            }
        })?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let connector = settings.tls.clone().map(Connector::Rustls);
    let handshake = tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
    let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, handshake)
        .await
        .map_err(|_| ChannelError::Connect {
            url: url.clone(),
            reason: format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()),
        })?
        .map_err(|e| ChannelError::Connect {
            url,
            reason: e.to_string(),
        })?;
    Ok(ws)
}
