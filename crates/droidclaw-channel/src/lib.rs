//! Reliable duplex control channel.
//!
//! A [`ReliableChannel`] keeps one WebSocket connection to the control server
//! alive, reconnecting with jittered exponential backoff. Inbound frames are
//! decoded into [`droidclaw_types::InboundMessage`]s and delivered in arrival
//! order; outbound messages go through a bounded queue owned by the single
//! connection task, so frames are never interleaved.

pub mod backoff;
pub mod reliable;
pub mod tls;

use std::sync::Arc;

use droidclaw_types::OutboundMessage;
use thiserror::Error;

pub use backoff::Backoff;
pub use reliable::{ChannelSettings, ChannelStatus, ConnectionState, InboundEnvelope, ReliableChannel};

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The message was dropped because its connection is not live.
    #[error("not connected")]
    NotConnected,

    /// The message was dropped because the outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,

    #[error("channel shut down")]
    Shutdown,

    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("tls setup failed: {0}")]
    Tls(String),
}

/// Where the router puts its responses.
///
/// Every message is addressed to the connection generation its request
/// arrived on. Sends never block: a message that cannot be accepted right
/// now, or whose connection is no longer live, is dropped and reported
/// through the error.
pub trait OutboundSink: Send + Sync {
    fn send(&self, generation: u64, message: OutboundMessage) -> Result<(), ChannelError>;
}

impl<T: OutboundSink + ?Sized> OutboundSink for Arc<T> {
    fn send(&self, generation: u64, message: OutboundMessage) -> Result<(), ChannelError> {
        (**self).send(generation, message)
    }
}
