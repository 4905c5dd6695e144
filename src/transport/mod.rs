//! Transport seam between the connection state machine and the wire.
//!
//! `Connector` dials one connection; `Connection` is the live channel.
//! The state machine only ever sees these traits, so tests drive it with
//! scripted in-memory implementations.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

mod websocket;

pub use websocket::WebSocketConnector;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("transport channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame, in arrival order. Binary frames are surfaced here
    /// too (lossy UTF-8); the wire is text on this service.
    Frame(String),
    /// The peer closed the connection.
    Closed { reason: Option<String> },
}

#[async_trait]
pub trait Connection: Send {
    /// Queue one text frame. Frames are delivered in send order.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next transport event; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<TransportEvent>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError>;
}
