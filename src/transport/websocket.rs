use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace};
use url::Url;

use super::{Connection, Connector, TransportError, TransportEvent};

/// Dials the demo terminal service over a WebSocket.
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        debug!(%url, "opening websocket");
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Handshake(err.to_string()))?;
        Ok(Box::new(WebSocketConnection::new(stream)))
    }
}

/// One live WebSocket. Outgoing frames funnel through a writer task so
/// callers never hold the sink across an await; incoming frames arrive
/// on a channel in wire order.
struct WebSocketConnection {
    outgoing: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, events) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text),
                    Ok(Message::Binary(bytes)) => {
                        TransportEvent::Frame(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(Message::Close(frame)) => TransportEvent::Closed {
                        reason: frame.map(|f| f.reason.to_string()),
                    },
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                        trace!("ignoring websocket control frame");
                        continue;
                    }
                    Err(err) => TransportEvent::Closed {
                        reason: Some(err.to_string()),
                    },
                };
                let done = matches!(event, TransportEvent::Closed { .. });
                if event_tx.send(event).is_err() || done {
                    break;
                }
            }
        });

        Self {
            outgoing,
            events,
            writer,
            reader,
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}
