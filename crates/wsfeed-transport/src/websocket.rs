//! WebSocket transport over `tokio-tungstenite`.

use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, watch},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use wsfeed_core::traits::{
    CLOSE_NO_STATUS, Connection, ControlFrame, PongCallback, Transport, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long a local close waits to hand the close frame to the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket transport.
///
/// `ws://` and `wss://` endpoints are both supported; TLS uses rustls with
/// the bundled web PKI roots.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new() -> Self {
        // Fails only if a provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn open(&self, endpoint: &str) -> Result<WebSocketConnection, TransportError> {
        let (stream, response) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(WebSocketConnection::new(stream))
    }
}

/// Open WebSocket connection.
///
/// Reads and writes go through separate halves so the heartbeat can ping
/// while the read loop is parked in `receive`.
pub struct WebSocketConnection {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
    closed: watch::Sender<bool>,
    on_pong: RwLock<Option<PongCallback>>,
}

impl WebSocketConnection {
    fn new(stream: WsStream) -> Self {
        let (sink, source) = stream.split();
        let (closed, _) = watch::channel(false);
        Self {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            closed,
            on_pong: RwLock::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn notify_pong(&self) {
        let guard = self.on_pong.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = guard.as_ref() {
            callback();
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn receive(&self) -> Result<Bytes, TransportError> {
        let mut source = self.source.lock().await;
        let mut closed = self.closed.subscribe();

        loop {
            let frame = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => return Err(TransportError::Closed),
                frame = source.next() => frame,
            };

            match frame {
                None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(map_error(e)),
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    return Ok(message.into_data());
                }
                Some(Ok(Message::Pong(_))) => self.notify_pong(),
                // Pings are answered by tungstenite on the next read or write.
                Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (CLOSE_NO_STATUS, String::new()),
                        |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                    );
                    return Err(TransportError::ClosedByPeer { code, reason });
                }
            }
        }
    }

    async fn send_control(
        &self,
        frame: ControlFrame,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let message = match frame {
            ControlFrame::Ping => Message::Ping(payload),
            ControlFrame::Pong => Message::Pong(payload),
        };

        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        };
        match tokio::time::timeout(deadline, send).await {
            Ok(result) => result.map_err(map_error),
            Err(_) => Err(TransportError::SendTimeout(deadline)),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }

        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_GRACE, close).await {
            Ok(Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(()),
            Ok(Err(e)) => Err(map_error(e)),
            Err(_) => {
                tracing::debug!("Close frame not flushed in time, dropping socket");
                Ok(())
            }
        }
    }

    fn on_pong(&self, callback: PongCallback) {
        *self.on_pong.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

fn map_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        WsError::Io(e) => TransportError::Io(e),
        WsError::Protocol(e) => TransportError::Protocol(e.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio_tungstenite::tungstenite::error::ProtocolError;

    use super::*;

    #[test]
    fn test_map_error() {
        assert!(matches!(
            map_error(WsError::ConnectionClosed),
            TransportError::Closed
        ));
        assert!(matches!(
            map_error(WsError::AlreadyClosed),
            TransportError::Closed
        ));
        assert!(matches!(
            map_error(WsError::Io(io::Error::from(io::ErrorKind::ConnectionReset))),
            TransportError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset
        ));
        assert!(matches!(
            map_error(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
            TransportError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn test_handshake_failure() {
        let transport = WebSocketTransport::new();
        // Nothing listens on port 9 of the loopback interface.
        let result = transport.open("ws://127.0.0.1:9/ws").await;
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }
}
