//! Core traits for transports and stream callbacks.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Control frame kinds a connection can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// Liveness probe; the peer is expected to answer with a pong.
    Ping,
    /// Answer to a peer's ping.
    Pong,
}

/// Close status reported when the peer sent a close frame without a code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Connection closed")]
    Closed,
    #[error("Connection closed by peer ({code}): {reason}")]
    ClosedByPeer { code: u16, reason: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Callback installed on a connection and run for every pong control frame.
pub type PongCallback = Box<dyn Fn() + Send + Sync>;

/// Trait for transports able to open message connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connection type produced by a successful handshake.
    type Connection: Connection;

    /// Perform the handshake against `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<Self::Connection, TransportError>;
}

/// Full-duplex, ordered byte-message connection.
///
/// All methods take `&self`: the read loop and the heartbeat monitor use the
/// same connection concurrently, so implementations synchronize internally.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Wait for the next data message.
    ///
    /// Control frames are consumed here and never returned. Once `close` has
    /// been called, a pending or future receive fails with
    /// [`TransportError::Closed`].
    async fn receive(&self) -> Result<Bytes, TransportError>;

    /// Send a control frame, giving up once `deadline` has elapsed.
    async fn send_control(
        &self,
        frame: ControlFrame,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;

    /// Install the callback run whenever a pong arrives, replacing any previous one.
    fn on_pong(&self, callback: PongCallback);
}

/// Receiver of data messages.
///
/// Every message is dispatched on its own task, so implementations may be
/// called concurrently and must not assume completion order.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Bytes);
}

impl<F> MessageHandler for F
where
    F: Fn(Bytes) + Send + Sync + 'static,
{
    fn handle(&self, message: Bytes) {
        self(message);
    }
}

/// Receiver of the terminal read error. Consumed by the single call it gets.
pub trait ErrorHandler: Send + 'static {
    fn handle(self, error: TransportError);
}

impl<F> ErrorHandler for F
where
    F: FnOnce(TransportError) + Send + 'static,
{
    fn handle(self, error: TransportError) {
        self(error);
    }
}
