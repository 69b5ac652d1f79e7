//! Transport implementations for wsfeed streams.
//!
//! Provides:
//! - WebSocket transport (feature: websocket)
//! - `serve_ws` shortcut for streaming straight from a WebSocket endpoint

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

#[cfg(feature = "websocket")]
use wsfeed_core::{ErrorHandler, MessageHandler, StreamConfig, StreamError, StreamHandle};

/// Connect to `config.endpoint` over WebSocket and start streaming.
///
/// # Errors
/// Returns error if the configuration is invalid or the handshake fails.
#[cfg(feature = "websocket")]
pub async fn serve_ws<M, E>(
    config: &StreamConfig,
    on_message: M,
    on_error: E,
) -> Result<StreamHandle, StreamError>
where
    M: MessageHandler,
    E: ErrorHandler,
{
    wsfeed_core::serve(&WebSocketTransport::new(), config, on_message, on_error).await
}
