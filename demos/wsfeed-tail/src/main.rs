//! Print every message from a WebSocket feed.
//!
//! Run with: cargo run -p wsfeed-tail -- wss://stream.binance.com:9443/ws/btcusdt@trade
//!
//! Keepalive is read from `WSFEED_KEEPALIVE` and `WSFEED_KEEPALIVE_TIMEOUT_SECS`.
//! Ctrl-C requests a cooperative stop.

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wsfeed_core::{KeepaliveConfig, StreamConfig, TransportError};
use wsfeed_transport::serve_ws;

/// How long to wait for the read loop after Ctrl-C.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .context("usage: wsfeed-tail <ws:// or wss:// endpoint>")?;
    let keepalive = KeepaliveConfig::from_env().context("reading keepalive settings")?;
    let config = StreamConfig::new(endpoint).with_keepalive_config(keepalive);

    let (err_tx, err_rx) = oneshot::channel::<TransportError>();
    let handle = serve_ws(
        &config,
        |message: Bytes| println!("{}", String::from_utf8_lossy(&message)),
        move |error: TransportError| {
            let _ = err_tx.send(error);
        },
    )
    .await
    .with_context(|| format!("connecting to {}", config.endpoint))?;

    tracing::info!(connection_id = %handle.id(), "Streaming, press Ctrl-C to stop");

    tokio::select! {
        () = handle.done() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, stopping");
            handle.stop();
            if tokio::time::timeout(STOP_GRACE, handle.done()).await.is_err() {
                tracing::warn!("Feed idle, exiting without waiting for the read loop");
                return Ok(());
            }
        }
    }

    // The error handler is dropped unused on a clean stop.
    match err_rx.await {
        Ok(error) => Err(error).context("stream terminated"),
        Err(_) => Ok(()),
    }
}
