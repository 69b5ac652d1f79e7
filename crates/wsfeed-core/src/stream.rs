//! Connection establishment and the read loop.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::{ConfigError, StreamConfig},
    heartbeat,
    signal::{self, DoneSignal, DoneTrigger, StopSignal},
    traits::{Connection, ErrorHandler, MessageHandler, Transport, TransportError},
};

/// Error returned when a stream cannot be established.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Owner's view of a running stream.
///
/// Dropping the handle does not stop the stream; raise the stop signal for
/// that.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    id: Uuid,
    stop: StopSignal,
    done: DoneSignal,
}

impl StreamHandle {
    /// Connection identifier used in log records.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Request cooperative shutdown.
    ///
    /// Observed before the next receive; a receive already in flight is not
    /// interrupted.
    pub fn stop(&self) {
        self.stop.raise();
    }

    /// Wait until the read loop has closed the connection and exited.
    pub async fn done(&self) {
        self.done.wait().await;
    }

    /// Non-blocking completion check.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.is_done()
    }

    /// The stop signal, for handing to other tasks.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// The done signal, for handing to other tasks.
    #[must_use]
    pub fn done_signal(&self) -> DoneSignal {
        self.done.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Stopping,
    Stopped,
}

/// Connect to `config.endpoint` and start streaming.
///
/// On success the heartbeat monitor (if enabled) and the read loop are
/// running when this returns. Every message goes to `on_message` on its own
/// task; a terminal receive error goes to `on_error`, once. Nothing is
/// spawned if the handshake fails.
///
/// # Errors
/// Returns error if the configuration is invalid or the handshake fails.
pub async fn serve<T, M, E>(
    transport: &T,
    config: &StreamConfig,
    on_message: M,
    on_error: E,
) -> Result<StreamHandle, StreamError>
where
    T: Transport,
    M: MessageHandler,
    E: ErrorHandler,
{
    config.validate()?;

    let id = Uuid::new_v4();
    let span = tracing::info_span!("stream", connection_id = %id, endpoint = %config.endpoint);

    let handshake_timeout = config.handshake_timeout();
    let conn = tokio::time::timeout(handshake_timeout, transport.open(&config.endpoint))
        .instrument(span.clone())
        .await
        .map_err(|_| TransportError::HandshakeTimeout(handshake_timeout))?
        .inspect_err(|e| tracing::warn!(parent: &span, error = %e, "Handshake failed"))?;

    tracing::info!(parent: &span, keepalive = config.keepalive.enabled, "Connected");

    let conn = Arc::new(conn);
    let monitor = config.keepalive.enabled.then(|| {
        let _entered = span.enter();
        heartbeat::spawn(&conn, config.keepalive.timeout())
    });

    let stop = StopSignal::new();
    let (trigger, done) = signal::done_pair();

    let read_loop = ReadLoop {
        conn,
        on_message: Arc::new(on_message),
        stop: stop.clone(),
        monitor,
        state: LoopState::Running,
    };
    tokio::spawn(read_loop.run(on_error, trigger).instrument(span));

    Ok(StreamHandle { id, stop, done })
}

struct ReadLoop<C, M> {
    conn: Arc<C>,
    on_message: Arc<M>,
    stop: StopSignal,
    monitor: Option<JoinHandle<()>>,
    state: LoopState,
}

impl<C, M> ReadLoop<C, M>
where
    C: Connection,
    M: MessageHandler,
{
    async fn run<E: ErrorHandler>(mut self, on_error: E, done: DoneTrigger) {
        loop {
            if self.stop.is_raised() {
                self.transition(LoopState::Stopping);
                break;
            }

            match self.conn.receive().await {
                Ok(message) => {
                    let handler = Arc::clone(&self.on_message);
                    tokio::spawn(async move { handler.handle(message) }.in_current_span());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Receive failed");
                    tokio::spawn(async move { on_error.handle(e) }.in_current_span());
                    break;
                }
            }
        }

        self.teardown().await;
        self.transition(LoopState::Stopped);
        // Release the connection before the owner is told it is gone.
        drop(self);
        done.fire();
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "Close failed");
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
            let _ = monitor.await;
        }
        tracing::info!("Connection closed");
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!(from = ?self.state, to = ?next, "Read loop state change");
        self.state = next;
    }
}
