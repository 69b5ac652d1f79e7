//! In-memory transport.
//!
//! Useful for tests and offline consumers. A [`MemoryTransport`] hands out a
//! single connection whose remote side is driven through a [`MemoryPeer`].

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::traits::{Connection, ControlFrame, PongCallback, Transport, TransportError};

enum Inbound {
    Message(Bytes),
    Pong,
    Error(TransportError),
}

struct Shared {
    tx: mpsc::UnboundedSender<Inbound>,
    closed: watch::Sender<bool>,
    auto_pong: AtomicBool,
    fail_pings: AtomicBool,
    pings: AtomicUsize,
    close_calls: AtomicUsize,
    released: AtomicBool,
}

/// Transport that yields one scripted connection.
pub struct MemoryTransport {
    pending: Mutex<Option<MemoryConnection>>,
    refusal: Option<String>,
    opened: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Create a transport and the peer driving its connection.
    #[must_use]
    pub fn new() -> (Self, MemoryPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            tx,
            closed,
            auto_pong: AtomicBool::new(false),
            fail_pings: AtomicBool::new(false),
            pings: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        });

        let conn = MemoryConnection {
            inbound: tokio::sync::Mutex::new(rx),
            on_pong: RwLock::new(None),
            shared: Arc::clone(&shared),
        };

        let transport = Self {
            pending: Mutex::new(Some(conn)),
            refusal: None,
            opened: Mutex::new(Vec::new()),
        };
        (transport, MemoryPeer { shared })
    }

    /// Create a transport whose handshake always fails with `reason`.
    #[must_use]
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            pending: Mutex::new(None),
            refusal: Some(reason.into()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Endpoints passed to `open`, in call order.
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn open(&self, endpoint: &str) -> Result<MemoryConnection, TransportError> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(endpoint.to_string());

        if let Some(reason) = &self.refusal {
            return Err(TransportError::Handshake(format!("{endpoint}: {reason}")));
        }

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TransportError::Handshake(format!("{endpoint}: already connected")))
    }
}

/// Connection produced by [`MemoryTransport`].
pub struct MemoryConnection {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    on_pong: RwLock<Option<PongCallback>>,
    shared: Arc<Shared>,
}

impl MemoryConnection {
    fn notify_pong(&self) {
        let guard = self.on_pong.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = guard.as_ref() {
            callback();
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn receive(&self) -> Result<Bytes, TransportError> {
        let mut inbound = self.inbound.lock().await;
        let mut closed = self.shared.closed.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => return Err(TransportError::Closed),
                frame = inbound.recv() => match frame {
                    Some(Inbound::Message(message)) => return Ok(message),
                    Some(Inbound::Error(e)) => return Err(e),
                    Some(Inbound::Pong) => self.notify_pong(),
                    // `shared` holds a sender, so the channel never drains closed.
                    None => return Err(TransportError::Closed),
                },
            }
        }
    }

    async fn send_control(
        &self,
        frame: ControlFrame,
        _payload: Bytes,
        _deadline: Duration,
    ) -> Result<(), TransportError> {
        if *self.shared.closed.borrow() {
            return Err(TransportError::Closed);
        }
        if frame == ControlFrame::Ping {
            if self.shared.fail_pings.load(Ordering::SeqCst) {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
            }
            self.shared.pings.fetch_add(1, Ordering::SeqCst);
            if self.shared.auto_pong.load(Ordering::SeqCst) {
                let _ = self.shared.tx.send(Inbound::Pong);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.closed.send_replace(true);
        Ok(())
    }

    fn on_pong(&self, callback: PongCallback) {
        *self.on_pong.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

/// Remote side of a [`MemoryConnection`].
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

impl MemoryPeer {
    /// Deliver a data message.
    pub fn send(&self, message: impl Into<Bytes>) {
        let _ = self.shared.tx.send(Inbound::Message(message.into()));
    }

    /// Make the next receive fail with `error`.
    pub fn fail(&self, error: TransportError) {
        let _ = self.shared.tx.send(Inbound::Error(error));
    }

    /// Emulate the peer sending a close frame.
    pub fn hang_up(&self, code: u16, reason: impl Into<String>) {
        self.fail(TransportError::ClosedByPeer {
            code,
            reason: reason.into(),
        });
    }

    /// Deliver an unsolicited pong.
    pub fn pong(&self) {
        let _ = self.shared.tx.send(Inbound::Pong);
    }

    /// Answer every ping with a pong.
    pub fn set_auto_pong(&self, enabled: bool) {
        self.shared.auto_pong.store(enabled, Ordering::SeqCst);
    }

    /// Make ping sends fail.
    pub fn fail_pings(&self, enabled: bool) {
        self.shared.fail_pings.store(enabled, Ordering::SeqCst);
    }

    /// Pings sent by the local side so far.
    #[must_use]
    pub fn pings_received(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// Number of `close` calls made by the local side.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the local side has closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Whether the local side has dropped its connection.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Wait until the local side closes the connection.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
