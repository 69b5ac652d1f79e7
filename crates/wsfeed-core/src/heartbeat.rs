//! Ping/pong heartbeat for detecting half-open connections.
//!
//! The monitor pings on a fixed cadence and force-closes the connection once
//! no pong has been seen for a full timeout window. It never reports errors:
//! the forced close wakes the read loop, which reports a receive error.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::Instrument;

use crate::traits::{Connection, ControlFrame};

/// Send deadline for each ping.
pub const PING_DEADLINE: Duration = Duration::from_secs(10);

/// Last time the peer proved it was alive.
///
/// Stored as nanoseconds past a fixed origin so the pong callback and the
/// monitor can share it without a lock.
#[derive(Debug)]
pub struct LastSeen {
    origin: Instant,
    offset_nanos: AtomicU64,
}

impl Default for LastSeen {
    fn default() -> Self {
        Self::new()
    }
}

impl LastSeen {
    /// Start tracking; counts as a liveness observation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Record a liveness observation.
    pub fn touch(&self) {
        let nanos = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Time since the last observation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let seen = Duration::from_nanos(self.offset_nanos.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(seen)
    }
}

/// Install the pong callback on `conn` and spawn the monitor task.
///
/// The task keeps only a weak reference; it exits on its own once the
/// connection is dropped, a ping fails, or it has force-closed the
/// connection.
pub fn spawn<C: Connection>(conn: &Arc<C>, timeout: Duration) -> JoinHandle<()> {
    let last_seen = Arc::new(LastSeen::new());

    let observer = Arc::clone(&last_seen);
    conn.on_pong(Box::new(move || observer.touch()));

    tokio::spawn(monitor(Arc::downgrade(conn), last_seen, timeout).in_current_span())
}

async fn monitor<C: Connection>(conn: Weak<C>, last_seen: Arc<LastSeen>, timeout: Duration) {
    let mut ticker = interval_at(Instant::now() + timeout, timeout);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let Some(live) = conn.upgrade() else {
            tracing::debug!("Connection released, heartbeat exiting");
            return;
        };
        if let Err(e) = live
            .send_control(ControlFrame::Ping, Bytes::new(), PING_DEADLINE)
            .await
        {
            tracing::debug!(error = %e, "Ping failed, heartbeat exiting");
            return;
        }
        tracing::trace!("Ping sent");
        drop(live);

        ticker.tick().await;

        let silent = last_seen.elapsed();
        if silent > timeout {
            tracing::warn!(
                silent_ms = u64::try_from(silent.as_millis()).unwrap_or(u64::MAX),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "No pong within keepalive timeout, closing connection"
            );
            if let Some(live) = conn.upgrade() {
                if let Err(e) = live.close().await {
                    tracing::debug!(error = %e, "Forced close failed");
                }
            }
            return;
        }
    }
}
