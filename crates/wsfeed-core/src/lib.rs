//! Single-connection streaming client core.
//!
//! This crate provides the pieces every feed consumer needs:
//! - `serve` - Open a connection and run the read loop
//! - `StopSignal` / `DoneSignal` - Cooperative shutdown and completion
//! - Heartbeat monitor for half-open connection detection
//! - `Transport` and `Connection` traits
//! - In-memory transport (feature: memory)

pub mod config;
pub mod heartbeat;
pub mod signal;
pub mod stream;
pub mod traits;

#[cfg(feature = "memory")]
pub mod memory;

pub use config::{ConfigError, KeepaliveConfig, StreamConfig};
pub use signal::{DoneSignal, StopSignal};
pub use stream::{StreamError, StreamHandle, serve};
pub use traits::{Connection, ControlFrame, ErrorHandler, MessageHandler, Transport, TransportError};
