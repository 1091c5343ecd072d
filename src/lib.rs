//! Device-side telemetry and control agent: maintains a TLS WebSocket
//! session with a listener service, reports periodic telemetry, executes
//! dispatched commands, and reconnects with backoff on failure.

pub mod collectors;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod messages;
pub mod session;
pub mod stream;
pub mod tls;

pub use error::{Error, Result};
