//! WebSocket transport for the collaboration server.
//!
//! [`server`] owns the axum listener and per-socket plumbing; [`dispatch`]
//! maps parsed client requests onto the session layer and service broker and
//! is independent of any socket.

pub mod dispatch;
pub mod server;

pub use dispatch::dispatch;
pub use server::{TransportConfig, TransportServer};
