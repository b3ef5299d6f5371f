//! HTTP and WebSocket surface for the media hub.
//!
//! - [`server`]: high-level Axum server wrapper (routes, lifecycle, graceful
//!   shutdown on Ctrl+C).
//! - [`ws`]: WebSocket push channel with lazy upstream subscription and
//!   per-viewer bounded queues.
//! - [`logs`]: tracing subscriber setup.

pub mod logs;
pub mod server;
pub mod ws;

pub use logs::{init_logging, LoggingOptions};
pub use server::{Server, ServerBuilder, ServerInfo};
pub use ws::{ws_handler, Broadcaster};
