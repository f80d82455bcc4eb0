//! Transport layer for the training playground.
//!
//! Provides:
//! - Wire protocol (JSON, internally tagged)
//! - WebSocket progress feed (feature: websocket)
//! - HTTP API router (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod http;
#[cfg(feature = "websocket")]
pub mod state;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};

#[cfg(feature = "websocket")]
pub use http::{ApiError, router};
#[cfg(feature = "websocket")]
pub use state::AppState;
