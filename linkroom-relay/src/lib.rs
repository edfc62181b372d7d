//! linkroom relay server library.
//!
//! Exposes the relay for use in tests and embedding. The relay accepts
//! WebSocket connections, tracks which rooms each connection has joined,
//! persists every message before fanning it out to live room members, and
//! serves room history and group management over REST.

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod http;
pub mod media;
pub mod presence;
pub mod rooms;
pub mod session;
pub mod sink;
pub mod state;
pub mod store;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;
