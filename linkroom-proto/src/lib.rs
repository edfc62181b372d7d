//! Shared protocol definitions for the linkroom realtime relay.

pub mod codec;
pub mod event;
pub mod message;
pub mod room;
