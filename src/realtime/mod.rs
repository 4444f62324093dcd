//! Live attendance: the broadcast hub and the WebSocket sessions feeding it.

pub mod hub;
pub mod protocol;
pub mod session;
