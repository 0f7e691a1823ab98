//! # Voice Module
//!
//! Voice handshake assembly.
//!
//! The gateway delivers the voice session id and the voice server
//! (token + endpoint) as two separate events, in either order. An
//! [`EventWaiter`] collects both halves for one connection attempt and sends
//! a single `voiceUpdate` to its node as soon as the triple is complete.

pub mod waiter;

pub use waiter::EventWaiter;

/// Session id, token and endpoint of a completed handshake.
///
/// The player keeps the last one it sent so it can be replayed on another
/// node after a failover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceHandshake {
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
}
