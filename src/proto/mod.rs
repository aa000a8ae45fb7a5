//! Shared wire protocol: chat records and the framed transport.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod codec;
pub mod frame;

pub use codec::{ChatCommand, ChatMessage, CodecError};
pub use frame::{FrameError, FrameReader, FrameWriter, MAX_CHUNK};

/// Seconds since the Unix epoch on the sender's clock.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
