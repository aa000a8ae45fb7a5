#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod proto;
pub mod server;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::proto::{ChatCommand, ChatMessage, CodecError, FrameError, FrameReader, FrameWriter};
