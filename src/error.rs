use thiserror::Error;

use crate::client::ClientError;
use crate::proto::{CodecError, FrameError};
use crate::server::ServerError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
