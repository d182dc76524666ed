use thiserror::Error;

use crate::gcp::{BackendError, ConvertError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("couldn't connect to logging backend: {0}")]
    Connection(#[source] BackendError),
    #[error("logging backend failed: {0}")]
    Backend(#[from] BackendError),
    #[error("couldn't convert log entry: {0}")]
    Conversion(#[from] ConvertError),
    /// Clean end of a tail stream, never returned to callers
    #[error("stream ended")]
    StreamEnded,
    #[error("cancelled")]
    Cancelled,
}
pub type Result<T> = std::result::Result<T, Error>;
