use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No live proxy handle; the request is dropped.
    #[error("transport unavailable")]
    TransportUnavailable,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("capability query failed: {0}")]
    CapabilityQuery(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(String),
}
