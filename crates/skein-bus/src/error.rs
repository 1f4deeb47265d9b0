use std::time::Duration;

use crate::socket::SocketKind;

/// Errors reported by bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no peer is connected to {0}")]
    NoPeer(String),

    #[error("no server advertises service {0}")]
    NoService(String),

    #[error("service {0} already has a server")]
    ServiceTaken(String),

    #[error("{0} is not initialized")]
    NotInitialized(String),

    #[error("{0} is already initialized")]
    AlreadyInitialized(String),

    #[error("{op} is not supported by a {kind}")]
    Unsupported { kind: SocketKind, op: &'static str },

    #[error("no request is pending on {0}")]
    NoRequestPending(String),

    #[error("unsupported compression algorithm: {0}")]
    UnsupportedCompression(String),

    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("{0} was disconnected")]
    Disconnected(String),

    #[error("service {0} dropped the request without replying")]
    NoReply(String),

    #[error("failed to start node runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

pub type BusResult<T> = Result<T, BusError>;
