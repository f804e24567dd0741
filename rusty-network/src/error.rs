//! Error types for the wire codec and peer connection.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected end of buffer while decoding")]
    UnexpectedEof,

    #[error("{what} has {len} entries, exceeding the limit of {max}")]
    OversizedField {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("trailing bytes after parsing a standalone message")]
    TrailingBytes,

    #[error("invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("payload length {len} exceeds the {max}-byte cap")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("connection timed out")]
    Timeout,

    #[error("peer disconnected: {0}")]
    Disconnected(String),

    #[error("peer is misbehaving: {0}")]
    Misbehaving(String),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
