//! Error types for DDP capture.
//!
//! Two families live here:
//!
//! - [`DecodeError`]: a single datagram could not be decoded. These are
//!   tolerated; the datagram is dropped and the receive loop carries on.
//! - [`CaptureError`]: the session cannot continue (socket, output file,
//!   or an unrepresentable string layout). These propagate to the caller.
//!
//! [`RecordingError`] covers reading capture files back.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for capture operations.
pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Reasons a datagram is not a usable DDP packet.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short ({len} bytes, need at least 10)")]
    TooShort { len: usize },

    #[error("packet claims timecode but is too short ({len} bytes, need at least 14)")]
    TruncatedTimecode { len: usize },

    #[error("expected payload length {expected} but got {available}")]
    PayloadLengthMismatch { expected: usize, available: usize },
}

/// Fatal errors that end a capture session.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("failed to bind UDP listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("output file error: {path}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to receive datagram")]
    Receive(#[source] io::Error),

    #[error("widest string has {max_pixels} pixels, more than the 2-byte header can hold")]
    LayoutTooWide { max_pixels: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while reading a capture file.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("capture file is missing its 2-byte header")]
    MissingHeader,

    #[error("truncated frame record: expected {expected} bytes, got {actual}")]
    TruncatedRecord { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    pub(crate) fn output(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }
}
