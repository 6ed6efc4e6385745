//! Error types for wire decoding.

use thiserror::Error;

/// Errors surfaced while decoding a multipart message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The parts do not follow the framing conventions.
    ///
    /// This usually means something that does not speak the DagBox protocol
    /// connected to one of our sockets.
    #[error("malformed message: {reason}")]
    Malformed { reason: &'static str },
    /// Valid framing, but the peer speaks a protocol version we do not.
    #[error("unsupported protocol version 0x{found:02x}")]
    UnsupportedVersion { found: u8 },
}

impl WireError {
    pub(crate) fn malformed(reason: &'static str) -> Self {
        Self::Malformed { reason }
    }
}
