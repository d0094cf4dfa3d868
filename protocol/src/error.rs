use std::io;

use crate::MAX_PAYLOAD;

/// Errors produced while encoding or decoding a [`crate::Frame`].
///
/// These are structured, never panics: a malformed frame on the wire is an
/// expected occurrence (a misbehaving peer, a protocol mismatch) and must be
/// reported to the caller rather than crash the connection's task.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown magic byte: {0:#04x}")]
    UnknownMagic(u8),

    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD} byte maximum")]
    MaxPayload(usize),

    #[error("unknown packet opcode: {0}")]
    UnknownPacketType(u8),

    #[error("invalid payload size for opcode {opcode}: {size} bytes")]
    InvalidPayloadSize { opcode: u8, size: usize },

    #[error("connection id must be nonzero")]
    InvalidConnectionId,

    #[error("message content must be 1..=512 bytes")]
    InvalidContentLength(usize),

    #[error("payload is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
