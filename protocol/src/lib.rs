//! Binary wire protocol shared between the WebSocket gateway and the TCP
//! engine.
//!
//! Every frame on the wire is a 6-byte header followed by a payload:
//!
//! ```text
//! +-------+--------+-----------------+------------+
//! | magic | opcode | length (u32 be) | payload... |
//! +-------+--------+-----------------+------------+
//! ```
//!
//! `magic` is always [`MAGIC_BYTE`]; `length` is the payload's byte count and
//! must not exceed [`MAX_PAYLOAD`]. [`Opcode`] is the pinned, authoritative
//! mapping from wire byte to packet kind.

mod error;
mod frame;
mod packet;

pub use error::ProtocolError;
pub use frame::{decode, encode, Decoded};
pub use packet::{Opcode, Packet};

/// Protocol identifier expected as the first byte of every frame.
pub const MAGIC_BYTE: u8 = 0x89;

/// Maximum payload size, in bytes, a single frame may carry.
pub const MAX_PAYLOAD: usize = 1024;

/// Maximum UTF-8 byte length of a chat message's content.
pub const MAX_CONTENT_LEN: usize = 512;
