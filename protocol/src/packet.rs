use crate::error::ProtocolError;
use crate::MAX_CONTENT_LEN;

/// The pinned opcode table. The distilled source never fixed these to
/// specific integers; this table is now the single authoritative mapping and
/// nothing else in the crate is allowed to hardcode a different one.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    ResponseMessage = 1,
    SendMessage = 2,
    Connect = 3,
    Disconnect = 4,
    Ping = 5,
    Pong = 6,
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::ResponseMessage),
            2 => Ok(Opcode::SendMessage),
            3 => Ok(Opcode::Connect),
            4 => Ok(Opcode::Disconnect),
            5 => Ok(Opcode::Ping),
            6 => Ok(Opcode::Pong),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// A decoded application-level packet, tagged by [`Opcode`].
///
/// This is a closed, tagged-variant representation rather than an open
/// packet-object hierarchy: every variant the wire can carry is named here,
/// and [`Packet::decode_payload`] is the single dispatch point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// gateway -> engine: announce a new session.
    Connect { connection_id: u32 },
    /// gateway -> engine: announce graceful teardown.
    Disconnect { connection_id: u32 },
    /// gateway -> engine: outbound chat from `connection_id`.
    SendMessage { connection_id: u32, content: String },
    /// engine -> gateway: inbound chat for `connection_id`.
    ResponseMessage { connection_id: u32, content: String },
    /// engine -> gateway: liveness probe.
    Ping,
    /// gateway -> engine: liveness reply.
    Pong,
}

impl Packet {
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::ResponseMessage { .. } => Opcode::ResponseMessage,
            Packet::SendMessage { .. } => Opcode::SendMessage,
            Packet::Connect { .. } => Opcode::Connect,
            Packet::Disconnect { .. } => Opcode::Disconnect,
            Packet::Ping => Opcode::Ping,
            Packet::Pong => Opcode::Pong,
        }
    }

    /// Serializes this packet's payload (the bytes after the 6-byte header).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Packet::Connect { connection_id } | Packet::Disconnect { connection_id } => {
                connection_id.to_be_bytes().to_vec()
            }
            Packet::SendMessage {
                connection_id,
                content,
            }
            | Packet::ResponseMessage {
                connection_id,
                content,
            } => {
                let mut buf = Vec::with_capacity(4 + content.len());
                buf.extend_from_slice(&connection_id.to_be_bytes());
                buf.extend_from_slice(content.as_bytes());
                buf
            }
            Packet::Ping | Packet::Pong => Vec::new(),
        }
    }

    /// Parses `payload` according to `opcode`'s invariants, building the
    /// matching tagged variant.
    pub fn decode_payload(opcode: Opcode, payload: &[u8]) -> Result<Packet, ProtocolError> {
        match opcode {
            Opcode::Connect => Ok(Packet::Connect {
                connection_id: decode_connection_id(opcode, payload)?,
            }),
            Opcode::Disconnect => Ok(Packet::Disconnect {
                connection_id: decode_connection_id(opcode, payload)?,
            }),
            Opcode::SendMessage => {
                let (connection_id, content) = decode_message(opcode, payload)?;
                Ok(Packet::SendMessage {
                    connection_id,
                    content,
                })
            }
            Opcode::ResponseMessage => {
                let (connection_id, content) = decode_message(opcode, payload)?;
                Ok(Packet::ResponseMessage {
                    connection_id,
                    content,
                })
            }
            Opcode::Ping => {
                expect_empty(opcode, payload)?;
                Ok(Packet::Ping)
            }
            Opcode::Pong => {
                expect_empty(opcode, payload)?;
                Ok(Packet::Pong)
            }
        }
    }
}

fn decode_connection_id(opcode: Opcode, payload: &[u8]) -> Result<u32, ProtocolError> {
    if payload.len() != 4 {
        return Err(ProtocolError::InvalidPayloadSize {
            opcode: opcode as u8,
            size: payload.len(),
        });
    }
    let id = u32::from_be_bytes(payload.try_into().unwrap());
    if id == 0 {
        return Err(ProtocolError::InvalidConnectionId);
    }
    Ok(id)
}

fn decode_message(opcode: Opcode, payload: &[u8]) -> Result<(u32, String), ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::InvalidPayloadSize {
            opcode: opcode as u8,
            size: payload.len(),
        });
    }
    let connection_id = u32::from_be_bytes(payload[..4].try_into().unwrap());
    if connection_id == 0 {
        return Err(ProtocolError::InvalidConnectionId);
    }
    let body = &payload[4..];
    if body.is_empty() || body.len() > MAX_CONTENT_LEN {
        return Err(ProtocolError::InvalidContentLength(body.len()));
    }
    let content = String::from_utf8(body.to_vec())?;
    Ok((connection_id, content))
}

fn expect_empty(opcode: Opcode, payload: &[u8]) -> Result<(), ProtocolError> {
    if !payload.is_empty() {
        return Err(ProtocolError::InvalidPayloadSize {
            opcode: opcode as u8,
            size: payload.len(),
        });
    }
    Ok(())
}
