use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::packet::{Opcode, Packet};
use crate::MAGIC_BYTE;

/// The outcome of decoding one frame from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A fully decoded application packet.
    Packet(Packet),
    /// The peer closed the connection cleanly before any header byte
    /// arrived. Not an error: the caller should tear the connection down
    /// without logging it as a failure.
    PeerClosed,
}

/// Encodes `packet` as `[magic][opcode][length:u32 be][payload]` and writes
/// the whole frame to `writer` in a single write.
pub async fn encode<W: AsyncWrite + Unpin>(
    packet: &Packet,
    writer: &mut W,
) -> Result<(), ProtocolError> {
    let payload = packet.encode_payload();
    if payload.len() > crate::MAX_PAYLOAD {
        return Err(ProtocolError::MaxPayload(payload.len()));
    }

    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.push(MAGIC_BYTE);
    frame.push(packet.opcode() as u8);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);

    writer.write_all(&frame).await?;
    Ok(())
}

/// Reads one frame from `reader` and decodes it into a [`Packet`].
///
/// The 6-byte header is read with a manual fill loop rather than a single
/// `read_exact` so that a clean end-of-stream before any byte arrives can be
/// told apart from a short/partial header: the former is [`Decoded::PeerClosed`],
/// the latter is an I/O error.
pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Decoded, ProtocolError> {
    let mut header = [0u8; 6];
    let mut filled = 0usize;
    loop {
        if filled == header.len() {
            break;
        }
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(Decoded::PeerClosed);
            }
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-header",
            )));
        }
        filled += n;
    }

    if header[0] != MAGIC_BYTE {
        return Err(ProtocolError::UnknownMagic(header[0]));
    }
    let opcode_byte = header[1];
    let length = u32::from_be_bytes(header[2..6].try_into().unwrap()) as usize;
    if length > crate::MAX_PAYLOAD {
        return Err(ProtocolError::MaxPayload(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    let opcode = Opcode::try_from(opcode_byte)?;
    let packet = Packet::decode_payload(opcode, &payload)?;
    Ok(Decoded::Packet(packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn roundtrip(packet: Packet) -> Packet {
        let mut buf = Vec::new();
        encode(&packet, &mut buf).await.unwrap();
        let mut cursor = Cursor::new(buf);
        match decode(&mut cursor).await.unwrap() {
            Decoded::Packet(p) => p,
            Decoded::PeerClosed => panic!("unexpected peer-closed sentinel"),
        }
    }

    #[tokio::test]
    async fn round_trips_every_variant() {
        let connect = Packet::Connect {
            connection_id: 0xDEADBEEF,
        };
        assert_eq!(roundtrip(connect.clone()).await, connect);

        let disconnect = Packet::Disconnect { connection_id: 7 };
        assert_eq!(roundtrip(disconnect.clone()).await, disconnect);

        let send = Packet::SendMessage {
            connection_id: 1,
            content: "hi".to_string(),
        };
        assert_eq!(roundtrip(send.clone()).await, send);

        let response = Packet::ResponseMessage {
            connection_id: 1,
            content: "hi".to_string(),
        };
        assert_eq!(roundtrip(response.clone()).await, response);

        assert_eq!(roundtrip(Packet::Ping).await, Packet::Ping);
        assert_eq!(roundtrip(Packet::Pong).await, Packet::Pong);
    }

    #[tokio::test]
    async fn send_message_matches_the_pinned_byte_layout() {
        let packet = Packet::SendMessage {
            connection_id: 1,
            content: "hi".to_string(),
        };
        let mut buf = Vec::new();
        encode(&packet, &mut buf).await.unwrap();
        assert_eq!(
            buf,
            vec![0x89, 0x02, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, b'h', b'i']
        );
    }

    #[tokio::test]
    async fn connect_matches_the_pinned_byte_layout() {
        let packet = Packet::Connect {
            connection_id: 0xDEADBEEF,
        };
        let mut buf = Vec::new();
        encode(&packet, &mut buf).await.unwrap();
        assert_eq!(buf, vec![0x89, 0x03, 0x00, 0x00, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[tokio::test]
    async fn ping_matches_the_pinned_byte_layout() {
        let mut buf = Vec::new();
        encode(&Packet::Ping, &mut buf).await.unwrap();
        assert_eq!(buf, vec![0x89, 0x05, 0x00, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn rejects_unknown_magic() {
        let mut cursor = Cursor::new(vec![0x00, 0x02, 0, 0, 0, 0]);
        let err = decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMagic(0x00)));
    }

    #[tokio::test]
    async fn rejects_oversize_length_before_allocating_payload() {
        let mut header = vec![0x89, 0x02];
        header.extend_from_slice(&1025u32.to_be_bytes());
        let mut cursor = Cursor::new(header);
        let err = decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MaxPayload(1025)));
    }

    #[tokio::test]
    async fn rejects_send_message_with_no_room_for_id() {
        let mut header = vec![0x89, 0x02];
        header.extend_from_slice(&3u32.to_be_bytes());
        header.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(header);
        let err = decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayloadSize { .. }));
    }

    #[tokio::test]
    async fn accepts_content_at_exactly_512_bytes_and_rejects_513() {
        let ok = Packet::SendMessage {
            connection_id: 1,
            content: "a".repeat(512),
        };
        assert_eq!(roundtrip(ok.clone()).await, ok);

        let mut header = vec![0x89, 0x02];
        let len = 4 + 513u32;
        header.extend_from_slice(&len.to_be_bytes());
        header.extend_from_slice(&1u32.to_be_bytes());
        header.extend_from_slice(&b"a".repeat(513));
        let mut cursor = Cursor::new(header);
        let err = decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidContentLength(513)));
    }

    #[tokio::test]
    async fn peer_closed_before_any_header_byte_is_not_an_error() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert_eq!(decode(&mut cursor).await.unwrap(), Decoded::PeerClosed);
    }

    #[tokio::test]
    async fn short_header_is_an_io_error() {
        let mut cursor = Cursor::new(vec![0x89, 0x02, 0x00]);
        let err = decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
