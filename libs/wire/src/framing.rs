//! DBGP length-prefixed packet framing.
//!
//! A packet on the wire is the ASCII decimal byte length of the payload, a
//! NUL, the payload itself, and a trailing NUL:
//!
//! ```text
//! <decimal-length> 0x00 <payload bytes> 0x00
//! ```
//!
//! The length counts bytes, not characters. Reads are incremental: a packet
//! may arrive spread over any number of TCP segments, or share a segment
//! with its neighbors.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::WireError;

/// Hard cap on a single packet payload.
///
/// Real init packets are a few hundred bytes; anything approaching this
/// limit is a broken or hostile peer.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedPacket {
    /// The payload bytes, exactly as declared by the length prefix.
    pub payload: Vec<u8>,
    /// A byte read in place of the trailing NUL.
    ///
    /// Some engines omit the trailing NUL entirely; when the byte after the
    /// payload is not NUL it already belongs to the next packet and must be
    /// forwarded ahead of any subsequent traffic.
    pub carry: Option<u8>,
}

/// Read one framed packet from `stream`.
///
/// Returns [`WireError::Closed`] when the stream ends cleanly before the
/// first byte, which callers generally treat as a quiet hangup rather than a
/// protocol violation. EOF in place of the trailing NUL is accepted.
pub async fn read_packet<R: AsyncRead + Unpin>(stream: &mut R) -> Result<FramedPacket, WireError> {
    let mut byte = [0u8; 1];

    // Length prefix: ASCII digits terminated by NUL.
    let mut len: usize = 0;
    let mut digits = 0usize;
    loop {
        if stream.read(&mut byte).await? == 0 {
            if digits == 0 {
                return Err(WireError::Closed);
            }
            return Err(WireError::ShortRead { got: 0, want: len });
        }
        match byte[0] {
            0 => break,
            d @ b'0'..=b'9' => {
                digits += 1;
                len = len * 10 + usize::from(d - b'0');
                if len > MAX_PAYLOAD_LEN {
                    return Err(WireError::OversizedPayload {
                        len,
                        max: MAX_PAYLOAD_LEN,
                    });
                }
            }
            other => return Err(WireError::BadLengthByte { byte: other }),
        }
    }
    if digits == 0 {
        return Err(WireError::EmptyLength);
    }

    let mut payload = vec![0u8; len];
    let mut got = 0;
    while got < len {
        let n = stream.read(&mut payload[got..]).await?;
        if n == 0 {
            return Err(WireError::ShortRead { got, want: len });
        }
        got += n;
    }

    let carry = match stream.read(&mut byte).await? {
        0 => None,
        _ if byte[0] == 0 => None,
        _ => Some(byte[0]),
    };

    Ok(FramedPacket { payload, carry })
}

/// Frame `payload` for the wire.
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let prefix = payload.len().to_string();
    let mut wire = Vec::with_capacity(prefix.len() + payload.len() + 2);
    wire.extend_from_slice(prefix.as_bytes());
    wire.push(0);
    wire.extend_from_slice(payload);
    wire.push(0);
    wire
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip() {
        let wire = encode_packet(b"<init idekey=\"alice\"/>");
        let packet = read_packet(&mut wire.as_slice()).await.unwrap();
        assert_eq!(packet.payload, b"<init idekey=\"alice\"/>");
        assert_eq!(packet.carry, None);
    }

    #[tokio::test]
    async fn roundtrip_empty_payload() {
        let wire = encode_packet(b"");
        assert_eq!(wire, b"0\0\0");
        let packet = read_packet(&mut wire.as_slice()).await.unwrap();
        assert!(packet.payload.is_empty());
    }

    #[tokio::test]
    async fn reassembles_across_small_segments() {
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let wire = encode_packet(&payload);

        // A tiny duplex buffer forces the reader to consume the packet in
        // many partial reads while the writer trickles it out.
        let (mut tx, mut rx) = tokio::io::duplex(7);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for chunk in wire.chunks(3) {
                tx.write_all(chunk).await.unwrap();
            }
        });

        let packet = read_packet(&mut rx).await.unwrap();
        assert_eq!(packet.payload, payload);
        assert_eq!(packet.carry, None);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn missing_trailing_nul_at_eof_is_accepted() {
        let wire = b"5\0hello";
        let packet = read_packet(&mut wire.as_slice()).await.unwrap();
        assert_eq!(packet.payload, b"hello");
        assert_eq!(packet.carry, None);
    }

    #[tokio::test]
    async fn non_nul_after_payload_is_carried() {
        let wire = b"5\0hello7\0next";
        let packet = read_packet(&mut wire.as_slice()).await.unwrap();
        assert_eq!(packet.payload, b"hello");
        assert_eq!(packet.carry, Some(b'7'));
    }

    #[tokio::test]
    async fn rejects_non_digit_in_length() {
        let wire = b"12x\0payload";
        match read_packet(&mut wire.as_slice()).await {
            Err(WireError::BadLengthByte { byte: b'x' }) => {}
            other => panic!("expected BadLengthByte, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_empty_length() {
        let wire = b"\0payload";
        assert!(matches!(
            read_packet(&mut wire.as_slice()).await,
            Err(WireError::EmptyLength)
        ));
    }

    #[tokio::test]
    async fn clean_eof_before_packet_is_closed() {
        let mut wire: &[u8] = b"";
        assert!(matches!(
            read_packet(&mut wire).await,
            Err(WireError::Closed)
        ));
    }

    #[tokio::test]
    async fn payload_at_cap_is_accepted() {
        let payload = vec![b'a'; MAX_PAYLOAD_LEN];
        let wire = encode_packet(&payload);
        let packet = read_packet(&mut wire.as_slice()).await.unwrap();
        assert_eq!(packet.payload.len(), MAX_PAYLOAD_LEN);
    }

    #[tokio::test]
    async fn payload_over_cap_is_rejected() {
        // The length prefix alone is enough to reject; no payload follows.
        let wire = format!("{}\0", MAX_PAYLOAD_LEN + 1);
        match read_packet(&mut wire.as_bytes()).await {
            Err(WireError::OversizedPayload { len, max }) => {
                assert_eq!(len, MAX_PAYLOAD_LEN + 1);
                assert_eq!(max, MAX_PAYLOAD_LEN);
            }
            other => panic!("expected OversizedPayload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn eof_mid_payload_is_short_read() {
        let wire = b"10\0abc";
        match read_packet(&mut wire.as_slice()).await {
            Err(WireError::ShortRead { got: 3, want: 10 }) => {}
            other => panic!("expected ShortRead, got {:?}", other),
        }
    }
}
