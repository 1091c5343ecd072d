//! RFC 6455 data-frame codec.
//!
//! Only single-frame, unfragmented text messages are produced or accepted --
//! the agent's protocol never needs continuation frames or binary payloads,
//! so that whole branch of the RFC is deliberately unsupported. Ping/Pong/
//! Close control frames are still recognized so the session can answer
//! liveness checks and close handshakes cleanly.

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default cap on a single frame's payload. The agent's JSON messages are
/// small; anything beyond this is almost certainly a confused or hostile peer.
pub const MAX_PAYLOAD_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }
}

/// The decoded header fields that precede the payload, factored out so the
/// buffer-based `decode` and the socket-based `FrameReader::read_frame` share
/// exactly the same bit-level parsing.
struct Header {
    opcode: OpCode,
    masked: bool,
    payload_len: u64,
}

fn parse_first_two_bytes(byte0: u8, byte1: u8) -> Result<(Header, bool)> {
    let fin = (byte0 & 0b1000_0000) != 0;
    let rsv = byte0 & 0b0111_0000;
    if rsv != 0 {
        return Err(Error::RsvNotZero);
    }
    let opcode = OpCode::from_byte(byte0 & 0b0000_1111)?;
    if !fin {
        // Every frame this client speaks is final; a non-final frame means the peer is
        // either fragmenting (unsupported) or sending a malformed control frame.
        return Err(Error::UnsupportedFragmentation);
    }

    let masked = (byte1 & 0b1000_0000) != 0;
    let len7 = (byte1 & 0b0111_1111) as u64;

    Ok((
        Header {
            opcode,
            masked,
            payload_len: len7,
        },
        fin,
    ))
}

fn unmask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Draws a fresh masking key from the OS entropy source. Client-originated
/// frames MUST be masked per RFC 6455 section 5.1.
fn draw_mask() -> Result<[u8; 4]> {
    let mut rng = StdRng::from_rng(rand::thread_rng()).map_err(|_| Error::EntropyUnavailable)?;
    Ok(rng.gen::<[u8; 4]>())
}

/// Encodes `payload` as a single masked, final frame with the given opcode,
/// choosing the smallest length encoding that fits (RFC 6455 section 5.2).
pub fn encode(opcode: OpCode, payload: &[u8]) -> Result<Vec<u8>> {
    let mask = draw_mask()?;
    Ok(encode_with_mask(opcode, payload, mask))
}

fn encode_with_mask(opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let payload_len = payload.len();
    let mut out = Vec::with_capacity(payload_len + 14);

    let first_byte = 0b1000_0000 | opcode.as_u8();
    out.push(first_byte);

    if payload_len <= 125 {
        out.push(0b1000_0000 | payload_len as u8);
    } else if payload_len <= 65535 {
        out.push(0b1000_0000 | 126);
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        out.push(0b1000_0000 | 127);
        out.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }

    out.extend_from_slice(&mask);

    let mut masked_payload = payload.to_vec();
    unmask(&mut masked_payload, mask);
    out.extend_from_slice(&masked_payload);

    out
}

/// Result of a buffer decode attempt: either a full frame plus the number of
/// bytes it consumed, or a signal that more bytes are needed.
#[derive(Debug)]
pub enum Decoded {
    Message(Frame, usize),
    NeedMore,
}

/// Pure, allocation-light decode over an in-memory buffer. Used directly by
/// the codec round-trip tests, and by `FrameReader` once it has buffered a
/// full frame off the wire.
pub fn decode(buf: &[u8], max_payload: usize) -> Result<Decoded> {
    if buf.len() < 2 {
        return Ok(Decoded::NeedMore);
    }

    let (header, _fin) = parse_first_two_bytes(buf[0], buf[1])?;
    let mut cursor = 2usize;

    let payload_len = if header.payload_len == 126 {
        if buf.len() < cursor + 2 {
            return Ok(Decoded::NeedMore);
        }
        let len = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]) as u64;
        cursor += 2;
        len
    } else if header.payload_len == 127 {
        if buf.len() < cursor + 8 {
            return Ok(Decoded::NeedMore);
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[cursor..cursor + 8]);
        cursor += 8;
        let len = u64::from_be_bytes(bytes);
        if len & (1 << 63) != 0 {
            return Err(Error::InvalidExtendedLength);
        }
        len
    } else {
        header.payload_len
    };

    if payload_len > max_payload as u64 {
        return Err(Error::MessageTooLarge(payload_len, max_payload));
    }

    let mask = if header.masked {
        if buf.len() < cursor + 4 {
            return Ok(Decoded::NeedMore);
        }
        let mut m = [0u8; 4];
        m.copy_from_slice(&buf[cursor..cursor + 4]);
        cursor += 4;
        Some(m)
    } else {
        None
    };

    let payload_len = payload_len as usize;
    if buf.len() < cursor + payload_len {
        return Ok(Decoded::NeedMore);
    }

    let mut payload = buf[cursor..cursor + payload_len].to_vec();
    cursor += payload_len;

    if let Some(mask) = mask {
        unmask(&mut payload, mask);
    }

    if header.opcode == OpCode::Text {
        // Validated here rather than deferred to the caller: a non-UTF8 text
        // frame is a protocol violation, not an application-level concern.
        String::from_utf8(payload.clone())?;
    }

    Ok(Decoded::Message(
        Frame::new(header.opcode, payload),
        cursor,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        for byte in [0x0u8, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let op = OpCode::from_byte(byte).unwrap();
            assert_eq!(op.as_u8(), byte);
        }
        assert!(OpCode::from_byte(0x3).is_err());
    }

    fn decode_one(buf: &[u8], max_payload: usize) -> Frame {
        match decode(buf, max_payload).unwrap() {
            Decoded::Message(frame, consumed) => {
                assert_eq!(consumed, buf.len());
                frame
            }
            Decoded::NeedMore => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn codec_round_trip_small_payloads() {
        for len in [0usize, 1, 64, 125, 126, 1000, 8192] {
            let payload = vec![b'a'; len];
            let encoded = encode(OpCode::Text, &payload).unwrap();
            let frame = decode_one(&encoded, MAX_PAYLOAD_SIZE);
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn codec_round_trip_up_to_one_megabyte() {
        // widen the cap beyond the default to exercise the 16-bit and
        // 64-bit length extensions.
        let cap = 1 << 20;
        for len in [65535usize, 65536, cap] {
            let payload = vec![b'x'; len];
            let encoded = encode(OpCode::Text, &payload).unwrap();
            let frame = decode_one(&encoded, cap);
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn length_encoding_header_sizes() {
        let small = encode_with_mask(OpCode::Text, &vec![0u8; 125], [1, 2, 3, 4]);
        assert_eq!(small.len() - 125, 6);

        let medium = encode_with_mask(OpCode::Text, &vec![0u8; 65535], [1, 2, 3, 4]);
        assert_eq!(medium.len() - 65535, 8);

        let large = encode_with_mask(OpCode::Text, &vec![0u8; 70000], [1, 2, 3, 4]);
        assert_eq!(large.len() - 70000, 14);
    }

    #[test]
    fn mask_bytes_vary_between_encodes() {
        let payload = b"some repeated payload bytes".to_vec();
        let a = encode(OpCode::Text, &payload).unwrap();
        let b = encode(OpCode::Text, &payload).unwrap();
        // masks live at offset 2..6 for a payload this short
        assert_ne!(&a[2..6], &b[2..6]);
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let mut buf = vec![0b1000_0001u8, 0b1111_1110, 0x7F, 0xFF];
        buf.extend_from_slice(&[0u8; 4]);
        let err = decode(&buf, MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge(_, _)));
    }

    #[test]
    fn high_bit_set_on_64bit_length_is_rejected() {
        let mut buf = vec![0b1000_0001u8, 0b1111_1111];
        buf.extend_from_slice(&(1u64 << 63).to_be_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        let err = decode(&buf, MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(matches!(err, Error::InvalidExtendedLength));
    }

    #[test]
    fn needs_more_on_truncated_buffer() {
        let encoded = encode(OpCode::Text, b"hello").unwrap();
        for cut in 0..encoded.len() - 1 {
            match decode(&encoded[..cut], MAX_PAYLOAD_SIZE).unwrap() {
                Decoded::NeedMore => {}
                Decoded::Message(_, _) => panic!("should not complete on truncated input"),
            }
        }
    }
}
