use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_U16: u8 = 126;
const LEN_U64: u8 = 127;

/// Close status codes used by this crate.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    pub const TOO_BIG: u16 = 1009;
}

/// WebSocket frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Continuation => "CONTINUATION",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }
}

/// A single WebSocket frame.
///
/// `payload` is always held unmasked; `mask` records the key that is (or
/// was) applied on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl WsFrame {
    /// A final, unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn with_mask(mut self, mask: Option<[u8; 4]>) -> Self {
        self.mask = mask;
        self
    }

    /// Size of the header this frame needs on the wire.
    pub fn header_len(&self) -> usize {
        header_len(self.payload.len(), self.mask.is_some())
    }

    /// Total wire size (header + payload).
    pub fn wire_size(&self) -> usize {
        self.header_len() + self.payload.len()
    }
}

fn header_len(payload_len: usize, masked: bool) -> usize {
    let len_bytes = match payload_len {
        0..=125 => 0,
        126..=0xFFFF => 2,
        _ => 8,
    };
    2 + len_bytes + if masked { 4 } else { 0 }
}

/// XOR `buf` with the 4-byte mask key. Applying it twice restores the input.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Encode a frame into wire format.
///
/// Wire format (RFC 6455 §5.2, lengths big-endian):
/// ```text
/// ┌─────┬─────┬────────┬──────┬─────────┬────────────┬──────────┬─────────┐
/// │ FIN │ RSV │ Opcode │ MASK │ Len (7) │ Ext len    │ Mask key │ Payload │
/// │ 1b  │ 3b  │ 4b     │ 1b   │         │ 0 / 2 / 8B │ 0 / 4B   │         │
/// └─────┴─────┴────────┴──────┴─────────┴────────────┴──────────┴─────────┘
/// ```
pub fn encode_frame(frame: &WsFrame, dst: &mut BytesMut) -> Result<()> {
    let len = frame.payload.len();
    if frame.opcode.is_control() {
        if len > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::Protocol(format!(
                "{} payload of {len} bytes exceeds {MAX_CONTROL_PAYLOAD}",
                frame.opcode.name()
            )));
        }
        if !frame.fin {
            return Err(FrameError::Protocol(format!(
                "{} frame must not be fragmented",
                frame.opcode.name()
            )));
        }
    }

    dst.reserve(frame.wire_size());
    let fin = if frame.fin { FIN_BIT } else { 0 };
    dst.put_u8(fin | frame.opcode as u8);

    let mask = if frame.mask.is_some() { MASK_BIT } else { 0 };
    match len {
        0..=125 => dst.put_u8(mask | len as u8),
        126..=0xFFFF => {
            dst.put_u8(mask | LEN_U16);
            dst.put_u16(len as u16);
        }
        _ => {
            dst.put_u8(mask | LEN_U64);
            dst.put_u64(len as u64);
        }
    }

    match frame.mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(&frame.payload),
    }
    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet. On
/// success the frame bytes are consumed and the payload is unmasked.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<WsFrame>> {
    if src.len() < 2 {
        return Ok(None);
    }

    let b0 = src[0];
    let b1 = src[1];
    if b0 & RSV_BITS != 0 {
        return Err(FrameError::Protocol(format!(
            "reserved bits set (0x{:02X})",
            b0 & RSV_BITS
        )));
    }
    let opcode = Opcode::from_u8(b0 & OPCODE_BITS).ok_or_else(|| {
        FrameError::Protocol(format!("unknown opcode 0x{:X}", b0 & OPCODE_BITS))
    })?;
    let fin = b0 & FIN_BIT != 0;
    let masked = b1 & MASK_BIT != 0;

    let (payload_len, mut offset) = match b1 & LEN_BITS {
        LEN_U16 => {
            if src.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([src[2], src[3]]) as u64, 4usize)
        }
        LEN_U64 => {
            if src.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&src[2..10]);
            let len = u64::from_be_bytes(raw);
            if len & (1 << 63) != 0 {
                return Err(FrameError::Protocol(
                    "64-bit length has the high bit set".to_string(),
                ));
            }
            (len, 10usize)
        }
        short => (short as u64, 2usize),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::Protocol(format!(
                "fragmented {} frame",
                opcode.name()
            )));
        }
        if payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::Protocol(format!(
                "{} payload of {payload_len} bytes exceeds {MAX_CONTROL_PAYLOAD}",
                opcode.name()
            )));
        }
    }

    let payload_len = usize::try_from(payload_len)
        .ok()
        .filter(|len| *len <= max_payload)
        .ok_or(FrameError::MessageTooLarge {
            size: usize::try_from(payload_len).unwrap_or(usize::MAX),
            max: max_payload,
        })?;

    let mask = if masked {
        if src.len() < offset + 4 {
            return Ok(None);
        }
        let key = [src[offset], src[offset + 1], src[offset + 2], src[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if src.len() < offset + payload_len {
        return Ok(None);
    }

    src.advance(offset);
    let mut payload = src.split_to(payload_len);
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some(WsFrame {
        fin,
        opcode,
        mask,
        payload: payload.freeze(),
    }))
}

/// Build a CLOSE payload: big-endian status code followed by a UTF-8 reason.
pub fn close_payload(code: u16, reason: &str) -> Bytes {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let reason = &reason.as_bytes()[..end];
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code);
    buf.put_slice(reason);
    buf.freeze()
}

/// Split a CLOSE payload into status code and reason, if present.
pub fn parse_close(payload: &[u8]) -> Option<(u16, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    Some((code, String::from_utf8_lossy(&payload[2..]).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::DEFAULT_MAX_MESSAGE;

    fn roundtrip(frame: &WsFrame) -> (usize, WsFrame) {
        let mut wire = BytesMut::new();
        encode_frame(frame, &mut wire).unwrap();
        let wire_len = wire.len();
        let decoded = decode_frame(&mut wire, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert!(wire.is_empty());
        (wire_len, decoded)
    }

    #[test]
    fn size_tiers_roundtrip() {
        for (size, header) in [
            (0usize, 2usize),
            (1, 2),
            (125, 2),
            (126, 4),
            (65_535, 4),
            (65_536, 10),
        ] {
            let payload: Vec<u8> = (0..size).map(|i| i as u8).collect();
            let frame = WsFrame::new(Opcode::Binary, payload.clone());
            let (wire_len, decoded) = roundtrip(&frame);
            assert_eq!(wire_len, header + size, "size {size}");
            assert_eq!(decoded.payload.as_ref(), payload.as_slice());
            assert!(decoded.fin);
            assert_eq!(decoded.mask, None);

            let masked = frame.with_mask(Some([0xA1, 0xB2, 0xC3, 0xD4]));
            let (wire_len, decoded) = roundtrip(&masked);
            assert_eq!(wire_len, header + 4 + size, "masked size {size}");
            assert_eq!(decoded.payload.as_ref(), payload.as_slice());
            assert_eq!(decoded.mask, Some([0xA1, 0xB2, 0xC3, 0xD4]));
        }
    }

    #[test]
    fn masked_bytes_differ_on_wire() {
        let frame = WsFrame::new(Opcode::Text, "Hello").with_mask(Some([0x37, 0xFA, 0x21, 0x3D]));
        let mut wire = BytesMut::new();
        encode_frame(&frame, &mut wire).unwrap();
        // RFC 6455 §5.7 example.
        assert_eq!(
            wire.as_ref(),
            &[0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58]
        );
    }

    #[test]
    fn apply_mask_is_involution() {
        let mut data = b"payload bytes".to_vec();
        let key = [1, 2, 3, 4];
        apply_mask(&mut data, key);
        assert_ne!(data, b"payload bytes");
        apply_mask(&mut data, key);
        assert_eq!(data, b"payload bytes");
    }

    #[test]
    fn incomplete_input_waits() {
        let mut wire = BytesMut::new();
        encode_frame(&WsFrame::new(Opcode::Binary, vec![7u8; 300]), &mut wire).unwrap();

        for cut in [1usize, 3, 100] {
            let mut partial = BytesMut::from(&wire[..cut]);
            assert!(decode_frame(&mut partial, DEFAULT_MAX_MESSAGE)
                .unwrap()
                .is_none());
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn reserved_bits_rejected() {
        let mut wire = BytesMut::from(&[0xC2u8, 0x00][..]);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_MESSAGE),
            Err(FrameError::Protocol(_))
        ));
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut wire = BytesMut::from(&[0x83u8, 0x00][..]);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_MESSAGE),
            Err(FrameError::Protocol(_))
        ));
    }

    #[test]
    fn control_frame_rules() {
        let too_big = WsFrame::new(Opcode::Ping, vec![0u8; 126]);
        assert!(encode_frame(&too_big, &mut BytesMut::new()).is_err());

        let fragmented = WsFrame::new(Opcode::Close, Bytes::new()).with_fin(false);
        assert!(encode_frame(&fragmented, &mut BytesMut::new()).is_err());

        let mut wire = BytesMut::from(&[0x09u8, 0x00][..]);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_MESSAGE),
            Err(FrameError::Protocol(_))
        ));

        let mut wire = BytesMut::from(&[0x89u8, 126, 0x00, 0x7E][..]);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_MESSAGE),
            Err(FrameError::Protocol(_))
        ));
    }

    #[test]
    fn oversized_frame_rejected_from_header() {
        let mut wire = BytesMut::new();
        wire.put_u8(0x82);
        wire.put_u8(LEN_U64);
        wire.put_u64(1 << 40);

        assert!(matches!(
            decode_frame(&mut wire, 1024),
            Err(FrameError::MessageTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn close_payload_helpers() {
        let payload = close_payload(close_code::NORMAL, "bye");
        assert_eq!(payload.as_ref(), &[0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(parse_close(&payload), Some((1000, "bye".to_string())));
        assert_eq!(parse_close(&[]), None);

        let long = "x".repeat(500);
        assert_eq!(close_payload(close_code::GOING_AWAY, &long).len(), 125);
    }

    #[test]
    fn close_reason_truncates_on_char_boundary() {
        // 'é' is two bytes, so byte 123 falls inside a character.
        let reason = "é".repeat(100);
        let payload = close_payload(close_code::GOING_AWAY, &reason);
        assert_eq!(payload.len(), 2 + 122);
        let text = std::str::from_utf8(&payload[2..]).unwrap();
        assert!(reason.starts_with(text));
        assert_eq!(parse_close(&payload).unwrap().1, text);
    }

    #[test]
    fn opcode_classification() {
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Close.is_control());
        assert!(!Opcode::Binary.is_control());
        assert!(!Opcode::Continuation.is_control());
        assert_eq!(Opcode::from_u8(0xB), None);
    }
}
