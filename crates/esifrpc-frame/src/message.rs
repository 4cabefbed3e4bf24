//! The message header that prefixes every payload carried over WebSocket.
//!
//! Wire format (16 bytes, little-endian):
//! ```text
//! ┌────────────┬─────────────┬───────────┬────────────┬──────────────┐
//! │ Signature  │ Header size │ Version   │ Class      │ Payload len  │
//! │ 0xD8E5 (2) │ (2)         │ (4)       │ FourCC (4) │ (4)          │
//! └────────────┴─────────────┴───────────┴────────────┴──────────────┘
//! ```
//!
//! `header_size` may exceed the base size; readers skip whatever follows the
//! known fields as long as the major version matches.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::MessageError;

/// Header signature.
pub const SIGNATURE: u16 = 0xD8E5;

/// Size of the base header in bytes.
pub const BASE_HEADER_SIZE: usize = 16;

/// Version stamped on every outgoing header.
pub const CURRENT_VERSION: MessageVersion = MessageVersion::new(1, 0, 0);

type Result<T> = std::result::Result<T, MessageError>;

/// A packed `major.minor.revision` header version.
///
/// Major occupies bits 0-7, minor bits 8-15, revision bits 16-31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
}

impl MessageVersion {
    pub const fn new(major: u8, minor: u8, revision: u16) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    pub const fn from_packed(packed: u32) -> Self {
        Self {
            major: (packed & 0xFF) as u8,
            minor: ((packed >> 8) & 0xFF) as u8,
            revision: (packed >> 16) as u16,
        }
    }

    pub const fn packed(&self) -> u32 {
        (self.major as u32) | ((self.minor as u32) << 8) | ((self.revision as u32) << 16)
    }
}

impl fmt::Display for MessageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// A four-character message class code, stored little-endian on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageClass(pub u32);

impl MessageClass {
    /// RPC request or response.
    pub const RPC: Self = Self::from_fourcc(*b"IRPC");
    /// Protocol handshake (JSON body).
    pub const HANDSHAKE: Self = Self::from_fourcc(*b"IHSK");

    pub const fn from_fourcc(code: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(code))
    }

    pub const fn fourcc(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        if code.iter().all(u8::is_ascii_graphic) {
            for b in code {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

impl fmt::Debug for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageClass({self})")
    }
}

/// Parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub signature: u16,
    pub header_size: u16,
    pub version: MessageVersion,
    pub class: MessageClass,
    pub payload_len: u32,
}

impl MessageHeader {
    /// Stamp a header for `payload_len` bytes of `class` at the current version.
    pub fn init(class: MessageClass, payload_len: u32) -> Self {
        Self {
            signature: SIGNATURE,
            header_size: BASE_HEADER_SIZE as u16,
            version: CURRENT_VERSION,
            class,
            payload_len,
        }
    }

    /// Parse the base fields without validating them.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < BASE_HEADER_SIZE {
            return Err(MessageError::Truncated(src.len()));
        }
        Ok(Self {
            signature: u16::from_le_bytes([src[0], src[1]]),
            header_size: u16::from_le_bytes([src[2], src[3]]),
            version: MessageVersion::from_packed(read_u32(src, 4)),
            class: MessageClass(read_u32(src, 8)),
            payload_len: read_u32(src, 12),
        })
    }

    /// Accept the header iff the signature matches and the major version is
    /// ours. Minor, revision and extra header bytes are tolerated.
    pub fn verify(&self) -> Result<()> {
        if self.signature != SIGNATURE {
            return Err(MessageError::BadSignature(self.signature));
        }
        if self.version.major != CURRENT_VERSION.major {
            return Err(MessageError::Version {
                expected_major: CURRENT_VERSION.major,
                found: self.version.to_string(),
            });
        }
        if (self.header_size as usize) < BASE_HEADER_SIZE {
            return Err(MessageError::HeaderTooSmall(self.header_size));
        }
        Ok(())
    }

    /// Total size of header plus payload.
    pub fn frame_len(&self) -> usize {
        self.header_size as usize + self.payload_len as usize
    }

    /// Append the base header, padded with zeros to `header_size`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let size = (self.header_size as usize).max(BASE_HEADER_SIZE);
        dst.reserve(size);
        dst.put_u16_le(self.signature);
        dst.put_u16_le(self.header_size);
        dst.put_u32_le(self.version.packed());
        dst.put_u32_le(self.class.0);
        dst.put_u32_le(self.payload_len);
        dst.put_bytes(0, size - BASE_HEADER_SIZE);
    }
}

/// Validate `frame` and return its header and payload slice.
///
/// Fails with [`MessageError::OutOfBounds`] unless the frame holds at least
/// `header_size + payload_len` bytes. Trailing bytes are ignored.
pub fn get_payload(frame: &[u8]) -> Result<(MessageHeader, &[u8])> {
    let header = MessageHeader::parse(frame)?;
    header.verify()?;

    let needed = header.frame_len();
    if frame.len() < needed {
        return Err(MessageError::OutOfBounds {
            needed,
            available: frame.len(),
        });
    }
    Ok((header, &frame[header.header_size as usize..needed]))
}

/// Build a complete message (header + payload) into `dst`.
pub fn encode_message(class: MessageClass, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| MessageError::OutOfBounds {
        needed: payload.len(),
        available: u32::MAX as usize,
    })?;
    MessageHeader::init(class, payload_len).encode(dst);
    dst.put_slice(payload);
    Ok(())
}

fn read_u32(src: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}
