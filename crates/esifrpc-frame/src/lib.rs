//! Buffers, message headers and WebSocket framing for esifrpc.
//!
//! Three layers live here, leaf-first:
//! - [`ByteBuffer`]: a growable byte buffer with boundary-aligned
//!   reallocation and zero-filled vacated space
//! - [`MessageHeader`]: the 16-byte self-describing header prepended to every
//!   RPC or handshake payload
//! - [`ws`]: RFC 6455 framing (upgrade handshake, masking, fragmentation,
//!   control frames) over any `Read`/`Write` stream

pub mod binary;
pub mod error;
pub mod message;
pub mod ws;

pub use binary::{ByteBuffer, DEFAULT_GROW_BOUNDARY};
pub use error::{BufferError, FrameError, MessageError, Result};
pub use message::{
    encode_message, get_payload, MessageClass, MessageHeader, MessageVersion, BASE_HEADER_SIZE,
    CURRENT_VERSION, SIGNATURE,
};
pub use ws::{
    Opcode, Reassembler, Role, WsConfig, WsDecoder, WsFrame, WsMessage, WsReader, WsWriter,
    DEFAULT_MAX_MESSAGE,
};

#[cfg(feature = "async")]
pub use ws::codec::WsCodec;
