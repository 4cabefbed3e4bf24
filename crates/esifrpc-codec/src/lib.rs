//! RPC call encoding for esifrpc.
//!
//! Every call is a flat buffer: fixed-size fields first, then the bytes of
//! each variable field. A variable field ([`EsifData`]) holds a 4-byte offset
//! from the end of its own reference to its data, so an encoded call can be
//! copied, sliced or moved between processes without fix-ups.
//!
//! ```text
//! ┌─────────────┬───────────┬──────────────────────────┬────────┬────────┐
//! │ RPC header  │ scalars…  │ EsifData refs (NULL/off) │ data 1 │ data 2 │
//! └─────────────┴───────────┴──────────────────────────┴────────┴────────┘
//!                              └──── offset ────────────┘
//! ```

pub mod calls;
pub mod data;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod message;
pub mod scalar;

pub use calls::{Direction, FunctionId, RpcCall};
pub use data::{DataType, EsifData, ResultCode};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{CodecError, Result};
pub use message::{
    decode_call, decode_header, encode_call, encode_status, message_class, RpcHeader, RpcKind,
};
pub use scalar::{ByteOrder, WireMode, WIRE_MODE};

/// Opaque 64-bit handle exchanged between peers.
pub type Handle = u64;

/// Handle value that never refers to a live object.
pub const INVALID_HANDLE: Handle = u64::MAX;
