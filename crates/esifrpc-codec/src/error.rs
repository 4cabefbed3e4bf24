use esifrpc_frame::{BufferError, MessageError};

/// Errors from encoding or decoding RPC calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A field or referenced range lies outside the buffer.
    #[error("read of {len} bytes at {offset} out of bounds (buffer {available} bytes)")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    /// The buffer is structurally invalid.
    #[error("malformed call: {0}")]
    Malformed(String),

    /// The function id is not one we know.
    #[error("unknown function id 0x{0:X}")]
    UnknownFunction(u32),

    /// The message carries a different function than the caller expected.
    #[error("function mismatch: expected {expected}, found {found}")]
    FunctionMismatch { expected: String, found: String },

    /// The encoded call would not fit the 32-bit length fields.
    #[error("encoded call too large ({0} bytes)")]
    TooLarge(usize),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

pub type Result<T> = std::result::Result<T, CodecError>;
