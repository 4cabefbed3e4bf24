/// Errors from [`ByteBuffer`](crate::ByteBuffer) operations.
///
/// A failed operation leaves the buffer exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Growing the allocation failed or the size overflowed.
    #[error("buffer allocation of {requested} bytes failed")]
    AllocFailed { requested: usize },

    /// An offset or range lies outside the buffer's data.
    #[error("range {offset}+{len} out of bounds (length {length})")]
    OutOfBounds {
        offset: usize,
        len: usize,
        length: usize,
    },
}

/// Errors from message header validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Fewer bytes than a base header.
    #[error("truncated message header ({0} bytes)")]
    Truncated(usize),

    /// The signature field does not match.
    #[error("invalid message signature 0x{0:04X}")]
    BadSignature(u16),

    /// The header's major version differs from ours.
    #[error("unsupported message version {found} (expected major {expected_major})")]
    Version { expected_major: u8, found: String },

    /// The declared header size is smaller than the base header.
    #[error("declared header size {0} is smaller than the base header")]
    HeaderTooSmall(u16),

    /// The frame is shorter than `header_size + payload_length`.
    #[error("message out of bounds: need {needed} bytes, have {available}")]
    OutOfBounds { needed: usize, available: usize },
}

/// Errors that can occur while framing or deframing WebSocket traffic.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer violated the WebSocket framing rules.
    #[error("websocket protocol error: {0}")]
    Protocol(String),

    /// The upgrade handshake failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// A frame or reassembled message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A buffer operation failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A message header failed validation.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
