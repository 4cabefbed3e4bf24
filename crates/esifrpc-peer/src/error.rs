use std::time::Duration;

use esifrpc_codec::{Handle, ResultCode};

use crate::ConnectionId;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] esifrpc_transport::TransportError),

    /// WebSocket or message framing error.
    #[error("frame error: {0}")]
    Frame(#[from] esifrpc_frame::FrameError),

    /// A call could not be encoded or a reply could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] esifrpc_codec::CodecError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The call did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A fixed-size pool is full.
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    /// A connection has too many requests waiting for a worker.
    #[error("connection {connection} exceeded its request queue depth of {depth}")]
    QueueFull {
        connection: ConnectionId,
        depth: usize,
    },

    /// A connection's unsent output passed its limit.
    #[error("connection {connection} has {pending} bytes unsent, limit is {limit}")]
    OutboxFull {
        connection: ConnectionId,
        pending: usize,
        limit: usize,
    },

    /// Another live session's application already holds the app handle.
    #[error("app handle 0x{app_handle:X} already belongs to session 0x{session:X}")]
    AppHandleInUse { app_handle: Handle, session: Handle },

    /// No live session matches the handle.
    #[error("invalid handle 0x{0:X}")]
    InvalidHandle(Handle),

    /// The runtime has been shut down.
    #[error("peer runtime shut down")]
    Shutdown,
}

impl PeerError {
    /// The result code reported to the other side of an interface table
    /// when a forwarded call fails locally.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::Transport(_) | Self::Frame(_) | Self::Disconnected(_) | Self::Shutdown => {
                ResultCode::Disconnected
            }
            Self::Codec(_) => ResultCode::InvalidRequest,
            Self::Timeout(_) => ResultCode::Timeout,
            Self::Capacity(_) | Self::QueueFull { .. } | Self::OutboxFull { .. } => ResultCode::NoMemory,
            Self::InvalidHandle(_) | Self::AppHandleInUse { .. } => ResultCode::InvalidHandle,
            Self::HandshakeFailed(_) | Self::Json(_) => ResultCode::RequestFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_follow_failure_kind() {
        assert_eq!(
            PeerError::Disconnected("gone".into()).result_code(),
            ResultCode::Disconnected
        );
        assert_eq!(
            PeerError::Timeout(Duration::from_secs(1)).result_code(),
            ResultCode::Timeout
        );
        assert_eq!(
            PeerError::QueueFull {
                connection: 1,
                depth: 64
            }
            .result_code(),
            ResultCode::NoMemory
        );
        assert_eq!(
            PeerError::InvalidHandle(0x1234).result_code(),
            ResultCode::InvalidHandle
        );
        assert_eq!(
            PeerError::AppHandleInUse {
                app_handle: 1,
                session: 0x1234
            }
            .result_code(),
            ResultCode::InvalidHandle
        );
        assert_eq!(
            PeerError::Codec(esifrpc_codec::CodecError::Malformed("x".into())).result_code(),
            ResultCode::InvalidRequest
        );
    }
}
