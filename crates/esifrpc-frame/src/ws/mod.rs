//! RFC 6455 WebSocket framing.
//!
//! - [`handshake`]: HTTP upgrade on both sides
//! - [`frame`]: single-frame encode/decode and masking
//! - [`decoder`]: fragment reassembly over a growing input buffer
//! - [`reader`] / [`writer`]: blocking message I/O on any stream

pub mod decoder;
pub mod frame;
pub mod handshake;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod codec;

use std::time::Duration;

use bytes::Bytes;

pub use decoder::{Reassembler, WsDecoder};
pub use frame::{Opcode, WsFrame};
pub use reader::WsReader;
pub use writer::{encode_message, WsWriter};

/// Default bound on a reassembled message: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Which end of the connection we are. Decides masking rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Configuration for WebSocket framing.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Maximum reassembled message size in bytes. Default: 16 MiB.
    pub max_message_size: usize,
    /// Mask frames sent by the server. Clients always mask. Default: off.
    pub mask_server_frames: bool,
    /// Split outgoing messages into frames of at most this many bytes.
    pub fragment_size: Option<usize>,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
            mask_server_frames: false,
            fragment_size: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl WsConfig {
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_server_masking(mut self, enabled: bool) -> Self {
        self.mask_server_frames = enabled;
        self
    }

    pub fn with_fragment_size(mut self, size: Option<usize>) -> Self {
        self.fragment_size = size.map(|s| s.max(1));
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Whether frames sent by `role` are masked under this configuration.
    pub fn masks_outgoing(&self, role: Role) -> bool {
        match role {
            Role::Client => true,
            Role::Server => self.mask_server_frames,
        }
    }
}

/// A complete, reassembled WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsMessage {
    /// Opcode of the first fragment.
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl WsMessage {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_policy() {
        let cfg = WsConfig::default();
        assert!(cfg.masks_outgoing(Role::Client));
        assert!(!cfg.masks_outgoing(Role::Server));

        let cfg = cfg.with_server_masking(true);
        assert!(cfg.masks_outgoing(Role::Server));
    }

    #[test]
    fn fragment_size_floor() {
        let cfg = WsConfig::default().with_fragment_size(Some(0));
        assert_eq!(cfg.fragment_size, Some(1));
    }
}
