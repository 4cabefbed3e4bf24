//! Binary RPC between a host and its applications over WebSocket.
//!
//! # Crate Structure
//!
//! - [`transport`]: sockets, endpoints, doorbell and `poll(2)`
//! - [`frame`]: byte buffers, message headers and WebSocket framing
//! - [`codec`]: position-independent RPC call encoding
//! - [`peer`]: sessions, transactions, server and client runtimes (behind
//!   the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use esifrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use esifrpc_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use esifrpc_codec::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use esifrpc_peer::*;
}
