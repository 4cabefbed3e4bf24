//! Sessions, transactions and the threaded RPC runtime for esifrpc.
//!
//! A host binds an [`RpcServer`] and serves [`EsifServices`]; applications
//! connect with an [`RpcClient`] and serve [`AppInterface`]. Either side
//! calls the other with a blocking `call` or through a proxy table
//! ([`AppProxy`], [`EsifProxy`]). Each endpoint runs one I/O thread over a
//! `poll(2)` loop plus a small worker pool.

pub mod client;
pub mod error;
pub mod handle;
pub mod handshake;
pub mod iface;
mod ioloop;
pub mod proxy;
pub mod runtime;
pub mod server;
pub mod session;
pub mod transaction;
mod worker;

/// Identifies one connection within an endpoint.
pub type ConnectionId = u64;

pub use client::RpcClient;
pub use error::{PeerError, Result};
pub use handle::{HandleConfig, HandleGenerator};
pub use handshake::{
    handshake_client, handshake_server, HandshakeConfig, HandshakeRequest, HandshakeResponse,
    HandshakeResult, PROTOCOL_NAME, PROTOCOL_VERSION,
};
pub use iface::{AppInterface, CallContext, EsifServices, NoApp, NoServices};
pub use proxy::{AppProxy, EsifProxy};
pub use runtime::{PeerConfig, SessionInfo};
pub use server::{RpcServer, ServerHandle};
pub use session::{Session, SessionRef, SessionRegistry};
pub use transaction::{
    Resolution, Transaction, TransactionConfig, TransactionId, TransactionManager,
};
