//! Socket transport for esifrpc.
//!
//! Provides a unified stream/listener interface over:
//! - Unix domain sockets (filesystem paths)
//! - TCP sockets (`host:port`)
//!
//! plus the two primitives the I/O loop is built on: a [`Doorbell`] used to
//! wake a blocking wait from another thread, and [`poll`] for a single
//! multiplexed wait over many descriptors.
//!
//! This is the lowest layer of esifrpc. Everything else builds on top of
//! the [`IpcStream`] type provided here.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod doorbell;
#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::{connect, IpcListener};
pub use tcp::TcpSocket;
pub use traits::IpcStream;

#[cfg(unix)]
pub use doorbell::{Doorbell, DoorbellRinger};
#[cfg(unix)]
pub use poll::{poll, PollFd};
#[cfg(unix)]
pub use uds::UnixDomainSocket;
