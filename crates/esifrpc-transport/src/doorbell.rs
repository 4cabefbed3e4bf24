//! Socketpair doorbell for waking a blocking poll from another thread.
//!
//! The I/O loop polls the read end alongside its sockets; any thread holding
//! a [`DoorbellRinger`] can write one byte to make that poll return.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use crate::error::Result;

/// Read end of the doorbell, owned by the polling thread.
pub struct Doorbell {
    rx: UnixStream,
    tx: Arc<UnixStream>,
}

/// Cloneable write end of a [`Doorbell`].
#[derive(Clone)]
pub struct DoorbellRinger {
    tx: Arc<UnixStream>,
}

impl Doorbell {
    /// Create a connected, non-blocking socket pair.
    pub fn new() -> Result<Self> {
        let (rx, tx) = UnixStream::pair()?;
        rx.set_nonblocking(true)?;
        tx.set_nonblocking(true)?;
        Ok(Self {
            rx,
            tx: Arc::new(tx),
        })
    }

    /// A handle other threads use to ring this doorbell.
    pub fn ringer(&self) -> DoorbellRinger {
        DoorbellRinger {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Drain all pending rings. Returns true if at least one byte was read.
    pub fn drain(&self) -> bool {
        let mut buf = [0u8; 64];
        let mut drained = false;
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(0) => return drained,
                Ok(_) => drained = true,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return drained,
                Err(err) => {
                    tracing::warn!(error = %err, "doorbell drain failed");
                    return drained;
                }
            }
        }
    }
}

impl AsRawFd for Doorbell {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}

impl DoorbellRinger {
    /// Wake the polling thread.
    ///
    /// A full socket buffer means a wakeup is already pending, so the ring is
    /// dropped.
    pub fn ring(&self) {
        loop {
            match (&*self.tx).write(&[1u8]) {
                Ok(_) => {
                    tracing::trace!("doorbell rung");
                    return;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    tracing::trace!("doorbell already pending");
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "doorbell ring failed");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for Doorbell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doorbell")
            .field("fd", &self.rx.as_raw_fd())
            .finish()
    }
}
