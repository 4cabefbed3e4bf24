//! Single multiplexed wait over many descriptors (`poll(2)`).

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// One descriptor of interest and, after [`poll`], its readiness.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct PollFd {
    raw: libc::pollfd,
}

impl PollFd {
    /// Interest in readability only.
    pub fn readable(fd: RawFd) -> Self {
        Self::new(fd, true, false)
    }

    /// Interest in readability and/or writability.
    pub fn new(fd: RawFd, read: bool, write: bool) -> Self {
        let mut events = 0;
        if read {
            events |= libc::POLLIN;
        }
        if write {
            events |= libc::POLLOUT;
        }
        Self {
            raw: libc::pollfd {
                fd,
                events,
                revents: 0,
            },
        }
    }

    pub fn fd(&self) -> RawFd {
        self.raw.fd
    }

    /// Readable, or the peer hung up (a read will observe EOF).
    pub fn is_readable(&self) -> bool {
        self.raw.revents & (libc::POLLIN | libc::POLLHUP) != 0
    }

    pub fn is_writable(&self) -> bool {
        self.raw.revents & libc::POLLOUT != 0
    }

    /// The descriptor is in an error state or invalid.
    pub fn is_error(&self) -> bool {
        self.raw.revents & (libc::POLLERR | libc::POLLNVAL) != 0
    }
}

impl std::fmt::Debug for PollFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollFd")
            .field("fd", &self.raw.fd)
            .field("events", &self.raw.events)
            .field("revents", &self.raw.revents)
            .finish()
    }
}

/// Block until at least one descriptor is ready or `timeout` elapses.
///
/// `None` waits indefinitely. Returns the number of ready descriptors; an
/// interrupted wait returns 0 so callers simply loop.
pub fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        Some(d) => {
            // Round up so a 0.5ms deadline does not spin at 0.
            let ms = d.as_micros().div_ceil(1000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    };

    for fd in fds.iter_mut() {
        fd.raw.revents = 0;
    }

    // SAFETY: PollFd is a transparent wrapper over libc::pollfd laid out
    // contiguously in `fds`; the pointer and length describe that slice.
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr().cast::<libc::pollfd>(),
            fds.len() as libc::nfds_t,
            timeout_ms,
        )
    };

    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(rc as usize)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    use super::*;

    #[test]
    fn times_out_without_activity() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut fds = [PollFd::readable(left.as_raw_fd())];
        let start = Instant::now();
        let ready = poll(&mut fds, Some(Duration::from_millis(30))).unwrap();
        assert_eq!(ready, 0);
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(!fds[0].is_readable());
    }

    #[test]
    fn reports_readable_and_writable() {
        let (left, mut right) = UnixStream::pair().unwrap();
        right.write_all(b"x").unwrap();

        let mut fds = [
            PollFd::readable(left.as_raw_fd()),
            PollFd::new(right.as_raw_fd(), false, true),
        ];
        let ready = poll(&mut fds, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready, 2);
        assert!(fds[0].is_readable());
        assert!(fds[1].is_writable());
        assert_eq!(fds[1].fd(), right.as_raw_fd());
    }

    #[test]
    fn hangup_counts_as_readable() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);
        let mut fds = [PollFd::readable(left.as_raw_fd())];
        poll(&mut fds, Some(Duration::from_secs(1))).unwrap();
        assert!(fds[0].is_readable());
    }
}
