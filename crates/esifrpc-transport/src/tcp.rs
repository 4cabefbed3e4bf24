use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Listening TCP socket.
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on `host:port`. Port 0 picks an ephemeral port.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let endpoint = format!("{host}:{port}");
        let listener = TcpListener::bind((host, port)).map_err(|source| TransportError::Bind {
            endpoint: endpoint.clone(),
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { endpoint, source })?;

        info!(%local_addr, "listening on tcp socket");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection, returning the stream and peer address.
    pub fn accept(&self) -> Result<(IpcStream, String)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        // Accepted sockets inherit O_NONBLOCK from the listener on some platforms.
        stream.set_nonblocking(false).map_err(TransportError::Accept)?;
        debug!(peer = %addr, "accepted tcp connection");
        Ok((IpcStream::from_tcp(stream), addr.to_string()))
    }

    /// Connect to `host:port` (blocking), trying each resolved address.
    pub fn connect(host: &str, port: u16) -> Result<IpcStream> {
        let endpoint = format!("{host}:{port}");
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    debug!(%addr, "connected to tcp socket");
                    return Ok(IpcStream::from_tcp(stream));
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(TransportError::Connect {
            endpoint,
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
            }),
        })
    }

    /// Switch accept between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// The bound local address (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for TcpSocket {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.listener.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind_ephemeral_accept_connect() {
        let listener = TcpSocket::bind("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().port();
        assert_ne!(port, 0);

        let client = std::thread::spawn(move || {
            let mut stream = TcpSocket::connect("127.0.0.1", port).unwrap();
            stream.write_all(b"tcp!").unwrap();
        });

        let (mut server, peer) = listener.accept().unwrap();
        assert!(peer.starts_with("127.0.0.1:"));
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"tcp!");
        client.join().unwrap();
    }

    #[test]
    fn connect_refused() {
        let listener = TcpSocket::bind("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().port();
        drop(listener);

        let err = TcpSocket::connect("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
