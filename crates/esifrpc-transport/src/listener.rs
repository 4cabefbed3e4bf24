use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::tcp::TcpSocket;
use crate::traits::IpcStream;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// A bound listener for any supported [`Endpoint`].
pub enum IpcListener {
    Tcp(TcpSocket),
    #[cfg(unix)]
    Unix(UnixDomainSocket),
}

impl IpcListener {
    /// Bind the listener described by `endpoint`.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port, .. } => Ok(Self::Tcp(TcpSocket::bind(host, *port)?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(crate::error::TransportError::Unsupported(format!(
                "unix socket {}",
                path.display()
            ))),
        }
    }

    /// Accept the next connection.
    pub fn accept(&self) -> Result<(IpcStream, String)> {
        match self {
            Self::Tcp(socket) => socket.accept(),
            #[cfg(unix)]
            Self::Unix(socket) => socket.accept(),
        }
    }

    /// Switch accept between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match self {
            Self::Tcp(socket) => socket.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix(socket) => socket.set_nonblocking(nonblocking),
        }
    }

    /// The endpoint clients should use to reach this listener. For TCP this
    /// reflects the actual bound port.
    pub fn local_endpoint(&self, requested: &Endpoint) -> Endpoint {
        match (self, requested) {
            (Self::Tcp(socket), Endpoint::Tcp { host, resource, .. }) => Endpoint::Tcp {
                host: host.clone(),
                port: socket.local_addr().port(),
                resource: resource.clone(),
            },
            _ => requested.clone(),
        }
    }
}

/// Connect to `endpoint` (blocking).
pub fn connect(endpoint: &Endpoint) -> Result<IpcStream> {
    match endpoint {
        Endpoint::Tcp { host, port, .. } => TcpSocket::connect(host, *port),
        #[cfg(unix)]
        Endpoint::Unix(path) => UnixDomainSocket::connect(path),
        #[cfg(not(unix))]
        Endpoint::Unix(path) => Err(crate::error::TransportError::Unsupported(format!(
            "unix socket {}",
            path.display()
        ))),
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for IpcListener {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match self {
            Self::Tcp(socket) => socket.as_raw_fd(),
            Self::Unix(socket) => socket.as_raw_fd(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn tcp_local_endpoint_reports_bound_port() {
        let requested = Endpoint::parse("ws://127.0.0.1:0/esif").unwrap();
        let listener = IpcListener::bind(&requested).unwrap();
        let actual = listener.local_endpoint(&requested);

        match &actual {
            Endpoint::Tcp { port, resource, .. } => {
                assert_ne!(*port, 0);
                assert_eq!(resource, "/esif");
            }
            other => panic!("unexpected endpoint {other:?}"),
        }

        let client = std::thread::spawn(move || {
            let mut stream = connect(&actual).unwrap();
            stream.write_all(b"x").unwrap();
        });
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).unwrap();
        client.join().unwrap();
    }

    #[test]
    fn unix_endpoint_roundtrip() {
        let dir = std::env::temp_dir().join(format!("esifrpc-listener-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let endpoint = Endpoint::Unix(dir.join("l.sock"));
        let listener = IpcListener::bind(&endpoint).unwrap();
        assert_eq!(listener.local_endpoint(&endpoint), endpoint);

        let ep = endpoint.clone();
        let client = std::thread::spawn(move || connect(&ep).unwrap());
        let _ = listener.accept().unwrap();
        client.join().unwrap();
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
