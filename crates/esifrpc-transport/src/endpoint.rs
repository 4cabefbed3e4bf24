use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Default TCP port when a `ws://` or `tcp://` endpoint omits one.
pub const DEFAULT_PORT: u16 = 6969;

/// Default WebSocket resource path.
pub const DEFAULT_RESOURCE: &str = "/";

/// Where a server listens or a client connects.
///
/// Accepted forms:
/// - `ws://host:port[/path]` and `tcp://host:port` (TCP)
/// - `unix:///path/to.sock` or a bare filesystem path (Unix domain socket)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP endpoint with the WebSocket resource path used in the upgrade.
    Tcp {
        host: String,
        port: u16,
        resource: String,
    },
    /// Unix domain socket at a filesystem path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse an endpoint string.
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidEndpoint(input.to_string()));
        }

        if let Some(path) = input.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let rest = if let Some(rest) = input.strip_prefix("ws://") {
            rest
        } else if let Some(rest) = input.strip_prefix("tcp://") {
            rest
        } else if input.contains("://") {
            return Err(TransportError::Unsupported(input.to_string()));
        } else {
            return Ok(Self::Unix(PathBuf::from(input)));
        };

        let (authority, resource) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, DEFAULT_RESOURCE),
        };

        let (host, port) = split_host_port(authority)
            .ok_or_else(|| TransportError::InvalidEndpoint(input.to_string()))?;

        Ok(Self::Tcp {
            host,
            port,
            resource: resource.to_string(),
        })
    }

    /// The `Host` header value used in the WebSocket upgrade.
    pub fn host_header(&self) -> String {
        match self {
            Self::Tcp { host, port, .. } if host.contains(':') => format!("[{host}]:{port}"),
            Self::Tcp { host, port, .. } => format!("{host}:{port}"),
            Self::Unix(_) => "localhost".to_string(),
        }
    }

    /// The request target used in the WebSocket upgrade.
    pub fn resource(&self) -> &str {
        match self {
            Self::Tcp { resource, .. } => resource,
            Self::Unix(_) => DEFAULT_RESOURCE,
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Unix(_) => "unix-domain-socket",
        }
    }
}

fn split_host_port(authority: &str) -> Option<(String, u16)> {
    if authority.is_empty() {
        return None;
    }

    // [v6]:port
    if let Some(rest) = authority.strip_prefix('[') {
        let close = rest.find(']')?;
        let host = &rest[..close];
        let tail = &rest[close + 1..];
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host.to_string(), port.parse().ok()?)),
        Some(_) => None,
        None => Some((authority.to_string(), DEFAULT_PORT)),
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp {
                host,
                port,
                resource,
            } => {
                if host.contains(':') {
                    write!(f, "ws://[{host}]:{port}{resource}")
                } else {
                    write!(f, "ws://{host}:{port}{resource}")
                }
            }
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
