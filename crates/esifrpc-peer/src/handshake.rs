//! Protocol handshake carried in `IHSK` messages after the WebSocket upgrade.
//!
//! The client announces its protocol, version and wire mode; the server
//! validates them, registers a session and answers with the session handle.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use esifrpc_codec::{Handle, WireMode, INVALID_HANDLE, WIRE_MODE};
use esifrpc_frame::ws::frame::{close_code, close_payload};
use esifrpc_frame::{FrameError, MessageClass, Opcode, Role, WsConfig, WsDecoder};
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

/// Protocol name both sides must agree on.
pub const PROTOCOL_NAME: &str = "esifrpc";
/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: &str = "1.0";

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_APP_NAME_LEN: usize = 256;
const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Client handshake request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol name. Must be `esifrpc` by default.
    pub protocol: String,
    /// Protocol version string, `<major>.<minor>`.
    pub version: String,
    /// Name of the client's scalar wire mode.
    pub wire_mode: String,
    /// Name of the application, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

/// Server handshake response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub protocol: String,
    /// Server protocol version.
    pub version: String,
    /// Server wire mode; equal to the client's on success.
    pub wire_mode: String,
    /// Handle the server assigned to this session.
    pub session_handle: Handle,
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Server-assigned session handle.
    pub session_handle: Handle,
    /// Protocol version of the remote side.
    pub protocol_version: String,
    /// Wire mode shared by both sides.
    pub wire_mode: WireMode,
    /// Application name the client announced.
    pub app_name: Option<String>,
}

/// Configuration for handshake negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Bound on the whole exchange.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Local wire mode.
    pub wire_mode: WireMode,
    /// Maximum handshake payload size in bytes.
    pub max_handshake_payload: usize,
    /// Application name sent by a client.
    pub app_name: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            wire_mode: WIRE_MODE,
            max_handshake_payload: 16 * 1024,
            app_name: None,
        }
    }
}

impl HandshakeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn with_wire_mode(mut self, mode: WireMode) -> Self {
        self.wire_mode = mode;
        self
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("timeout", &self.timeout)
            .field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("wire_mode", &self.wire_mode.name())
            .field("max_handshake_payload", &self.max_handshake_payload)
            .field("app_name", &self.app_name)
            .finish()
    }
}

/// Perform the client side on an upgraded stream.
///
/// `decoder` must already hold any bytes read past the upgrade response;
/// on return it holds whatever arrived after the handshake reply.
pub fn handshake_client<S: Read + Write>(
    stream: &mut S,
    decoder: &mut WsDecoder,
    ws: &WsConfig,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_app_name(config.app_name.as_deref())?;

    let req = HandshakeRequest {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        wire_mode: config.wire_mode.name().to_string(),
        app_name: config.app_name.clone(),
    };
    send_handshake_json(stream, Role::Client, ws, &req)?;

    let deadline = Instant::now() + config.timeout;
    let payload = recv_handshake_payload(stream, decoder, Role::Client, ws, deadline, config)?;
    let resp: HandshakeResponse = serde_json::from_slice(&payload)?;

    validate_protocol_name(&resp.protocol)?;
    validate_version(&resp.version)?;

    if resp.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            resp.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&config.protocol_version, &resp.version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            resp.version, config.protocol_version
        )));
    }

    let wire_mode = parse_wire_mode(&resp.wire_mode)?;
    if wire_mode != config.wire_mode {
        return Err(PeerError::HandshakeFailed(format!(
            "wire mode mismatch: server '{}', local '{}'",
            resp.wire_mode, config.wire_mode
        )));
    }

    if resp.session_handle == INVALID_HANDLE {
        return Err(PeerError::HandshakeFailed(
            "server returned an invalid session handle".to_string(),
        ));
    }

    tracing::debug!(
        session = resp.session_handle,
        version = %resp.version,
        wire_mode = %wire_mode,
        "client handshake complete"
    );

    Ok(HandshakeResult {
        session_handle: resp.session_handle,
        protocol_version: resp.version,
        wire_mode,
        app_name: config.app_name.clone(),
    })
}

/// Perform the server side on an upgraded stream.
///
/// `assign` runs only after the request validated and returns the handle
/// sent back to the client. On any failure the client is sent a CLOSE frame
/// with the reason before the error is returned.
pub fn handshake_server<S, F>(
    stream: &mut S,
    decoder: &mut WsDecoder,
    ws: &WsConfig,
    config: &HandshakeConfig,
    assign: F,
) -> Result<HandshakeResult>
where
    S: Read + Write,
    F: FnOnce(&HandshakeRequest) -> Result<Handle>,
{
    let result = negotiate_server(stream, decoder, ws, config, assign);
    if let Err(err) = &result {
        tracing::warn!(error = %err, "server handshake failed");
        if !matches!(err, PeerError::Disconnected(_)) {
            let _ = send_close(stream, ws, close_code::PROTOCOL_ERROR, &err.to_string());
        }
    }
    result
}

fn negotiate_server<S, F>(
    stream: &mut S,
    decoder: &mut WsDecoder,
    ws: &WsConfig,
    config: &HandshakeConfig,
    assign: F,
) -> Result<HandshakeResult>
where
    S: Read + Write,
    F: FnOnce(&HandshakeRequest) -> Result<Handle>,
{
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    let deadline = Instant::now() + config.timeout;
    let payload = recv_handshake_payload(stream, decoder, Role::Server, ws, deadline, config)?;
    let req: HandshakeRequest = serde_json::from_slice(&payload)?;

    validate_protocol_name(&req.protocol)?;
    validate_version(&req.version)?;
    validate_app_name(req.app_name.as_deref())?;

    if req.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            req.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&req.version, &config.protocol_version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (server '{}')",
            req.version, config.protocol_version
        )));
    }

    let wire_mode = parse_wire_mode(&req.wire_mode)?;
    if wire_mode != config.wire_mode {
        return Err(PeerError::HandshakeFailed(format!(
            "wire mode mismatch: client '{}', server '{}'",
            req.wire_mode, config.wire_mode
        )));
    }

    let session_handle = assign(&req)?;
    let resp = HandshakeResponse {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        wire_mode: config.wire_mode.name().to_string(),
        session_handle,
    };
    send_handshake_json(stream, Role::Server, ws, &resp)?;

    tracing::debug!(
        session = session_handle,
        app = req.app_name.as_deref().unwrap_or("-"),
        version = %req.version,
        "server handshake complete"
    );

    Ok(HandshakeResult {
        session_handle,
        protocol_version: req.version,
        wire_mode,
        app_name: req.app_name,
    })
}

fn send_handshake_json<T: Serialize, S: Write>(
    stream: &mut S,
    role: Role,
    ws: &WsConfig,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    let mut message = BytesMut::with_capacity(body.len() + esifrpc_frame::BASE_HEADER_SIZE);
    esifrpc_frame::encode_message(MessageClass::HANDSHAKE, &body, &mut message)
        .map_err(FrameError::from)?;
    send_ws(stream, role, ws, Opcode::Binary, &message)
}

fn send_close<S: Write>(stream: &mut S, ws: &WsConfig, code: u16, reason: &str) -> Result<()> {
    send_ws(stream, Role::Server, ws, Opcode::Close, &close_payload(code, reason))
}

fn send_ws<S: Write>(stream: &mut S, role: Role, ws: &WsConfig, opcode: Opcode, payload: &[u8]) -> Result<()> {
    let mut out = BytesMut::new();
    esifrpc_frame::ws::encode_message(role, ws, opcode, payload, &mut out)?;
    stream.write_all(&out).map_err(FrameError::Io)?;
    stream.flush().map_err(FrameError::Io)?;
    Ok(())
}

fn recv_handshake_payload<S: Read + Write>(
    stream: &mut S,
    decoder: &mut WsDecoder,
    role: Role,
    ws: &WsConfig,
    deadline: Instant,
    config: &HandshakeConfig,
) -> Result<Vec<u8>> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        while let Some(message) = decoder.next_message()? {
            match message.opcode {
                Opcode::Binary => {
                    let (header, payload) =
                        esifrpc_frame::get_payload(&message.payload).map_err(FrameError::from)?;
                    if header.class != MessageClass::HANDSHAKE {
                        return Err(PeerError::HandshakeFailed(format!(
                            "expected {} message, got {}",
                            MessageClass::HANDSHAKE,
                            header.class
                        )));
                    }
                    if payload.len() > config.max_handshake_payload {
                        return Err(PeerError::HandshakeFailed(format!(
                            "handshake payload too large: {} (max {})",
                            payload.len(),
                            config.max_handshake_payload
                        )));
                    }
                    return Ok(payload.to_vec());
                }
                Opcode::Ping => send_ws(stream, role, ws, Opcode::Pong, &message.payload)?,
                Opcode::Pong => {}
                Opcode::Close => {
                    return Err(PeerError::Disconnected(
                        "peer closed during handshake".to_string(),
                    ));
                }
                other => {
                    return Err(PeerError::HandshakeFailed(format!(
                        "unexpected {} message during handshake",
                        other.name()
                    )));
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(PeerError::Timeout(config.timeout));
        }

        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(PeerError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Ok(n) => decoder.push(&chunk[..n]),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) => return Err(PeerError::Frame(FrameError::Io(err))),
        }
    }
}

fn parse_wire_mode(name: &str) -> Result<WireMode> {
    WireMode::from_name(name)
        .ok_or_else(|| PeerError::HandshakeFailed(format!("unknown wire mode '{name}'")))
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

fn validate_app_name(name: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        if name.is_empty() || name.len() > MAX_APP_NAME_LEN {
            return Err(PeerError::HandshakeFailed(format!(
                "invalid app_name length: {}",
                name.len()
            )));
        }
    }
    Ok(())
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| PeerError::HandshakeFailed(format!("invalid version '{version}': {why}"));

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
    if minor.contains('.') {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}
