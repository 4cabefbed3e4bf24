use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use esifrpc_transport::IpcStream;

use super::frame::{close_payload, encode_frame, Opcode, WsFrame};
use super::{Role, WsConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Encode a whole message as one or more frames into `dst`.
///
/// Frames sent by `role` are masked with a fresh random key per frame when
/// the configuration calls for it. Data messages larger than
/// `config.fragment_size` are split into a first frame plus `CONTINUATION`
/// frames.
pub fn encode_message(
    role: Role,
    config: &WsConfig,
    opcode: Opcode,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > config.max_message_size {
        return Err(FrameError::MessageTooLarge {
            size: payload.len(),
            max: config.max_message_size,
        });
    }
    let masked = config.masks_outgoing(role);
    let chunk = match config.fragment_size {
        Some(size) if !opcode.is_control() && payload.len() > size => size,
        _ => {
            let frame = WsFrame::new(opcode, payload.to_vec()).with_mask(mask_key(masked));
            return encode_frame(&frame, dst);
        }
    };

    let mut pieces = payload.chunks(chunk).peekable();
    let mut frame_opcode = opcode;
    while let Some(piece) = pieces.next() {
        let frame = WsFrame::new(frame_opcode, piece.to_vec())
            .with_fin(pieces.peek().is_none())
            .with_mask(mask_key(masked));
        encode_frame(&frame, dst)?;
        frame_opcode = Opcode::Continuation;
    }
    Ok(())
}

fn mask_key(masked: bool) -> Option<[u8; 4]> {
    masked.then(rand::random::<[u8; 4]>)
}

/// Writes complete WebSocket messages to any `Write` stream.
pub struct WsWriter<T> {
    inner: T,
    buf: BytesMut,
    role: Role,
    config: WsConfig,
}

impl<T: Write> WsWriter<T> {
    /// Create a new writer with default configuration.
    pub fn new(inner: T, role: Role) -> Self {
        Self::with_config(inner, role, WsConfig::default())
    }

    /// Create a new writer with explicit configuration.
    pub fn with_config(inner: T, role: Role, config: WsConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            role,
            config,
        }
    }

    /// Send a binary message.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.send_message(Opcode::Binary, payload)
    }

    /// Send a message with an explicit opcode (blocking).
    pub fn send_message(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_message(self.role, &self.config, opcode, payload, &mut self.buf)?;
        self.write_buffer()
    }

    /// Send a single pre-built frame as-is.
    pub fn write_frame(&mut self, frame: &WsFrame) -> Result<()> {
        self.buf.clear();
        encode_frame(frame, &mut self.buf)?;
        self.write_buffer()
    }

    pub fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send_message(Opcode::Ping, payload)
    }

    pub fn pong(&mut self, payload: &[u8]) -> Result<()> {
        self.send_message(Opcode::Pong, payload)
    }

    /// Send a CLOSE frame with a status code and reason.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let payload = close_payload(code, reason);
        self.send_message(Opcode::Close, &payload)
    }

    fn write_buffer(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

impl WsWriter<IpcStream> {
    /// Create a writer for `IpcStream` and apply the write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, role: Role, config: WsConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, role, config))
    }
}

pub(crate) fn transport_to_frame_error(err: esifrpc_transport::TransportError) -> FrameError {
    use esifrpc_transport::TransportError;
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
