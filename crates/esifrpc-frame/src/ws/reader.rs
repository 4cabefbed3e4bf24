use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use esifrpc_transport::IpcStream;

use super::decoder::Reassembler;
use super::writer::transport_to_frame_error;
use super::{Role, WsConfig, WsMessage};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete WebSocket messages from any `Read` stream.
///
/// Handles partial reads and fragment reassembly internally. Control
/// messages are returned to the caller, which owns the connection policy
/// (answering PING, echoing CLOSE).
pub struct WsReader<T> {
    inner: T,
    buf: BytesMut,
    reassembler: Reassembler,
    config: WsConfig,
}

impl<T: Read> WsReader<T> {
    /// Create a new reader with default configuration.
    pub fn new(inner: T, role: Role) -> Self {
        Self::with_config(inner, role, WsConfig::default())
    }

    /// Create a new reader with explicit configuration.
    pub fn with_config(inner: T, role: Role, config: WsConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            reassembler: Reassembler::new(role, config.max_message_size),
            config,
        }
    }

    /// Prepend bytes that were read past the end of the upgrade handshake.
    pub fn with_leftover(mut self, leftover: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(leftover.len() + self.buf.len());
        buf.extend_from_slice(leftover);
        buf.extend_from_slice(&self.buf);
        self.buf = buf;
        self
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<WsMessage> {
        loop {
            if let Some(message) = self.reassembler.decode(&mut self.buf)? {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
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

    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

impl WsReader<IpcStream> {
    /// Create a reader for `IpcStream` and apply the read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, role: Role, config: WsConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, role, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::os::unix::net::UnixStream;

    use super::*;
    use crate::ws::frame::{encode_frame, Opcode, WsFrame};
    use crate::ws::handshake::{client_handshake, server_handshake};
    use crate::ws::writer::WsWriter;

    fn wire(frames: &[WsFrame]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut out).unwrap();
        }
        out.to_vec()
    }

    #[test]
    fn reads_messages_in_order() {
        let bytes = wire(&[
            WsFrame::new(Opcode::Binary, "one"),
            WsFrame::new(Opcode::Ping, ""),
            WsFrame::new(Opcode::Binary, "two"),
        ]);
        let mut reader = WsReader::new(Cursor::new(bytes), Role::Client);

        assert_eq!(reader.read_message().unwrap().payload.as_ref(), b"one");
        assert_eq!(reader.read_message().unwrap().opcode, Opcode::Ping);
        assert_eq!(reader.read_message().unwrap().payload.as_ref(), b"two");
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn byte_by_byte_input() {
        let bytes = wire(&[WsFrame::new(Opcode::Binary, vec![5u8; 200])]);
        let mut reader = WsReader::new(ByteByByte { bytes, pos: 0 }, Role::Client);
        let msg = reader.read_message().unwrap();
        assert_eq!(msg.payload.len(), 200);
    }

    #[test]
    fn eof_mid_frame() {
        let mut bytes = wire(&[WsFrame::new(Opcode::Binary, "truncated")]);
        bytes.truncate(5);
        let mut reader = WsReader::new(Cursor::new(bytes), Role::Client);
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn leftover_is_read_first() {
        let early = wire(&[WsFrame::new(Opcode::Binary, "early")]);
        let later = wire(&[WsFrame::new(Opcode::Binary, "later")]);
        let mut reader = WsReader::new(Cursor::new(later), Role::Client).with_leftover(&early);

        assert_eq!(reader.read_message().unwrap().payload.as_ref(), b"early");
        assert_eq!(reader.read_message().unwrap().payload.as_ref(), b"later");
    }

    #[test]
    fn protocol_error_surfaces() {
        let mut reader = WsReader::new(Cursor::new(vec![0xF2, 0x00]), Role::Client);
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::Protocol(_))
        ));
    }

    #[test]
    fn upgrade_then_exchange_over_socketpair() {
        let (mut client, mut server) = UnixStream::pair().unwrap();

        let server_thread = std::thread::spawn(move || {
            let (_, leftover) = server_handshake(&mut server).unwrap();
            let mut reader = WsReader::new(server.try_clone().unwrap(), Role::Server)
                .with_leftover(&leftover);
            let mut writer = WsWriter::new(server, Role::Server);

            let msg = reader.read_message().unwrap();
            writer.send(&msg.payload).unwrap();
            let ping = reader.read_message().unwrap();
            assert_eq!(ping.opcode, Opcode::Ping);
            writer.pong(&ping.payload).unwrap();
        });

        let leftover = client_handshake(&mut client, "localhost", "/").unwrap();
        let mut reader =
            WsReader::new(client.try_clone().unwrap(), Role::Client).with_leftover(&leftover);
        let mut writer = WsWriter::new(client, Role::Client);

        writer.send(b"echo me").unwrap();
        assert_eq!(reader.read_message().unwrap().payload.as_ref(), b"echo me");

        writer.ping(b"hb").unwrap();
        let pong = reader.read_message().unwrap();
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload.as_ref(), b"hb");

        server_thread.join().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn applies_read_timeout_for_ipc_stream() {
        let (left, _right) = IpcStream::pair().unwrap();
        let cfg = WsConfig::default().with_read_timeout(Some(std::time::Duration::from_millis(10)));
        let mut reader = WsReader::with_config_ipc(left, Role::Client, cfg).unwrap();
        let err = reader.read_message().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut
        ));
    }

    struct ByteByByte {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByte {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }
}
