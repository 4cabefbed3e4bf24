use bytes::{Bytes, BytesMut};

use super::frame::{decode_frame, Opcode, WsFrame};
use super::{Role, WsMessage};
use crate::error::{FrameError, Result};

/// Turns a sequence of frames into complete messages.
///
/// Data frames may be fragmented (`fin = 0` followed by `CONTINUATION`
/// frames); the message carries the opcode of the first fragment. Control
/// frames may interleave with fragments and are returned immediately.
#[derive(Debug)]
pub struct Reassembler {
    role: Role,
    max_message_size: usize,
    partial: Option<(Opcode, BytesMut)>,
}

impl Reassembler {
    pub fn new(role: Role, max_message_size: usize) -> Self {
        Self {
            role,
            max_message_size,
            partial: None,
        }
    }

    /// Decode frames from the front of `src` until a message completes.
    ///
    /// Returns `Ok(None)` when `src` runs out before that.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WsMessage>> {
        loop {
            let Some(frame) = decode_frame(src, self.max_message_size)? else {
                return Ok(None);
            };
            if let Some(message) = self.push_frame(frame)? {
                return Ok(Some(message));
            }
        }
    }

    /// Feed one already-decoded frame.
    pub fn push_frame(&mut self, frame: WsFrame) -> Result<Option<WsMessage>> {
        if self.role == Role::Server && frame.mask.is_none() {
            return Err(FrameError::Protocol(
                "client frame is not masked".to_string(),
            ));
        }
        tracing::trace!(
            opcode = frame.opcode.name(),
            fin = frame.fin,
            len = frame.payload.len(),
            "websocket frame"
        );

        if frame.opcode.is_control() {
            return Ok(Some(WsMessage::new(frame.opcode, frame.payload)));
        }

        match frame.opcode {
            Opcode::Continuation => self.continue_message(frame),
            opcode if self.partial.is_some() => Err(FrameError::Protocol(format!(
                "{} frame while a fragmented message is in progress",
                opcode.name()
            ))),
            opcode if frame.fin => Ok(Some(WsMessage::new(opcode, frame.payload))),
            opcode => {
                self.partial = Some((opcode, BytesMut::from(frame.payload.as_ref())));
                Ok(None)
            }
        }
    }

    fn continue_message(&mut self, frame: WsFrame) -> Result<Option<WsMessage>> {
        let Some((_, buf)) = self.partial.as_mut() else {
            return Err(FrameError::Protocol(
                "continuation frame without a message in progress".to_string(),
            ));
        };
        let size = buf.len() + frame.payload.len();
        if size > self.max_message_size {
            self.partial = None;
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        buf.extend_from_slice(&frame.payload);
        if !frame.fin {
            return Ok(None);
        }
        Ok(self
            .partial
            .take()
            .map(|(opcode, buf)| WsMessage::new(opcode, buf.freeze())))
    }

    /// Whether a fragmented message is partly received.
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// Push-based decoder: feed raw socket bytes, pull complete messages.
///
/// Used by non-blocking I/O loops that read whatever is available and then
/// drain all messages it completed.
#[derive(Debug)]
pub struct WsDecoder {
    buf: BytesMut,
    reassembler: Reassembler,
}

impl WsDecoder {
    pub fn new(role: Role, max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            reassembler: Reassembler::new(role, max_message_size),
        }
    }

    /// Seed the decoder with bytes that arrived along with the handshake.
    pub fn with_leftover(mut self, leftover: impl Into<Bytes>) -> Self {
        let leftover: Bytes = leftover.into();
        self.buf.extend_from_slice(&leftover);
        self
    }

    /// Append raw bytes from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, if the buffered bytes hold one.
    pub fn next_message(&mut self) -> Result<Option<WsMessage>> {
        self.reassembler.decode(&mut self.buf)
    }

    /// Bytes received but not yet decoded.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::encode_frame;
    use crate::ws::DEFAULT_MAX_MESSAGE;

    const KEY: Option<[u8; 4]> = Some([9, 8, 7, 6]);

    fn wire(frames: &[WsFrame]) -> BytesMut {
        let mut out = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn three_fragment_reassembly() {
        let mut src = wire(&[
            WsFrame::new(Opcode::Binary, "one-").with_fin(false),
            WsFrame::new(Opcode::Continuation, "two-").with_fin(false),
            WsFrame::new(Opcode::Continuation, "three"),
        ]);

        let mut r = Reassembler::new(Role::Client, DEFAULT_MAX_MESSAGE);
        let msg = r.decode(&mut src).unwrap().unwrap();
        assert_eq!(msg.opcode, Opcode::Binary);
        assert_eq!(msg.payload.as_ref(), b"one-two-three");
        assert!(src.is_empty());
        assert!(!r.in_progress());
    }

    #[test]
    fn control_frames_interleave() {
        let mut src = wire(&[
            WsFrame::new(Opcode::Text, "a").with_fin(false),
            WsFrame::new(Opcode::Ping, "p"),
            WsFrame::new(Opcode::Continuation, "b"),
        ]);

        let mut r = Reassembler::new(Role::Client, DEFAULT_MAX_MESSAGE);
        let ping = r.decode(&mut src).unwrap().unwrap();
        assert_eq!(ping, WsMessage::new(Opcode::Ping, "p"));
        assert!(r.in_progress());

        let text = r.decode(&mut src).unwrap().unwrap();
        assert_eq!(text, WsMessage::new(Opcode::Text, "ab"));
    }

    #[test]
    fn server_requires_masked_frames() {
        let mut unmasked = wire(&[WsFrame::new(Opcode::Binary, "x")]);
        let mut r = Reassembler::new(Role::Server, DEFAULT_MAX_MESSAGE);
        assert!(matches!(
            r.decode(&mut unmasked),
            Err(FrameError::Protocol(_))
        ));

        let mut masked = wire(&[WsFrame::new(Opcode::Binary, "x").with_mask(KEY)]);
        let mut r = Reassembler::new(Role::Server, DEFAULT_MAX_MESSAGE);
        assert_eq!(
            r.decode(&mut masked).unwrap().unwrap().payload.as_ref(),
            b"x"
        );
    }

    #[test]
    fn client_accepts_masked_and_unmasked() {
        let mut src = wire(&[
            WsFrame::new(Opcode::Binary, "a"),
            WsFrame::new(Opcode::Binary, "b").with_mask(KEY),
        ]);
        let mut r = Reassembler::new(Role::Client, DEFAULT_MAX_MESSAGE);
        assert_eq!(r.decode(&mut src).unwrap().unwrap().payload.as_ref(), b"a");
        assert_eq!(r.decode(&mut src).unwrap().unwrap().payload.as_ref(), b"b");
    }

    #[test]
    fn stray_continuation_rejected() {
        let mut src = wire(&[WsFrame::new(Opcode::Continuation, "x")]);
        let mut r = Reassembler::new(Role::Client, DEFAULT_MAX_MESSAGE);
        assert!(matches!(r.decode(&mut src), Err(FrameError::Protocol(_))));
    }

    #[test]
    fn new_data_frame_mid_message_rejected() {
        let mut src = wire(&[
            WsFrame::new(Opcode::Binary, "x").with_fin(false),
            WsFrame::new(Opcode::Binary, "y"),
        ]);
        let mut r = Reassembler::new(Role::Client, DEFAULT_MAX_MESSAGE);
        assert!(matches!(r.decode(&mut src), Err(FrameError::Protocol(_))));
    }

    #[test]
    fn reassembly_bounded_by_max_message() {
        let mut src = wire(&[
            WsFrame::new(Opcode::Binary, vec![0u8; 10]).with_fin(false),
            WsFrame::new(Opcode::Continuation, vec![0u8; 10]),
        ]);
        let mut r = Reassembler::new(Role::Client, 16);
        assert!(matches!(
            r.decode(&mut src),
            Err(FrameError::MessageTooLarge { size: 20, max: 16 })
        ));
        assert!(!r.in_progress());
    }

    #[test]
    fn push_decoder_byte_at_a_time() {
        let bytes = wire(&[
            WsFrame::new(Opcode::Binary, "hello").with_fin(false).with_mask(KEY),
            WsFrame::new(Opcode::Continuation, " world").with_mask(KEY),
            WsFrame::new(Opcode::Close, "").with_mask(KEY),
        ]);

        let mut decoder = WsDecoder::new(Role::Server, DEFAULT_MAX_MESSAGE);
        let mut messages = Vec::new();
        for byte in bytes.iter() {
            decoder.push(&[*byte]);
            while let Some(msg) = decoder.next_message().unwrap() {
                messages.push(msg);
            }
        }

        assert_eq!(
            messages,
            vec![
                WsMessage::new(Opcode::Binary, "hello world"),
                WsMessage::new(Opcode::Close, ""),
            ]
        );
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn leftover_seeds_decoder() {
        let bytes = wire(&[WsFrame::new(Opcode::Binary, "early")]);
        let mut decoder =
            WsDecoder::new(Role::Client, DEFAULT_MAX_MESSAGE).with_leftover(bytes.freeze());
        assert_eq!(
            decoder.next_message().unwrap().unwrap().payload.as_ref(),
            b"early"
        );
    }
}
