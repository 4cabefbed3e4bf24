use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::decoder::Reassembler;
use super::writer::encode_message;
use super::{Role, WsConfig, WsMessage};
use crate::error::FrameError;

/// `tokio_util` codec over an already-upgraded WebSocket stream.
///
/// Decodes reassembled messages (control messages included) and encodes
/// whole messages with the same masking and fragmentation rules as
/// [`WsWriter`](super::WsWriter).
#[derive(Debug)]
pub struct WsCodec {
    role: Role,
    config: WsConfig,
    reassembler: Reassembler,
}

impl WsCodec {
    pub fn new(role: Role) -> Self {
        Self::with_config(role, WsConfig::default())
    }

    pub fn with_config(role: Role, config: WsConfig) -> Self {
        Self {
            role,
            reassembler: Reassembler::new(role, config.max_message_size),
            config,
        }
    }
}

impl Decoder for WsCodec {
    type Item = WsMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.reassembler.decode(src)
    }
}

impl Encoder<WsMessage> for WsCodec {
    type Error = FrameError;

    fn encode(&mut self, item: WsMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(self.role, &self.config, item.opcode, &item.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::ws::frame::Opcode;

    #[tokio::test]
    async fn client_to_server_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut sink = FramedWrite::new(client_io, WsCodec::new(Role::Client));
        let mut stream = FramedRead::new(server_io, WsCodec::new(Role::Server));

        sink.send(WsMessage::binary(&b"first"[..])).await.unwrap();
        sink.send(WsMessage::new(Opcode::Ping, &b"hb"[..]))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, WsMessage::binary(&b"first"[..]));
        let ping = stream.next().await.unwrap().unwrap();
        assert_eq!(ping.opcode, Opcode::Ping);
        assert_eq!(ping.payload.as_ref(), b"hb");
    }

    #[tokio::test]
    async fn fragmented_messages_reassemble() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let cfg = WsConfig::default().with_fragment_size(Some(3));
        let mut sink = FramedWrite::new(client_io, WsCodec::with_config(Role::Client, cfg));
        let mut stream = FramedRead::new(server_io, WsCodec::new(Role::Server));

        sink.send(WsMessage::binary(&b"fragmented payload"[..]))
            .await
            .unwrap();
        let msg = stream.next().await.unwrap().unwrap();
        assert_eq!(msg.payload.as_ref(), b"fragmented payload");
    }

    #[tokio::test]
    async fn server_rejects_unmasked_frames() {
        let (server_side_writer, server_io) = tokio::io::duplex(1024);
        // A server-role encoder does not mask, which a server must refuse.
        let mut sink = FramedWrite::new(server_side_writer, WsCodec::new(Role::Server));
        let mut stream = FramedRead::new(server_io, WsCodec::new(Role::Server));

        sink.send(WsMessage::binary(&b"x"[..])).await.unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::Protocol(_)));
    }
}
