use bytes::{Bytes, BytesMut};
use esifrpc_frame::{MessageClass, MessageHeader};

use crate::calls::{FunctionId, RpcCall};
use crate::data::ResultCode;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{CodecError, Result};
use crate::scalar::WireMode;

/// Request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    Request,
    Response,
}

impl RpcKind {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Request => 1,
            Self::Response => 2,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            other => Err(CodecError::Malformed(format!("unknown rpc kind {other}"))),
        }
    }
}

/// Header at the start of every `IRPC` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHeader {
    pub kind: RpcKind,
    pub function: FunctionId,
    pub result: ResultCode,
    pub transaction_id: u64,
}

impl RpcHeader {
    pub fn request(function: FunctionId, transaction_id: u64) -> Self {
        Self {
            kind: RpcKind::Request,
            function,
            result: ResultCode::Ok,
            transaction_id,
        }
    }

    /// The response header answering `self`.
    pub fn response(&self, result: ResultCode) -> Self {
        Self {
            kind: RpcKind::Response,
            function: self.function,
            result,
            transaction_id: self.transaction_id,
        }
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.u32(self.kind.as_u32())?;
        enc.u32(self.function.as_u32())?;
        enc.u32(self.result.as_u32())?;
        enc.u64(self.transaction_id)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let kind = RpcKind::from_u32(dec.u32()?)?;
        let function = FunctionId::from_u32(dec.u32()?)?;
        let result = ResultCode::from_u32(dec.u32()?);
        let transaction_id = dec.u64()?;
        Ok(Self {
            kind,
            function,
            result,
            transaction_id,
        })
    }
}

/// Encode a complete `IRPC` message (message header + RPC header + call).
///
/// `call` is `None` for a bare response that carries only a result code.
pub fn encode_call<C: RpcCall>(mode: WireMode, header: &RpcHeader, call: Option<&C>) -> Result<Bytes> {
    if header.function != C::FUNCTION {
        return Err(CodecError::FunctionMismatch {
            expected: C::FUNCTION.to_string(),
            found: header.function.to_string(),
        });
    }
    encode_with(mode, header, |enc| match call {
        Some(call) => call.encode_fields(enc),
        None => Ok(()),
    })
}

/// Encode a response that carries only a result code.
pub fn encode_status(mode: WireMode, header: &RpcHeader) -> Result<Bytes> {
    encode_with(mode, header, |_| Ok(()))
}

fn encode_with(
    mode: WireMode,
    header: &RpcHeader,
    body: impl FnOnce(&mut Encoder) -> Result<()>,
) -> Result<Bytes> {
    let mut enc = Encoder::with_mode(mode);
    header.encode(&mut enc)?;
    body(&mut enc)?;
    let payload = enc.finish()?;

    let mut out = BytesMut::new();
    esifrpc_frame::encode_message(MessageClass::RPC, payload.as_slice(), &mut out)?;
    Ok(out.freeze())
}

/// Validate the message header and read only the RPC header.
///
/// Returns the header plus the `IRPC` payload so the body can be decoded
/// later, possibly on another thread.
pub fn decode_header(mode: WireMode, message: &[u8]) -> Result<(RpcHeader, &[u8])> {
    let (frame_header, payload) = esifrpc_frame::get_payload(message)?;
    if frame_header.class != MessageClass::RPC {
        return Err(CodecError::Malformed(format!(
            "expected IRPC message, found {}",
            frame_header.class
        )));
    }
    let mut dec = Decoder::with_mode(payload, mode);
    let header = RpcHeader::decode(&mut dec)?;
    tracing::trace!(
        kind = ?header.kind,
        function = %header.function,
        transaction = header.transaction_id,
        len = payload.len(),
        "rpc header"
    );
    Ok((header, payload))
}

/// Decode the call body from an `IRPC` payload returned by
/// [`decode_header`].
pub fn decode_call<C: RpcCall>(mode: WireMode, payload: &[u8]) -> Result<(RpcHeader, C)> {
    let mut dec = Decoder::with_mode(payload, mode);
    let header = RpcHeader::decode(&mut dec)?;
    if header.function != C::FUNCTION {
        return Err(CodecError::FunctionMismatch {
            expected: C::FUNCTION.to_string(),
            found: header.function.to_string(),
        });
    }
    let call = C::decode_fields(&mut dec)?;
    Ok((header, call))
}

/// Parse a received message header without checking its class.
pub fn message_class(message: &[u8]) -> Result<MessageClass> {
    let header = MessageHeader::parse(message)?;
    header.verify()?;
    Ok(header.class)
}
