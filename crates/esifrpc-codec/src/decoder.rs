use crate::data::{DataType, EsifData};
use crate::encoder::{MAX_ARRAY_DEPTH, NULL_OFFSET};
use crate::error::{CodecError, Result};
use crate::scalar::{Scalar, WireMode, OFFSET_WIDTH, WIRE_MODE};

/// Sequential reader over an encoded call.
///
/// Every referenced range is bounds-checked against the whole buffer before
/// it is read, and the bytes are copied out; decoded values never borrow
/// from the input.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    mode: WireMode,
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    /// Decoder for this build's wire mode.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_mode(buf, WIRE_MODE)
    }

    pub fn with_mode(buf: &'a [u8], mode: WireMode) -> Self {
        Self {
            mode,
            buf,
            pos: 0,
            depth: 0,
        }
    }

    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = resolve(self.buf, self.pos, len)?;
        self.pos += len;
        Ok(bytes)
    }

    /// Read one scalar field.
    pub fn scalar<T: Scalar>(&mut self) -> Result<T> {
        let width = self.mode.width(T::WIDTH);
        let bytes = self.take(width)?;
        T::from_wire(self.mode.get(bytes), width)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.scalar()
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.scalar()
    }

    fn offset(&mut self) -> Result<u32> {
        let bytes = self.take(OFFSET_WIDTH)?;
        Ok(self.mode.get(bytes) as u32)
    }

    /// Read an EsifData reference and copy out its bytes.
    pub fn data(&mut self) -> Result<EsifData> {
        let data_type = DataType::from_u32(self.u32()?);
        let buf_len = self.u32()?;
        let data_len = self.u32()?;
        let offset = self.offset()?;
        let ref_end = self.pos;

        let data = match self.resolve_ref(ref_end, offset, data_len)? {
            None => None,
            Some(bytes) => {
                if data_len > buf_len {
                    return Err(CodecError::Malformed(format!(
                        "data_len {data_len} exceeds buf_len {buf_len}"
                    )));
                }
                if data_type == DataType::Array {
                    self.validate_array(bytes)?;
                }
                Some(bytes.to_vec())
            }
        };

        Ok(EsifData {
            data_type,
            buf_len,
            data_len,
            data,
        })
    }

    /// Read an `Array` EsifData and decode its items.
    ///
    /// A NULL reference yields an empty list.
    pub fn array(&mut self) -> Result<Vec<EsifData>> {
        let value = self.data()?;
        match (value.data_type, value.data) {
            (_, None) => Ok(Vec::new()),
            (DataType::Array, Some(bytes)) => self.nested(&bytes).items(),
            (other, Some(_)) => Err(CodecError::Malformed(format!(
                "expected Array, found {other:?}"
            ))),
        }
    }

    /// Validated resolution of `ref_end + offset`; `None` for NULL.
    fn resolve_ref(&self, ref_end: usize, offset: u32, len: u32) -> Result<Option<&'a [u8]>> {
        if offset == NULL_OFFSET {
            return Ok(None);
        }
        let start = ref_end
            .checked_add(offset as usize)
            .ok_or(CodecError::OutOfBounds {
                offset: usize::MAX,
                len: len as usize,
                available: self.buf.len(),
            })?;
        resolve(self.buf, start, len as usize).map(Some)
    }

    fn nested<'b>(&self, bytes: &'b [u8]) -> Decoder<'b> {
        Decoder {
            mode: self.mode,
            buf: bytes,
            pos: 0,
            depth: self.depth + 1,
        }
    }

    fn validate_array(&self, bytes: &[u8]) -> Result<()> {
        self.nested(bytes).items().map(|_| ())
    }

    fn items(mut self) -> Result<Vec<EsifData>> {
        if self.depth > MAX_ARRAY_DEPTH {
            return Err(CodecError::Malformed(format!(
                "array nesting exceeds {MAX_ARRAY_DEPTH}"
            )));
        }
        let count = self.u32()? as usize;
        let min_item = 3 * self.mode.width(4) + OFFSET_WIDTH;
        if count.saturating_mul(min_item) > self.remaining() {
            return Err(CodecError::OutOfBounds {
                offset: self.pos,
                len: count.saturating_mul(min_item),
                available: self.buf.len(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.data()?);
        }
        Ok(items)
    }
}

fn resolve(buf: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    start
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .map(|end| &buf[start..end])
        .ok_or(CodecError::OutOfBounds {
            offset: start,
            len,
            available: buf.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    fn encode(mode: WireMode, build: impl FnOnce(&mut Encoder)) -> Vec<u8> {
        let mut enc = Encoder::with_mode(mode);
        build(&mut enc);
        enc.finish().unwrap().to_vec()
    }

    #[test]
    fn scalars_and_data_in_every_mode() {
        for mode in WireMode::ALL {
            let bytes = encode(mode, |enc| {
                enc.scalar(-5i32).unwrap();
                enc.data(&EsifData::string("hello")).unwrap();
                enc.u64(u64::MAX - 1).unwrap();
                enc.data(&EsifData::null()).unwrap();
                enc.scalar(0xABu8).unwrap();
            });

            let mut dec = Decoder::with_mode(&bytes, mode);
            assert_eq!(dec.scalar::<i32>().unwrap(), -5, "{mode}");
            assert_eq!(dec.data().unwrap().as_str(), Some("hello"));
            assert_eq!(dec.u64().unwrap(), u64::MAX - 1);
            assert!(dec.data().unwrap().is_null());
            assert_eq!(dec.scalar::<u8>().unwrap(), 0xAB);
        }
    }

    #[test]
    fn empty_and_max_values() {
        let empty = EsifData::binary(Vec::new());
        let big = EsifData::binary(vec![0x5A; 70_000]);
        let bytes = encode(WIRE_MODE, |enc| {
            enc.data(&empty).unwrap();
            enc.data(&big).unwrap();
            enc.u32(u32::MAX).unwrap();
        });

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.data().unwrap(), empty);
        assert_eq!(dec.data().unwrap(), big);
        assert_eq!(dec.u32().unwrap(), u32::MAX);
    }

    #[test]
    fn need_larger_buffer_shape_survives() {
        let answer = EsifData::need_larger(DataType::String, 8, 256);
        let bytes = encode(WIRE_MODE, |enc| enc.data(&answer).unwrap());
        assert_eq!(Decoder::new(&bytes).data().unwrap(), answer);
    }

    #[test]
    fn arrays_roundtrip_with_nesting() {
        let inner = vec![EsifData::u32(1), EsifData::string("x")];
        let bytes = encode(WIRE_MODE, |enc| {
            let mut nested = Encoder::new();
            nested.u32(inner.len() as u32).unwrap();
            for item in &inner {
                nested.data(item).unwrap();
            }
            let nested = EsifData::from_bytes(DataType::Array, nested.finish().unwrap().to_vec());
            enc.array(&[EsifData::string("cmd"), nested, EsifData::null()])
                .unwrap();
        });

        let items = Decoder::new(&bytes).array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_str(), Some("cmd"));
        assert!(items[2].is_null());

        let mut dec = Decoder::new(items[1].bytes().unwrap());
        assert_eq!(dec.clone().items().unwrap(), inner);
        assert_eq!(dec.u32().unwrap(), 2);
    }

    #[test]
    fn truncated_scalar_fails() {
        let bytes = encode(WireMode::COMPACT_LE, |enc| enc.u32(1).unwrap());
        let mut dec = Decoder::with_mode(&bytes[..3], WireMode::COMPACT_LE);
        assert!(matches!(dec.u32(), Err(CodecError::OutOfBounds { .. })));
    }

    fn patch_offset(bytes: &mut [u8], at: usize, value: u32) {
        WireMode::COMPACT_LE.put(value as u64, 4, &mut bytes[at..at + 4]);
    }

    #[test]
    fn hostile_offsets_fail() {
        let base = encode(WireMode::COMPACT_LE, |enc| {
            enc.data(&EsifData::binary(vec![1, 2, 3, 4])).unwrap()
        });
        assert_eq!(base.len(), 20);

        for offset in [1u32, 4, 0x7FFF_FFFF, NULL_OFFSET - 1] {
            let mut bytes = base.clone();
            patch_offset(&mut bytes, 12, offset);
            let err = Decoder::with_mode(&bytes, WireMode::COMPACT_LE)
                .data()
                .unwrap_err();
            assert!(
                matches!(err, CodecError::OutOfBounds { .. }),
                "offset {offset}: {err:?}"
            );
        }
    }

    #[test]
    fn hostile_lengths_fail() {
        let base = encode(WireMode::COMPACT_LE, |enc| {
            enc.data(&EsifData::binary(vec![1, 2, 3, 4])).unwrap()
        });

        // data_len past the end of the buffer.
        let mut bytes = base.clone();
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Decoder::with_mode(&bytes, WireMode::COMPACT_LE).data(),
            Err(CodecError::OutOfBounds { .. })
        ));

        // data_len larger than buf_len.
        let mut bytes = base;
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            Decoder::with_mode(&bytes, WireMode::COMPACT_LE).data(),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn hostile_array_count_fails() {
        let bytes = encode(WireMode::COMPACT_LE, |enc| {
            let mut nested = Encoder::with_mode(WireMode::COMPACT_LE);
            nested.u32(1_000_000).unwrap();
            let nested = EsifData::from_bytes(DataType::Array, nested.finish().unwrap().to_vec());
            enc.data(&nested).unwrap();
        });
        assert!(matches!(
            Decoder::with_mode(&bytes, WireMode::COMPACT_LE).data(),
            Err(CodecError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn mode_mismatch_misreads_layout() {
        let bytes = encode(WireMode::UNIFORM64_LE, |enc| enc.u32(7).unwrap());
        let mut dec = Decoder::with_mode(&bytes, WireMode::COMPACT_LE);
        assert_eq!(dec.u32().unwrap(), 7);
        assert_eq!(dec.remaining(), 4);
    }
}
