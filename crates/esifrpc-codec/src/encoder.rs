use esifrpc_frame::ByteBuffer;

use crate::data::{DataType, EsifData};
use crate::error::{CodecError, Result};
use crate::scalar::{Scalar, WireMode, OFFSET_WIDTH, WIRE_MODE};

/// Offset value marking a NULL reference.
pub const NULL_OFFSET: u32 = 0xFFFF_FFFF;

/// Maximum nesting of `Array` values.
pub const MAX_ARRAY_DEPTH: usize = 8;

struct PendingRef {
    /// Position of the 4-byte offset field in the prefix.
    offset_at: usize,
    data: Vec<u8>,
}

/// Two-pass call builder.
///
/// Scalars and reference fields are written in order into the fixed prefix;
/// each reference starts out NULL and is remembered. [`finish`] appends the
/// referenced bytes after the prefix and patches every offset.
///
/// [`finish`]: Encoder::finish
pub struct Encoder {
    mode: WireMode,
    prefix: ByteBuffer,
    pending: Vec<PendingRef>,
    depth: usize,
}

impl Encoder {
    /// Encoder for this build's wire mode.
    pub fn new() -> Self {
        Self::with_mode(WIRE_MODE)
    }

    pub fn with_mode(mode: WireMode) -> Self {
        Self {
            mode,
            prefix: ByteBuffer::new(),
            pending: Vec::new(),
            depth: 0,
        }
    }

    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Write one scalar field.
    pub fn scalar<T: Scalar>(&mut self, value: T) -> Result<()> {
        let width = self.mode.width(T::WIDTH);
        let mut raw = [0u8; 8];
        self.mode.put(value.to_wire(), width, &mut raw);
        self.prefix.append(&raw[..width])?;
        Ok(())
    }

    pub fn u32(&mut self, value: u32) -> Result<()> {
        self.scalar(value)
    }

    pub fn u64(&mut self, value: u64) -> Result<()> {
        self.scalar(value)
    }

    /// Write an EsifData reference; its bytes follow the prefix.
    pub fn data(&mut self, value: &EsifData) -> Result<()> {
        if let Some(bytes) = &value.data {
            if bytes.len() != value.data_len as usize {
                return Err(CodecError::Malformed(format!(
                    "data_len {} does not match {} data bytes",
                    value.data_len,
                    bytes.len()
                )));
            }
            if value.data_len > value.buf_len {
                return Err(CodecError::Malformed(format!(
                    "data_len {} exceeds buf_len {}",
                    value.data_len, value.buf_len
                )));
            }
        }
        self.u32(value.data_type.as_u32())?;
        self.u32(value.buf_len)?;
        self.u32(value.data_len)?;
        self.reference(value.data.clone())
    }

    /// Write a list of values as one `Array` EsifData.
    pub fn array(&mut self, items: &[EsifData]) -> Result<()> {
        let bytes = self.nested_array(items)?;
        self.data(&EsifData::from_bytes(DataType::Array, bytes))
    }

    fn nested_array(&self, items: &[EsifData]) -> Result<Vec<u8>> {
        if self.depth >= MAX_ARRAY_DEPTH {
            return Err(CodecError::Malformed(format!(
                "array nesting exceeds {MAX_ARRAY_DEPTH}"
            )));
        }
        let mut inner = Encoder::with_mode(self.mode);
        inner.depth = self.depth + 1;
        let count = u32::try_from(items.len()).map_err(|_| CodecError::TooLarge(items.len()))?;
        inner.u32(count)?;
        for item in items {
            inner.data(item)?;
        }
        Ok(inner.finish()?.to_vec())
    }

    fn reference(&mut self, data: Option<Vec<u8>>) -> Result<()> {
        let offset_at = self.put_offset(NULL_OFFSET)?;
        if let Some(data) = data {
            self.pending.push(PendingRef { offset_at, data });
        }
        Ok(())
    }

    fn put_offset(&mut self, offset: u32) -> Result<usize> {
        let mut raw = [0u8; OFFSET_WIDTH];
        self.mode.put(offset as u64, OFFSET_WIDTH, &mut raw);
        Ok(self.prefix.append(&raw)?)
    }

    /// Append all referenced data and patch the offsets.
    pub fn finish(self) -> Result<ByteBuffer> {
        let Self {
            mode,
            mut prefix,
            pending,
            ..
        } = self;

        for entry in pending {
            let ref_end = entry.offset_at + OFFSET_WIDTH;
            let start = prefix.append(&entry.data)?;
            let offset = u32::try_from(start - ref_end)
                .ok()
                .filter(|offset| *offset != NULL_OFFSET)
                .ok_or(CodecError::TooLarge(start))?;
            let mut raw = [0u8; OFFSET_WIDTH];
            mode.put(offset as u64, OFFSET_WIDTH, &mut raw);
            prefix.copy_over(&raw, entry.offset_at)?;
        }

        if prefix.len() > u32::MAX as usize {
            return Err(CodecError::TooLarge(prefix.len()));
        }
        Ok(prefix)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
