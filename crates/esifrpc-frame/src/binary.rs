use bytes::Bytes;

use crate::error::BufferError;

/// Default reallocation granularity in bytes.
pub const DEFAULT_GROW_BOUNDARY: usize = 256;

type Result<T> = std::result::Result<T, BufferError>;

/// A growable byte buffer with explicit capacity management.
///
/// Capacity grows in multiples of `grow_boundary`; only [`realloc`] sets an
/// exact capacity. Bytes between `len()` and `capacity()` are always zero, so
/// deleted or truncated data can never resurface through a later resize or
/// an encoder that writes into reserved space.
///
/// Every fallible operation is atomic: on error the buffer keeps its prior
/// contents, length and capacity.
///
/// [`realloc`]: ByteBuffer::realloc
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    // `data.len()` is the capacity; `length` is the used prefix.
    data: Vec<u8>,
    length: usize,
    grow_boundary: usize,
}

impl ByteBuffer {
    /// Create an empty buffer with the default grow boundary.
    pub fn new() -> Self {
        Self::with_boundary(DEFAULT_GROW_BOUNDARY)
    }

    /// Create an empty buffer with an explicit grow boundary (minimum 1).
    pub fn with_boundary(grow_boundary: usize) -> Self {
        Self {
            data: Vec::new(),
            length: 0,
            grow_boundary: grow_boundary.max(1),
        }
    }

    /// Create a buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut buf = Self::new();
        buf.append(bytes)?;
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn grow_boundary(&self) -> usize {
        self.grow_boundary
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.length]
    }

    /// Append `bytes` at the end; returns the offset they were written at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        let at = self.length;
        let new_len = self.checked_end(at, bytes.len())?;
        self.ensure_capacity(new_len)?;
        self.data[at..new_len].copy_from_slice(bytes);
        self.length = new_len;
        Ok(at)
    }

    /// Insert `bytes` at `at`, shifting the tail right.
    pub fn insert(&mut self, bytes: &[u8], at: usize) -> Result<()> {
        self.check_position(at, 0)?;
        let new_len = self.checked_end(self.length, bytes.len())?;
        self.ensure_capacity(new_len)?;
        self.data.copy_within(at..self.length, at + bytes.len());
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
        self.length = new_len;
        Ok(())
    }

    /// Overwrite bytes starting at `at`, extending the length if the write
    /// runs past the current end.
    pub fn copy_over(&mut self, bytes: &[u8], at: usize) -> Result<()> {
        self.check_position(at, 0)?;
        let end = self.checked_end(at, bytes.len())?;
        let new_len = end.max(self.length);
        self.ensure_capacity(new_len)?;
        self.data[at..end].copy_from_slice(bytes);
        self.length = new_len;
        Ok(())
    }

    /// Remove `len` bytes at `at`, shifting the tail left and zero-filling
    /// the vacated end.
    pub fn delete(&mut self, at: usize, len: usize) -> Result<()> {
        self.check_position(at, len)?;
        self.data.copy_within(at + len..self.length, at);
        let new_len = self.length - len;
        self.data[new_len..self.length].fill(0);
        self.length = new_len;
        Ok(())
    }

    /// Shorten to `len` bytes, zero-filling the removed tail. Capacity is
    /// kept. A `len` at or beyond the current length is a no-op.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.length {
            return;
        }
        self.data[len..self.length].fill(0);
        self.length = len;
    }

    /// Truncate to `len` and release capacity down to the boundary above it.
    pub fn shrink(&mut self, len: usize) {
        self.truncate(len);
        let target = round_up(self.length, self.grow_boundary).unwrap_or(self.data.len());
        if target < self.data.len() {
            self.data.truncate(target);
            self.data.shrink_to_fit();
        }
    }

    /// Set the length to `len`, zero-extending when growing.
    pub fn resize(&mut self, len: usize) -> Result<()> {
        if len <= self.length {
            self.truncate(len);
            return Ok(());
        }
        self.ensure_capacity(len)?;
        self.length = len;
        Ok(())
    }

    /// Set the capacity to exactly `capacity` bytes, truncating the data if
    /// it no longer fits.
    pub fn realloc(&mut self, capacity: usize) -> Result<()> {
        if capacity >= self.data.len() {
            self.grow_exact(capacity)?;
            return Ok(());
        }
        self.truncate(capacity);
        self.data.truncate(capacity);
        self.data.shrink_to_fit();
        Ok(())
    }

    /// Drop all data, keeping capacity.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Hand the contents off as immutable `Bytes`.
    pub fn into_bytes(mut self) -> Bytes {
        self.data.truncate(self.length);
        Bytes::from(self.data)
    }

    /// Copy the contents out as a `Vec`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    fn ensure_capacity(&mut self, required: usize) -> Result<()> {
        if required <= self.data.len() {
            return Ok(());
        }
        let target = round_up(required, self.grow_boundary)
            .ok_or(BufferError::AllocFailed { requested: required })?;
        self.grow_exact(target)
    }

    fn grow_exact(&mut self, capacity: usize) -> Result<()> {
        let additional = capacity - self.data.len();
        self.data
            .try_reserve_exact(additional)
            .map_err(|_| BufferError::AllocFailed {
                requested: capacity,
            })?;
        self.data.resize(capacity, 0);
        Ok(())
    }

    fn checked_end(&self, at: usize, len: usize) -> Result<usize> {
        at.checked_add(len)
            .ok_or(BufferError::AllocFailed { requested: usize::MAX })
    }

    fn check_position(&self, at: usize, len: usize) -> Result<()> {
        match at.checked_add(len) {
            Some(end) if end <= self.length => Ok(()),
            _ => Err(BufferError::OutOfBounds {
                offset: at,
                len,
                length: self.length,
            }),
        }
    }
}

fn round_up(value: usize, boundary: usize) -> Option<usize> {
    if value == 0 {
        return Some(0);
    }
    let blocks = value.div_ceil(boundary);
    blocks.checked_mul(boundary)
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<ByteBuffer> for Bytes {
    fn from(buf: ByteBuffer) -> Self {
        buf.into_bytes()
    }
}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.length)
            .field("capacity", &self.data.len())
            .field("grow_boundary", &self.grow_boundary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_by_boundary() {
        let mut buf = ByteBuffer::new();
        assert_eq!(buf.capacity(), 0);

        assert_eq!(buf.append(b"abc").unwrap(), 0);
        assert_eq!(buf.capacity(), 256);
        assert_eq!(buf.append(&[7u8; 300]).unwrap(), 3);
        assert_eq!(buf.len(), 303);
        assert_eq!(buf.capacity(), 512);
    }

    #[test]
    fn append_then_truncate_restores_original() {
        for original_len in [0usize, 1, 255, 256, 257, 1000] {
            let original: Vec<u8> = (0..original_len).map(|i| (i * 31 % 251) as u8).collect();
            let mut buf = ByteBuffer::from_slice(&original).unwrap();

            buf.append(&[0xEE; 777]).unwrap();
            buf.truncate(original_len);

            assert_eq!(buf.as_slice(), original.as_slice());
            assert!(buf.data[buf.len()..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn insert_shifts_tail() {
        let mut buf = ByteBuffer::from_slice(b"helloworld").unwrap();
        buf.insert(b", ", 5).unwrap();
        assert_eq!(buf.as_slice(), b"hello, world");

        buf.insert(b">", 0).unwrap();
        buf.insert(b"<", buf.len()).unwrap();
        assert_eq!(buf.as_slice(), b">hello, world<");
    }

    #[test]
    fn insert_past_end_rejected() {
        let mut buf = ByteBuffer::from_slice(b"abc").unwrap();
        let err = buf.insert(b"x", 4).unwrap_err();
        assert!(matches!(err, BufferError::OutOfBounds { offset: 4, .. }));
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    fn copy_over_overwrites_and_extends() {
        let mut buf = ByteBuffer::from_slice(b"abcdef").unwrap();
        buf.copy_over(b"XY", 2).unwrap();
        assert_eq!(buf.as_slice(), b"abXYef");

        buf.copy_over(b"1234", 4).unwrap();
        assert_eq!(buf.as_slice(), b"abXY1234");

        assert!(buf.copy_over(b"z", 9).is_err());
    }

    #[test]
    fn delete_zero_fills_vacated_tail() {
        let mut buf = ByteBuffer::from_slice(b"0123456789").unwrap();
        buf.delete(2, 3).unwrap();
        assert_eq!(buf.as_slice(), b"0156789");
        assert_eq!(&buf.data[7..10], &[0, 0, 0]);

        assert!(buf.delete(5, 10).is_err());
        assert_eq!(buf.as_slice(), b"0156789");
    }

    #[test]
    fn truncate_keeps_capacity_and_shrink_releases_it() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1u8; 1000]).unwrap();
        assert_eq!(buf.capacity(), 1024);

        buf.truncate(10);
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.capacity(), 1024);

        buf.shrink(10);
        assert_eq!(buf.capacity(), 256);
        assert_eq!(buf.as_slice(), &[1u8; 10]);
    }

    #[test]
    fn resize_zero_extends() {
        let mut buf = ByteBuffer::from_slice(b"ab").unwrap();
        buf.resize(5).unwrap();
        assert_eq!(buf.as_slice(), b"ab\0\0\0");
        buf.resize(1).unwrap();
        assert_eq!(buf.as_slice(), b"a");
        buf.resize(3).unwrap();
        assert_eq!(buf.as_slice(), b"a\0\0");
    }

    #[test]
    fn realloc_sets_exact_capacity() {
        let mut buf = ByteBuffer::from_slice(b"abcdef").unwrap();
        buf.realloc(10).unwrap();
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.as_slice(), b"abcdef");

        buf.realloc(3).unwrap();
        assert_eq!(buf.capacity(), 3);
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    fn failed_allocation_leaves_buffer_intact() {
        let mut buf = ByteBuffer::from_slice(b"keep me").unwrap();
        let before_cap = buf.capacity();

        let err = buf.realloc(usize::MAX).unwrap_err();
        assert!(matches!(err, BufferError::AllocFailed { .. }));
        assert_eq!(buf.as_slice(), b"keep me");
        assert_eq!(buf.capacity(), before_cap);

        let err = buf.resize(usize::MAX).unwrap_err();
        assert!(matches!(err, BufferError::AllocFailed { .. }));
        assert_eq!(buf.as_slice(), b"keep me");
    }

    #[test]
    fn custom_boundary() {
        let mut buf = ByteBuffer::with_boundary(16);
        buf.append(&[0u8; 17]).unwrap();
        assert_eq!(buf.capacity(), 32);
        assert_eq!(ByteBuffer::with_boundary(0).grow_boundary(), 1);
    }

    #[test]
    fn into_bytes_hands_off_only_data() {
        let mut buf = ByteBuffer::new();
        buf.append(b"payload").unwrap();
        let bytes = buf.into_bytes();
        assert_eq!(bytes.as_ref(), b"payload");
    }
}
