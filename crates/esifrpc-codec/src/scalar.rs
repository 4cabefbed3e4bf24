//! Scalar wire encoding.
//!
//! A build uses exactly one [`WireMode`], chosen by cargo features:
//!
//! | features                      | mode           |
//! |-------------------------------|----------------|
//! | (none)                        | `compact-le`   |
//! | `network-order`               | `compact-be`   |
//! | `uniform64`                   | `uniform64-le` |
//! | `uniform64` + `network-order` | `uniform64-be` |
//!
//! Compact modes write each scalar at its natural width; uniform64 modes
//! widen every scalar to 8 bytes (signed values sign-extended). Offsets are
//! always 4 bytes in the mode's byte order.

use std::fmt;

use crate::error::{CodecError, Result};

/// Width of an EsifData offset on the wire, in every mode.
pub const OFFSET_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Scalar width and byte-order policy shared by both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireMode {
    pub uniform64: bool,
    pub order: ByteOrder,
}

/// The mode this build speaks.
pub const WIRE_MODE: WireMode = WireMode {
    uniform64: cfg!(feature = "uniform64"),
    order: if cfg!(feature = "network-order") {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    },
};

impl WireMode {
    pub const COMPACT_LE: Self = Self::new(false, ByteOrder::Little);
    pub const COMPACT_BE: Self = Self::new(false, ByteOrder::Big);
    pub const UNIFORM64_LE: Self = Self::new(true, ByteOrder::Little);
    pub const UNIFORM64_BE: Self = Self::new(true, ByteOrder::Big);

    pub const ALL: [Self; 4] = [
        Self::COMPACT_LE,
        Self::COMPACT_BE,
        Self::UNIFORM64_LE,
        Self::UNIFORM64_BE,
    ];

    pub const fn new(uniform64: bool, order: ByteOrder) -> Self {
        Self { uniform64, order }
    }

    /// Name exchanged in the protocol handshake.
    pub fn name(&self) -> &'static str {
        match (self.uniform64, self.order) {
            (false, ByteOrder::Little) => "compact-le",
            (false, ByteOrder::Big) => "compact-be",
            (true, ByteOrder::Little) => "uniform64-le",
            (true, ByteOrder::Big) => "uniform64-be",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.name() == name)
    }

    /// Bytes a scalar of natural width `natural` occupies on the wire.
    pub fn width(&self, natural: usize) -> usize {
        if self.uniform64 {
            8
        } else {
            natural
        }
    }

    /// Write the low `width` bytes of `value` in this mode's byte order.
    pub(crate) fn put(&self, value: u64, width: usize, dst: &mut [u8]) {
        match self.order {
            ByteOrder::Little => dst[..width].copy_from_slice(&value.to_le_bytes()[..width]),
            ByteOrder::Big => dst[..width].copy_from_slice(&value.to_be_bytes()[8 - width..]),
        }
    }

    /// Read `src.len()` bytes (at most 8) in this mode's byte order.
    pub(crate) fn get(&self, src: &[u8]) -> u64 {
        let width = src.len();
        let mut raw = [0u8; 8];
        match self.order {
            ByteOrder::Little => {
                raw[..width].copy_from_slice(src);
                u64::from_le_bytes(raw)
            }
            ByteOrder::Big => {
                raw[8 - width..].copy_from_slice(src);
                u64::from_be_bytes(raw)
            }
        }
    }
}

impl Default for WireMode {
    fn default() -> Self {
        WIRE_MODE
    }
}

impl fmt::Display for WireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-width integer that can travel as a scalar field.
pub trait Scalar: Copy {
    /// Natural width in bytes.
    const WIDTH: usize;

    /// Bit pattern at full 64-bit width (signed values sign-extended).
    fn to_wire(self) -> u64;

    /// Recover the value from a bit pattern read at `width` bytes.
    fn from_wire(raw: u64, width: usize) -> Result<Self>;
}

macro_rules! unsigned_scalar {
    ($($ty:ty),*) => {$(
        impl Scalar for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn to_wire(self) -> u64 {
                self as u64
            }

            fn from_wire(raw: u64, _width: usize) -> Result<Self> {
                <$ty>::try_from(raw).map_err(|_| {
                    CodecError::Malformed(format!(
                        "scalar 0x{raw:X} does not fit {}",
                        stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

macro_rules! signed_scalar {
    ($($ty:ty),*) => {$(
        impl Scalar for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn to_wire(self) -> u64 {
                self as i64 as u64
            }

            fn from_wire(raw: u64, width: usize) -> Result<Self> {
                let shift = 64 - (width as u32 * 8);
                let value = ((raw << shift) as i64) >> shift;
                <$ty>::try_from(value).map_err(|_| {
                    CodecError::Malformed(format!(
                        "scalar {value} does not fit {}",
                        stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

unsigned_scalar!(u8, u16, u32, u64);
signed_scalar!(i8, i16, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for mode in WireMode::ALL {
            assert_eq!(WireMode::from_name(mode.name()), Some(mode));
        }
        assert_eq!(WireMode::from_name("compact-me"), None);
    }

    #[test]
    fn build_mode_follows_features() {
        assert_eq!(WIRE_MODE.uniform64, cfg!(feature = "uniform64"));
        assert_eq!(
            WIRE_MODE.order == ByteOrder::Big,
            cfg!(feature = "network-order")
        );
        assert_eq!(WireMode::default(), WIRE_MODE);
    }

    #[test]
    fn widths() {
        assert_eq!(WireMode::COMPACT_LE.width(2), 2);
        assert_eq!(WireMode::UNIFORM64_BE.width(2), 8);
    }

    #[test]
    fn put_get_byte_order() {
        let mut buf = [0u8; 4];
        WireMode::COMPACT_LE.put(0x0102_0304, 4, &mut buf);
        assert_eq!(buf, [4, 3, 2, 1]);
        assert_eq!(WireMode::COMPACT_LE.get(&buf), 0x0102_0304);

        WireMode::COMPACT_BE.put(0x0102_0304, 4, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(WireMode::COMPACT_BE.get(&buf), 0x0102_0304);
    }

    #[test]
    fn signed_values_sign_extend() {
        assert_eq!((-2i32).to_wire(), u64::MAX - 1);
        assert_eq!(i32::from_wire(u64::MAX - 1, 8).unwrap(), -2);
        assert_eq!(i32::from_wire(0xFFFF_FFFE, 4).unwrap(), -2);
        assert_eq!(i8::from_wire(0x80, 1).unwrap(), i8::MIN);
    }

    #[test]
    fn narrowing_overflow_is_malformed() {
        assert!(matches!(
            u16::from_wire(0x1_0000, 8),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            i8::from_wire(0x100, 8),
            Err(CodecError::Malformed(_))
        ));
    }
}
