use std::fmt;

/// Type tag carried by every [`EsifData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    Void,
    Bit,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Temperature,
    Power,
    Time,
    Percent,
    Frequency,
    String,
    Unicode,
    Binary,
    Json,
    Guid,
    Table,
    Struct,
    /// Encoded list of nested `EsifData` values.
    Array,
    Other(u32),
}

impl DataType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Void,
            1 => Self::Bit,
            2 => Self::UInt8,
            3 => Self::UInt16,
            4 => Self::UInt32,
            5 => Self::UInt64,
            6 => Self::Int8,
            7 => Self::Int16,
            8 => Self::Int32,
            9 => Self::Int64,
            10 => Self::Temperature,
            11 => Self::Power,
            12 => Self::Time,
            13 => Self::Percent,
            14 => Self::Frequency,
            20 => Self::String,
            21 => Self::Unicode,
            22 => Self::Binary,
            23 => Self::Json,
            24 => Self::Guid,
            25 => Self::Table,
            26 => Self::Struct,
            30 => Self::Array,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Bit => 1,
            Self::UInt8 => 2,
            Self::UInt16 => 3,
            Self::UInt32 => 4,
            Self::UInt64 => 5,
            Self::Int8 => 6,
            Self::Int16 => 7,
            Self::Int32 => 8,
            Self::Int64 => 9,
            Self::Temperature => 10,
            Self::Power => 11,
            Self::Time => 12,
            Self::Percent => 13,
            Self::Frequency => 14,
            Self::String => 20,
            Self::Unicode => 21,
            Self::Binary => 22,
            Self::Json => 23,
            Self::Guid => 24,
            Self::Table => 25,
            Self::Struct => 26,
            Self::Array => 30,
            Self::Other(value) => value,
        }
    }
}

/// Status of an RPC call, carried in every response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultCode {
    #[default]
    Ok,
    Unspecified,
    NotImplemented,
    ParameterIsNull,
    NeedLargerBuffer,
    RequestFailed,
    Timeout,
    Disconnected,
    InvalidHandle,
    NotFound,
    NoMemory,
    InvalidRequest,
    NotSupported,
    Other(u32),
}

impl ResultCode {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => Self::Ok,
            0x1 => Self::Unspecified,
            0x2 => Self::NotImplemented,
            0x3 => Self::ParameterIsNull,
            0x4 => Self::NeedLargerBuffer,
            0x5 => Self::RequestFailed,
            0x6 => Self::Timeout,
            0x7 => Self::Disconnected,
            0x8 => Self::InvalidHandle,
            0x9 => Self::NotFound,
            0xA => Self::NoMemory,
            0xB => Self::InvalidRequest,
            0xC => Self::NotSupported,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Ok => 0x0,
            Self::Unspecified => 0x1,
            Self::NotImplemented => 0x2,
            Self::ParameterIsNull => 0x3,
            Self::NeedLargerBuffer => 0x4,
            Self::RequestFailed => 0x5,
            Self::Timeout => 0x6,
            Self::Disconnected => 0x7,
            Self::InvalidHandle => 0x8,
            Self::NotFound => 0x9,
            Self::NoMemory => 0xA,
            Self::InvalidRequest => 0xB,
            Self::NotSupported => 0xC,
            Self::Other(value) => value,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Whether a response with this code still carries a decodable body.
    pub fn has_body(self) -> bool {
        matches!(self, Self::Ok | Self::NeedLargerBuffer)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Unspecified => "UNSPECIFIED",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::ParameterIsNull => "PARAMETER_IS_NULL",
            Self::NeedLargerBuffer => "NEED_LARGER_BUFFER",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Disconnected => "DISCONNECTED",
            Self::InvalidHandle => "INVALID_HANDLE",
            Self::NotFound => "NOT_FOUND",
            Self::NoMemory => "NO_MEMORY",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::Other(_) => "OTHER",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(value) => write!(f, "0x{value:X}"),
            known => f.write_str(known.name()),
        }
    }
}

/// A typed, variable-length parameter.
///
/// `buf_len` is the capacity the sender offers for the value (meaningful for
/// output parameters); `data_len` is the size of the value itself. A value
/// with no data travels as a NULL reference. A handler that needs more room
/// than `buf_len` answers with `data_len` set to the required size and no
/// data (see [`EsifData::need_larger`]).
///
/// Scalar payloads (`UInt32`, `UInt64`, ...) are stored little-endian inside
/// the data bytes; the wire mode governs only the reference fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EsifData {
    pub data_type: DataType,
    pub buf_len: u32,
    pub data_len: u32,
    pub data: Option<Vec<u8>>,
}

impl EsifData {
    /// A NULL parameter.
    pub fn null() -> Self {
        Self::default()
    }

    /// A value holding `bytes`, with `buf_len == data_len`.
    pub fn from_bytes(data_type: DataType, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        Self {
            data_type,
            buf_len: len,
            data_len: len,
            data: Some(bytes),
        }
    }

    /// An empty output parameter offering `buf_len` bytes to the callee.
    pub fn output(data_type: DataType, buf_len: u32) -> Self {
        Self {
            data_type,
            buf_len,
            data_len: 0,
            data: None,
        }
    }

    /// Answer for an output parameter that needs `required` bytes.
    pub fn need_larger(data_type: DataType, buf_len: u32, required: u32) -> Self {
        Self {
            data_type,
            buf_len,
            data_len: required,
            data: None,
        }
    }

    pub fn u32(value: u32) -> Self {
        Self::from_bytes(DataType::UInt32, value.to_le_bytes())
    }

    pub fn u64(value: u64) -> Self {
        Self::from_bytes(DataType::UInt64, value.to_le_bytes())
    }

    /// A NUL-terminated string value.
    pub fn string(value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        Self::from_bytes(DataType::String, bytes)
    }

    pub fn json(value: &str) -> Self {
        Self::from_bytes(DataType::Json, value.as_bytes())
    }

    pub fn binary(value: impl Into<Vec<u8>>) -> Self {
        Self::from_bytes(DataType::Binary, value)
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Interpret a 1/2/4-byte value as `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes = self.bytes()?;
        match bytes.len() {
            1 => Some(bytes[0] as u32),
            2 => Some(u16::from_le_bytes([bytes[0], bytes[1]]) as u32),
            4 => Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            _ => None,
        }
    }

    /// Interpret a 1/2/4/8-byte value as `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        let bytes = self.bytes()?;
        if bytes.len() == 8 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            return Some(u64::from_le_bytes(raw));
        }
        self.as_u32().map(u64::from)
    }

    /// Interpret the data as UTF-8 text, dropping any NUL terminator.
    pub fn as_str(&self) -> Option<&str> {
        let bytes = self.bytes()?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).ok()
    }

    /// Whether `self` fits an output parameter that offered `buf_len` bytes.
    pub fn fits(&self, buf_len: u32) -> bool {
        self.data_len <= buf_len
    }
}

impl fmt::Display for EsifData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data_type {
            _ if self.is_null() => write!(f, "NULL"),
            DataType::String | DataType::Json => write!(f, "{}", self.as_str().unwrap_or("<invalid utf-8>")),
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                match self.as_u64() {
                    Some(value) => write!(f, "{value}"),
                    None => write!(f, "<{} bytes>", self.data_len),
                }
            }
            _ => {
                for byte in self.bytes().unwrap_or_default() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_values_roundtrip() {
        for value in 0..40u32 {
            assert_eq!(DataType::from_u32(value).as_u32(), value);
        }
        assert_eq!(DataType::from_u32(4), DataType::UInt32);
        assert_eq!(DataType::from_u32(30), DataType::Array);
        assert_eq!(DataType::from_u32(99), DataType::Other(99));
    }

    #[test]
    fn result_code_values_roundtrip() {
        for value in 0..32u32 {
            assert_eq!(ResultCode::from_u32(value).as_u32(), value);
        }
        assert_eq!(ResultCode::from_u32(4), ResultCode::NeedLargerBuffer);
        assert_eq!(ResultCode::NotImplemented.to_string(), "NOT_IMPLEMENTED");
        assert_eq!(ResultCode::Other(0x1234).to_string(), "0x1234");
    }

    #[test]
    fn body_carrying_codes() {
        assert!(ResultCode::Ok.has_body());
        assert!(ResultCode::NeedLargerBuffer.has_body());
        assert!(!ResultCode::Timeout.has_body());
    }

    #[test]
    fn scalar_helpers() {
        let v = EsifData::u32(42);
        assert_eq!(v.data_type, DataType::UInt32);
        assert_eq!(v.data_len, 4);
        assert_eq!(v.as_u32(), Some(42));
        assert_eq!(v.as_u64(), Some(42));
        assert_eq!(v.to_string(), "42");

        assert_eq!(EsifData::u64(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(EsifData::u64(1).as_u32(), None);
    }

    #[test]
    fn string_helpers() {
        let s = EsifData::string("temp");
        assert_eq!(s.data_len, 5);
        assert_eq!(s.as_str(), Some("temp"));
        assert_eq!(s.to_string(), "temp");
    }

    #[test]
    fn null_and_output() {
        assert!(EsifData::null().is_null());
        assert_eq!(EsifData::null().to_string(), "NULL");

        let out = EsifData::output(DataType::UInt32, 4);
        assert!(out.is_null());
        assert_eq!(out.buf_len, 4);

        let more = EsifData::need_larger(DataType::String, 4, 64);
        assert!(!more.fits(more.buf_len));
        assert!(more.is_null());
    }
}
