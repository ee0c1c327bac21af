use crate::format::FormatCode;

/// A format string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// An unrecognized character appeared in the format string.
    #[error("invalid format code {code:?} at offset {offset} in {format:?}")]
    InvalidCode {
        format: String,
        offset: usize,
        code: char,
    },

    /// A repeat count was not followed by `s`, or was zero.
    #[error("invalid byte-string length at offset {offset} in {format:?}")]
    InvalidLength { format: String, offset: usize },

    /// A byte-string length exceeds [`MAX_BYTE_STRING_LEN`](crate::MAX_BYTE_STRING_LEN).
    #[error("byte string of {len} bytes at offset {offset} in {format:?} exceeds {max}")]
    ByteStringTooWide {
        format: String,
        offset: usize,
        len: usize,
        max: usize,
    },

    /// The total encoded width does not fit in `usize`.
    #[error("format {format:?} is too wide")]
    TooWide { format: String },
}

/// Values could not be packed against a format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// The number of values does not match the number of non-padding codes.
    #[error("format takes {expected} values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// An integer does not fit in the declared width.
    #[error("value {value} at index {index} does not fit format code {code}")]
    Overflow {
        index: usize,
        code: FormatCode,
        value: i64,
    },

    /// An integer was supplied for a byte string or vice versa.
    #[error("value at index {index} has the wrong type for format code {code}")]
    TypeMismatch { index: usize, code: FormatCode },

    /// A byte string is longer than its declared width.
    #[error("byte string at index {index} is {len} bytes, max {max}")]
    ByteStringTooLong { index: usize, len: usize, max: usize },
}

/// A payload could not be unpacked against a format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodingError {
    /// The payload length differs from the format's total width.
    #[error("payload is {actual} bytes, format requires {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}
