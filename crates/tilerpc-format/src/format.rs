use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::FormatError;

/// Longest `Ns` byte string a format may declare, the most a one-byte
/// length prefix can describe.
pub const MAX_BYTE_STRING_LEN: usize = 255;

/// One primitive code in a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCode {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    /// Fixed-length byte string of the given width.
    Bytes(usize),
    Pad,
}

impl FormatCode {
    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            FormatCode::U8 | FormatCode::I8 | FormatCode::Pad => 1,
            FormatCode::U16 | FormatCode::I16 => 2,
            FormatCode::U32 | FormatCode::I32 => 4,
            FormatCode::Bytes(len) => len,
        }
    }

    /// Whether this code consumes a value on encode and produces one on
    /// decode.
    pub fn takes_value(self) -> bool {
        !matches!(self, FormatCode::Pad)
    }

    /// Inclusive integer range for integer codes.
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            FormatCode::U8 => Some((0, u8::MAX as i64)),
            FormatCode::U16 => Some((0, u16::MAX as i64)),
            FormatCode::U32 => Some((0, u32::MAX as i64)),
            FormatCode::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            FormatCode::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            FormatCode::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            FormatCode::Bytes(_) | FormatCode::Pad => None,
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(FormatCode::U8),
            'H' => Some(FormatCode::U16),
            'L' => Some(FormatCode::U32),
            'b' => Some(FormatCode::I8),
            'h' => Some(FormatCode::I16),
            'l' => Some(FormatCode::I32),
            'x' => Some(FormatCode::Pad),
            _ => None,
        }
    }
}

impl fmt::Display for FormatCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatCode::U8 => f.write_str("B"),
            FormatCode::U16 => f.write_str("H"),
            FormatCode::U32 => f.write_str("L"),
            FormatCode::I8 => f.write_str("b"),
            FormatCode::I16 => f.write_str("h"),
            FormatCode::I32 => f.write_str("l"),
            FormatCode::Bytes(len) => write!(f, "{len}s"),
            FormatCode::Pad => f.write_str("x"),
        }
    }
}

/// A parsed, immutable payload layout.
///
/// Parse once from a declaration and reuse for every call; clones share the
/// parsed code list.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FormatString {
    source: Arc<str>,
    codes: Arc<[FormatCode]>,
    width: usize,
    arity: usize,
}

impl FormatString {
    /// Parse a format string such as `"LL"`, `"6s"` or `"BxH"`.
    pub fn parse(source: &str) -> Result<Self, FormatError> {
        let mut codes = Vec::new();
        let mut count: Option<(usize, usize)> = None;

        for (offset, c) in source.char_indices() {
            if let Some(digit) = c.to_digit(10) {
                let (start, value) = count.unwrap_or((offset, 0));
                let value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(digit as usize))
                    .ok_or_else(|| FormatError::InvalidLength {
                        format: source.to_string(),
                        offset: start,
                    })?;
                count = Some((start, value));
                continue;
            }

            if c == 's' {
                match count.take() {
                    Some((start, len)) if len > MAX_BYTE_STRING_LEN => {
                        return Err(FormatError::ByteStringTooWide {
                            format: source.to_string(),
                            offset: start,
                            len,
                            max: MAX_BYTE_STRING_LEN,
                        })
                    }
                    Some((_, len)) if len > 0 => codes.push(FormatCode::Bytes(len)),
                    Some((start, _)) => {
                        return Err(FormatError::InvalidLength {
                            format: source.to_string(),
                            offset: start,
                        })
                    }
                    None => {
                        return Err(FormatError::InvalidLength {
                            format: source.to_string(),
                            offset,
                        })
                    }
                }
                continue;
            }

            if let Some((start, _)) = count {
                return Err(FormatError::InvalidLength {
                    format: source.to_string(),
                    offset: start,
                });
            }

            let code = FormatCode::from_char(c).ok_or_else(|| FormatError::InvalidCode {
                format: source.to_string(),
                offset,
                code: c,
            })?;
            codes.push(code);
        }

        if let Some((start, _)) = count {
            return Err(FormatError::InvalidLength {
                format: source.to_string(),
                offset: start,
            });
        }

        Self::from_codes_with_source(source, codes)
    }

    /// Build a format from codes, applying the same length limits as
    /// [`FormatString::parse`].
    pub fn from_codes(codes: impl Into<Vec<FormatCode>>) -> Result<Self, FormatError> {
        let codes = codes.into();
        let source: String = codes.iter().map(ToString::to_string).collect();
        for (offset, code) in codes.iter().enumerate() {
            match *code {
                FormatCode::Bytes(0) => {
                    return Err(FormatError::InvalidLength {
                        format: source,
                        offset,
                    })
                }
                FormatCode::Bytes(len) if len > MAX_BYTE_STRING_LEN => {
                    return Err(FormatError::ByteStringTooWide {
                        format: source,
                        offset,
                        len,
                        max: MAX_BYTE_STRING_LEN,
                    })
                }
                _ => {}
            }
        }
        Self::from_codes_with_source(&source, codes)
    }

    /// The empty format: no values, zero bytes.
    pub fn empty() -> Self {
        Self {
            source: Arc::from(""),
            codes: Arc::from(Vec::new()),
            width: 0,
            arity: 0,
        }
    }

    fn from_codes_with_source(source: &str, codes: Vec<FormatCode>) -> Result<Self, FormatError> {
        let width = codes
            .iter()
            .try_fold(0usize, |total, code| total.checked_add(code.width()))
            .ok_or_else(|| FormatError::TooWide {
                format: source.to_string(),
            })?;
        let arity = codes.iter().filter(|code| code.takes_value()).count();
        Ok(Self {
            source: Arc::from(source),
            codes: Arc::from(codes),
            width,
            arity,
        })
    }

    /// Parsed codes in order.
    pub fn codes(&self) -> &[FormatCode] {
        &self.codes
    }

    /// Total encoded width in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of values the format consumes and produces.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The text the format was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for FormatString {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for FormatString {
    type Error = FormatError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl Default for FormatString {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for FormatString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Debug for FormatString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormatString({:?})", &*self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_codes() {
        let fmt = FormatString::parse("BHLbhl").unwrap();
        assert_eq!(
            fmt.codes(),
            &[
                FormatCode::U8,
                FormatCode::U16,
                FormatCode::U32,
                FormatCode::I8,
                FormatCode::I16,
                FormatCode::I32
            ]
        );
        assert_eq!(fmt.width(), 14);
        assert_eq!(fmt.arity(), 6);
    }

    #[test]
    fn parses_byte_strings_and_padding() {
        let fmt = FormatString::parse("B12sxxH").unwrap();
        assert_eq!(
            fmt.codes(),
            &[
                FormatCode::U8,
                FormatCode::Bytes(12),
                FormatCode::Pad,
                FormatCode::Pad,
                FormatCode::U16
            ]
        );
        assert_eq!(fmt.width(), 1 + 12 + 2 + 2);
        assert_eq!(fmt.arity(), 3);
    }

    #[test]
    fn empty_format_has_no_width() {
        let fmt = FormatString::parse("").unwrap();
        assert!(fmt.is_empty());
        assert_eq!(fmt.width(), 0);
        assert_eq!(fmt.arity(), 0);
        assert_eq!(fmt, FormatString::empty());
    }

    #[test]
    fn rejects_unknown_code() {
        let err = FormatString::parse("LQ").unwrap_err();
        assert_eq!(
            err,
            FormatError::InvalidCode {
                format: "LQ".to_string(),
                offset: 1,
                code: 'Q'
            }
        );
    }

    #[test]
    fn rejects_count_without_s() {
        assert!(matches!(
            FormatString::parse("2H"),
            Err(FormatError::InvalidLength { offset: 0, .. })
        ));
        assert!(matches!(
            FormatString::parse("L4"),
            Err(FormatError::InvalidLength { offset: 1, .. })
        ));
    }

    #[test]
    fn rejects_zero_and_missing_length() {
        assert!(matches!(
            FormatString::parse("0s"),
            Err(FormatError::InvalidLength { .. })
        ));
        assert!(matches!(
            FormatString::parse("s"),
            Err(FormatError::InvalidLength { .. })
        ));
    }

    #[test]
    fn display_round_trips_source() {
        let fmt: FormatString = "L6sx".parse().unwrap();
        assert_eq!(fmt.to_string(), "L6sx");
        assert_eq!(FormatString::from_codes(fmt.codes().to_vec()).unwrap(), fmt);
    }

    #[test]
    fn rejects_oversized_byte_strings() {
        assert!(FormatString::parse("255s").is_ok());
        assert!(matches!(
            FormatString::parse("L256s"),
            Err(FormatError::ByteStringTooWide { offset: 1, len: 256, max: 255, .. })
        ));
        assert!(matches!(
            FormatString::parse("99999999999s"),
            Err(FormatError::ByteStringTooWide { .. })
        ));
        assert!(matches!(
            FormatString::parse("18446744073709551615s18446744073709551615s"),
            Err(FormatError::ByteStringTooWide { offset: 0, .. })
        ));
        assert!(matches!(
            FormatString::parse("99999999999999999999999s"),
            Err(FormatError::InvalidLength { offset: 0, .. })
        ));
    }

    #[test]
    fn from_codes_applies_parse_limits() {
        assert!(matches!(
            FormatString::from_codes(vec![FormatCode::U8, FormatCode::Bytes(usize::MAX)]),
            Err(FormatError::ByteStringTooWide { offset: 1, .. })
        ));
        assert!(matches!(
            FormatString::from_codes(vec![FormatCode::Bytes(0)]),
            Err(FormatError::InvalidLength { offset: 0, .. })
        ));
        assert_eq!(FormatString::from_codes(Vec::new()).unwrap(), FormatString::empty());
    }
}
