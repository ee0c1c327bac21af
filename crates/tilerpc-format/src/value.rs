use std::fmt;

use bytes::Bytes;

/// A typed argument or result value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Any integer code (`B H L b h l`); range is checked on encode.
    Int(i64),
    /// A fixed-length byte string (`Ns`).
    Bytes(Bytes),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Int(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(text) if text.chars().all(|c| !c.is_control() || c == '\0') => {
                    write!(f, "{:?}", text.trim_end_matches('\0'))
                }
                _ => {
                    f.write_str("0x")?;
                    for byte in b.iter() {
                        write!(f, "{byte:02x}")?;
                    }
                    Ok(())
                }
            },
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(u8, u16, u32, i8, i16, i32, i64);

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(v: &[u8; N]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v.as_bytes()))
    }
}
