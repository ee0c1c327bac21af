use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodingError, EncodingError};
use crate::format::{FormatCode, FormatString};
use crate::value::Value;

/// Pack `values` into a little-endian payload laid out by `format`.
pub fn encode(format: &FormatString, values: &[Value]) -> Result<Bytes, EncodingError> {
    if values.len() != format.arity() {
        return Err(EncodingError::ArityMismatch {
            expected: format.arity(),
            actual: values.len(),
        });
    }

    let mut out = BytesMut::with_capacity(format.width());
    let mut values = values.iter().enumerate();

    for &code in format.codes() {
        if code == FormatCode::Pad {
            out.put_u8(0);
            continue;
        }
        // Arity was checked above, so every value-taking code has a value.
        let Some((index, value)) = values.next() else {
            break;
        };
        match (code, value) {
            (FormatCode::Bytes(width), Value::Bytes(bytes)) => {
                if bytes.len() > width {
                    return Err(EncodingError::ByteStringTooLong {
                        index,
                        len: bytes.len(),
                        max: width,
                    });
                }
                out.put_slice(bytes);
                out.put_bytes(0, width - bytes.len());
            }
            (FormatCode::Bytes(_), Value::Int(_)) | (_, Value::Bytes(_)) => {
                return Err(EncodingError::TypeMismatch { index, code });
            }
            (code, Value::Int(value)) => put_int(&mut out, index, code, *value)?,
        }
    }

    Ok(out.freeze())
}

fn put_int(out: &mut BytesMut, index: usize, code: FormatCode, value: i64) -> Result<(), EncodingError> {
    let in_range = code
        .int_range()
        .is_some_and(|(min, max)| (min..=max).contains(&value));
    if !in_range {
        return Err(EncodingError::Overflow { index, code, value });
    }

    // Range was validated, so the narrowing casts below are exact.
    match code {
        FormatCode::U8 => out.put_u8(value as u8),
        FormatCode::I8 => out.put_i8(value as i8),
        FormatCode::U16 => out.put_u16_le(value as u16),
        FormatCode::I16 => out.put_i16_le(value as i16),
        FormatCode::U32 => out.put_u32_le(value as u32),
        FormatCode::I32 => out.put_i32_le(value as i32),
        FormatCode::Bytes(_) | FormatCode::Pad => {}
    }
    Ok(())
}

/// Unpack `payload` laid out by `format`.
///
/// The payload must be exactly `format.width()` bytes long.
pub fn decode(format: &FormatString, payload: &[u8]) -> Result<Vec<Value>, DecodingError> {
    if payload.len() != format.width() {
        return Err(DecodingError::LengthMismatch {
            expected: format.width(),
            actual: payload.len(),
        });
    }

    let mut values = Vec::with_capacity(format.arity());
    let mut rest = payload;

    for &code in format.codes() {
        let (field, tail) = rest.split_at(code.width());
        rest = tail;
        let value = match code {
            FormatCode::Pad => continue,
            FormatCode::U8 => Value::Int(i64::from(field[0])),
            FormatCode::I8 => Value::Int(i64::from(field[0] as i8)),
            FormatCode::U16 => Value::Int(i64::from(u16::from_le_bytes([field[0], field[1]]))),
            FormatCode::I16 => Value::Int(i64::from(i16::from_le_bytes([field[0], field[1]]))),
            FormatCode::U32 => Value::Int(i64::from(u32::from_le_bytes([
                field[0], field[1], field[2], field[3],
            ]))),
            FormatCode::I32 => Value::Int(i64::from(i32::from_le_bytes([
                field[0], field[1], field[2], field[3],
            ]))),
            FormatCode::Bytes(_) => Value::Bytes(Bytes::copy_from_slice(field)),
        };
        values.push(value);
    }

    Ok(values)
}
