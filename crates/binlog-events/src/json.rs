//! Decoder for the binary JSON column format.
//!
//! JSON columns arrive as a one-byte type tag followed by a payload;
//! objects and arrays carry offset tables so the server can seek without
//! parsing. We fold the whole document into a [`serde_json::Value`].

use serde_json::{Map, Number, Value};

use crate::error::{EventError, Result};

const TAG_SMALL_OBJECT: u8 = 0x00;
const TAG_LARGE_OBJECT: u8 = 0x01;
const TAG_SMALL_ARRAY: u8 = 0x02;
const TAG_LARGE_ARRAY: u8 = 0x03;
const TAG_LITERAL: u8 = 0x04;
const TAG_INT16: u8 = 0x05;
const TAG_UINT16: u8 = 0x06;
const TAG_INT32: u8 = 0x07;
const TAG_UINT32: u8 = 0x08;
const TAG_INT64: u8 = 0x09;
const TAG_UINT64: u8 = 0x0a;
const TAG_DOUBLE: u8 = 0x0b;
const TAG_STRING: u8 = 0x0c;
const TAG_OPAQUE: u8 = 0x0f;

pub(crate) fn decode(data: &[u8]) -> Result<Value> {
    if data.is_empty() {
        return Ok(Value::Null);
    }
    parse_value(data[0], &data[1..])
}

fn parse_value(tag: u8, data: &[u8]) -> Result<Value> {
    match tag {
        TAG_SMALL_OBJECT => parse_object(data, false),
        TAG_LARGE_OBJECT => parse_object(data, true),
        TAG_SMALL_ARRAY => parse_array(data, false),
        TAG_LARGE_ARRAY => parse_array(data, true),
        TAG_LITERAL => literal(byte(data, 0)?),
        TAG_INT16 => Ok(Value::Number(Number::from(i16_at(data, 0)?))),
        TAG_UINT16 => Ok(Value::Number(Number::from(u16_at(data, 0)?))),
        TAG_INT32 => Ok(Value::Number(Number::from(i32_at(data, 0)?))),
        TAG_UINT32 => Ok(Value::Number(Number::from(u32_at(data, 0)?))),
        TAG_INT64 => Ok(Value::Number(Number::from(i64_at(data, 0)?))),
        TAG_UINT64 => Ok(Value::Number(Number::from(u64_at(data, 0)?))),
        TAG_DOUBLE => {
            let v = f64::from_le_bytes(fixed::<8>(data, 0)?);
            Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| EventError::Json("non-finite double".to_string()))
        }
        TAG_STRING => {
            let (len, at) = varlen(data, 0)?;
            let bytes = slice(data, at, len)?;
            Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        TAG_OPAQUE => {
            // Opaque values wrap a column type tag and its raw encoding;
            // surface them as hex rather than dropping them.
            let (len, at) = varlen(data, 1)?;
            let bytes = slice(data, at, len)?;
            Ok(Value::String(hex::encode(bytes)))
        }
        other => Err(EventError::Json(format!(
            "unsupported binary json tag {other:#04x}"
        ))),
    }
}

fn parse_object(data: &[u8], large: bool) -> Result<Value> {
    let (count, header) = header(data, large)?;
    let key_entry = if large { 6 } else { 4 };
    let val_entry = if large { 5 } else { 3 };
    let mut map = Map::new();
    for i in 0..count {
        let at = header + i * key_entry;
        let key_off = offset_at(data, at, large)?;
        let key_len = u16_at(data, at + if large { 4 } else { 2 })? as usize;
        let key = String::from_utf8_lossy(slice(data, key_off, key_len)?).into_owned();
        let value = entry_value(data, header + count * key_entry + i * val_entry, large)?;
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}

fn parse_array(data: &[u8], large: bool) -> Result<Value> {
    let (count, header) = header(data, large)?;
    let val_entry = if large { 5 } else { 3 };
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        items.push(entry_value(data, header + i * val_entry, large)?);
    }
    Ok(Value::Array(items))
}

/// Element count plus the offset where the entry table starts. The byte
/// size field that follows the count is not needed for decoding.
fn header(data: &[u8], large: bool) -> Result<(usize, usize)> {
    if large {
        Ok((u32_at(data, 0)? as usize, 8))
    } else {
        Ok((u16_at(data, 0)? as usize, 4))
    }
}

/// One entry in a value table: small scalars are inlined, everything else
/// is an offset into the enclosing container's payload.
fn entry_value(data: &[u8], at: usize, large: bool) -> Result<Value> {
    let tag = byte(data, at)?;
    match tag {
        TAG_LITERAL => literal(byte(data, at + 1)?),
        TAG_INT16 => Ok(Value::Number(Number::from(i16_at(data, at + 1)?))),
        TAG_UINT16 => Ok(Value::Number(Number::from(u16_at(data, at + 1)?))),
        TAG_INT32 if large => Ok(Value::Number(Number::from(i32_at(data, at + 1)?))),
        TAG_UINT32 if large => Ok(Value::Number(Number::from(u32_at(data, at + 1)?))),
        _ => {
            let off = offset_at(data, at + 1, large)?;
            let payload = data
                .get(off..)
                .ok_or(EventError::ShortEvent("json offset"))?;
            parse_value(tag, payload)
        }
    }
}

fn literal(b: u8) -> Result<Value> {
    match b {
        0 => Ok(Value::Null),
        1 => Ok(Value::Bool(true)),
        2 => Ok(Value::Bool(false)),
        other => Err(EventError::Json(format!("unknown json literal {other}"))),
    }
}

/// Variable-length size: seven bits per byte, high bit continues.
fn varlen(data: &[u8], at: usize) -> Result<(usize, usize)> {
    let mut len = 0usize;
    let mut shift = 0;
    let mut pos = at;
    loop {
        let b = byte(data, pos)?;
        pos += 1;
        len |= ((b & 0x7f) as usize) << shift;
        if b & 0x80 == 0 {
            return Ok((len, pos));
        }
        shift += 7;
        if shift > 28 {
            return Err(EventError::Json("oversized json length".to_string()));
        }
    }
}

fn offset_at(data: &[u8], at: usize, large: bool) -> Result<usize> {
    if large {
        Ok(u32_at(data, at)? as usize)
    } else {
        Ok(u16_at(data, at)? as usize)
    }
}

fn byte(data: &[u8], at: usize) -> Result<u8> {
    data.get(at).copied().ok_or(EventError::ShortEvent("json"))
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    data.get(at..at + len)
        .ok_or(EventError::ShortEvent("json"))
}

fn fixed<const N: usize>(data: &[u8], at: usize) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(slice(data, at, N)?);
    Ok(out)
}

fn u16_at(data: &[u8], at: usize) -> Result<u16> {
    Ok(u16::from_le_bytes(fixed::<2>(data, at)?))
}

fn i16_at(data: &[u8], at: usize) -> Result<i16> {
    Ok(i16::from_le_bytes(fixed::<2>(data, at)?))
}

fn u32_at(data: &[u8], at: usize) -> Result<u32> {
    Ok(u32::from_le_bytes(fixed::<4>(data, at)?))
}

fn i32_at(data: &[u8], at: usize) -> Result<i32> {
    Ok(i32::from_le_bytes(fixed::<4>(data, at)?))
}

fn u64_at(data: &[u8], at: usize) -> Result<u64> {
    Ok(u64::from_le_bytes(fixed::<8>(data, at)?))
}

fn i64_at(data: &[u8], at: usize) -> Result<i64> {
    Ok(i64::from_le_bytes(fixed::<8>(data, at)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_int() {
        assert_eq!(decode(&[TAG_INT16, 0xff, 0xff]).unwrap(), json!(-1));
        assert_eq!(decode(&[TAG_UINT16, 0x02, 0x01]).unwrap(), json!(258));
    }

    #[test]
    fn small_object_with_inline_value() {
        // {"a": 1}
        let data = [
            TAG_SMALL_OBJECT,
            0x01, 0x00, // element count
            0x0c, 0x00, // byte size
            0x0b, 0x00, // key offset
            0x01, 0x00, // key length
            TAG_INT16, 0x01, 0x00, // inlined value
            b'a',
        ];
        assert_eq!(decode(&data).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn small_array_with_offset_string() {
        // [true, "hi"]
        let data = [
            TAG_SMALL_ARRAY,
            0x02, 0x00, // element count
            0x0d, 0x00, // byte size
            TAG_LITERAL, 0x01, 0x00, // true, inlined
            TAG_STRING, 0x0a, 0x00, // offset 10
            0x02, b'h', b'i',
        ];
        assert_eq!(decode(&data).unwrap(), json!([true, "hi"]));
    }

    #[test]
    fn opaque_renders_as_hex() {
        let data = [TAG_OPAQUE, 0xf6, 0x02, 0xab, 0xcd];
        assert_eq!(decode(&data).unwrap(), json!("abcd"));
    }

    #[test]
    fn truncated_document_errors() {
        let data = [TAG_SMALL_OBJECT, 0x01];
        assert!(decode(&data).is_err());
    }
}
