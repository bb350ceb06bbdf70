//! Column type tags, decoded column values, and their wire decoding.

use std::fmt;
use std::io::Cursor;

use bytes::Buf;

use crate::error::{EventError, Result};
use crate::json;

/// MySQL column type tags as they appear in table map events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    NewDate,
    Varchar,
    Bit,
    Timestamp2,
    DateTime2,
    Time2,
    Vector,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
}

impl ColumnType {
    pub fn from_u8(tag: u8) -> Result<ColumnType> {
        Ok(match tag {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            242 => ColumnType::Vector,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            other => return Err(EventError::UnknownColumnType(other)),
        })
    }
}

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    /// All fixed-width integers, sign-extended; the column type tag keeps
    /// the original width.
    SignedInt(i64),
    Float(f32),
    Double(f64),
    /// Exact decimal, already rendered to its text form.
    Decimal(String),
    /// Seconds since the epoch (TIMESTAMP before fractional support).
    Timestamp(u32),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    Time {
        negative: bool,
        hours: u32,
        minutes: u8,
        seconds: u8,
        micros: u32,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        micros: u32,
    },
    Enum(u64),
    Set(u64),
    /// Text-typed bytes (VARCHAR/CHAR), kept raw to stay charset-faithful.
    String(Vec<u8>),
    /// Binary payloads: blobs, geometry, vectors.
    Bytes(Vec<u8>),
    /// BIT column bytes in big-endian order.
    Bit(Vec<u8>),
    Json(serde_json::Value),
}

impl fmt::Display for ColumnValue {
    /// Default text form, with no SQL quoting applied.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::SignedInt(v) => write!(f, "{v}"),
            ColumnValue::Float(v) => write!(f, "{v}"),
            ColumnValue::Double(v) => write!(f, "{v}"),
            ColumnValue::Decimal(s) => write!(f, "{s}"),
            ColumnValue::Timestamp(epoch) => write!(f, "{epoch}"),
            ColumnValue::Date { year, month, day } => {
                write!(f, "{year:04}-{month:02}-{day:02}")
            }
            ColumnValue::Time {
                negative,
                hours,
                minutes,
                seconds,
                micros,
            } => {
                if *negative {
                    write!(f, "-")?;
                }
                write!(f, "{hours:02}:{minutes:02}:{seconds:02}")?;
                if *micros > 0 {
                    write!(f, ".{micros:06}")?;
                }
                Ok(())
            }
            ColumnValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                micros,
            } => {
                write!(
                    f,
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                )?;
                if *micros > 0 {
                    write!(f, ".{micros:06}")?;
                }
                Ok(())
            }
            ColumnValue::Enum(n) => write!(f, "{n}"),
            ColumnValue::Set(n) => write!(f, "{n}"),
            ColumnValue::String(b) | ColumnValue::Bytes(b) => {
                write!(f, "{}", String::from_utf8_lossy(b))
            }
            ColumnValue::Bit(b) => {
                let n = b.iter().fold(0u64, |acc, &x| (acc << 8) | x as u64);
                write!(f, "{n}")
            }
            ColumnValue::Json(v) => write!(f, "{v}"),
        }
    }
}

pub(crate) fn need(cur: &Cursor<&[u8]>, n: usize, what: &'static str) -> Result<()> {
    if cur.remaining() < n {
        return Err(EventError::ShortEvent(what));
    }
    Ok(())
}

pub(crate) fn take_bytes(
    cur: &mut Cursor<&[u8]>,
    n: usize,
    what: &'static str,
) -> Result<Vec<u8>> {
    need(cur, n, what)?;
    let mut out = vec![0u8; n];
    cur.copy_to_slice(&mut out);
    Ok(out)
}

fn read_be_uint(buf: &[u8]) -> u64 {
    buf.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Decode one column value using its type tag and table-map metadata.
pub(crate) fn decode_value(
    cur: &mut Cursor<&[u8]>,
    ty: ColumnType,
    meta: u16,
) -> Result<ColumnValue> {
    match ty {
        ColumnType::Tiny => {
            need(cur, 1, "tiny int")?;
            Ok(ColumnValue::SignedInt(cur.get_i8() as i64))
        }
        ColumnType::Short => {
            need(cur, 2, "short int")?;
            Ok(ColumnValue::SignedInt(cur.get_i16_le() as i64))
        }
        ColumnType::Int24 => {
            need(cur, 3, "medium int")?;
            let mut v = cur.get_uint_le(3) as u32;
            if v & 0x0080_0000 != 0 {
                v |= 0xff00_0000;
            }
            Ok(ColumnValue::SignedInt(v as i32 as i64))
        }
        ColumnType::Long => {
            need(cur, 4, "int")?;
            Ok(ColumnValue::SignedInt(cur.get_i32_le() as i64))
        }
        ColumnType::LongLong => {
            need(cur, 8, "bigint")?;
            Ok(ColumnValue::SignedInt(cur.get_i64_le()))
        }
        ColumnType::Float => {
            need(cur, 4, "float")?;
            Ok(ColumnValue::Float(cur.get_f32_le()))
        }
        ColumnType::Double => {
            need(cur, 8, "double")?;
            Ok(ColumnValue::Double(cur.get_f64_le()))
        }
        ColumnType::Year => {
            need(cur, 1, "year")?;
            let v = cur.get_u8() as i64;
            // A stored zero is the zero year, not 1900.
            Ok(ColumnValue::SignedInt(if v == 0 { 0 } else { 1900 + v }))
        }
        ColumnType::Date | ColumnType::NewDate => {
            need(cur, 3, "date")?;
            let v = cur.get_uint_le(3) as u32;
            Ok(ColumnValue::Date {
                year: (v >> 9) as u16,
                month: ((v >> 5) & 0x0f) as u8,
                day: (v & 0x1f) as u8,
            })
        }
        ColumnType::Time => {
            need(cur, 3, "time")?;
            let mut v = cur.get_uint_le(3) as u32 as i32;
            if v & 0x0080_0000 != 0 {
                v = (v as u32 | 0xff00_0000) as i32;
            }
            let negative = v < 0;
            let a = v.unsigned_abs();
            Ok(ColumnValue::Time {
                negative,
                hours: a / 10_000,
                minutes: ((a % 10_000) / 100) as u8,
                seconds: (a % 100) as u8,
                micros: 0,
            })
        }
        ColumnType::DateTime => {
            need(cur, 8, "datetime")?;
            let v = cur.get_u64_le();
            let date = v / 1_000_000;
            let time = v % 1_000_000;
            Ok(ColumnValue::DateTime {
                year: (date / 10_000) as u16,
                month: ((date % 10_000) / 100) as u8,
                day: (date % 100) as u8,
                hour: (time / 10_000) as u8,
                minute: ((time % 10_000) / 100) as u8,
                second: (time % 100) as u8,
                micros: 0,
            })
        }
        ColumnType::Timestamp => {
            need(cur, 4, "timestamp")?;
            Ok(ColumnValue::Timestamp(cur.get_u32_le()))
        }
        ColumnType::Timestamp2 => {
            need(cur, 4, "timestamp2")?;
            // Seconds are big-endian here, unlike the v1 encoding.
            let epoch = cur.get_u32() as i64;
            let micros = read_fractional(cur, meta)?;
            let days = epoch.div_euclid(86_400);
            let secs = epoch.rem_euclid(86_400);
            let (year, month, day) = civil_from_days(days);
            Ok(ColumnValue::DateTime {
                year: year as u16,
                month: month as u8,
                day: day as u8,
                hour: (secs / 3600) as u8,
                minute: ((secs % 3600) / 60) as u8,
                second: (secs % 60) as u8,
                micros,
            })
        }
        ColumnType::DateTime2 => {
            need(cur, 5, "datetime2")?;
            let packed = cur.get_uint(5);
            let micros = read_fractional(cur, meta)?;
            let year_month = (packed >> 22) & 0x1_ffff;
            Ok(ColumnValue::DateTime {
                year: (year_month / 13) as u16,
                month: (year_month % 13) as u8,
                day: ((packed >> 17) & 0x1f) as u8,
                hour: ((packed >> 12) & 0x1f) as u8,
                minute: ((packed >> 6) & 0x3f) as u8,
                second: (packed & 0x3f) as u8,
                micros,
            })
        }
        ColumnType::Time2 => {
            need(cur, 3, "time2")?;
            let raw = cur.get_uint(3) as u32;
            let micros = read_fractional(cur, meta)?;
            // Sign bit set means non-negative; negative magnitudes count
            // down from the sign bit.
            let (negative, v) = if raw & 0x0080_0000 != 0 {
                (false, raw & 0x007f_ffff)
            } else {
                (true, 0x0080_0000 - raw)
            };
            Ok(ColumnValue::Time {
                negative,
                hours: (v >> 12) & 0x3ff,
                minutes: ((v >> 6) & 0x3f) as u8,
                seconds: (v & 0x3f) as u8,
                micros,
            })
        }
        ColumnType::NewDecimal => decode_decimal(cur, meta),
        ColumnType::Varchar => {
            let len = if meta < 256 {
                need(cur, 1, "varchar length")?;
                cur.get_u8() as usize
            } else {
                need(cur, 2, "varchar length")?;
                cur.get_u16_le() as usize
            };
            Ok(ColumnValue::String(take_bytes(cur, len, "varchar")?))
        }
        ColumnType::VarString | ColumnType::String => decode_string_family(cur, meta),
        ColumnType::Enum => {
            let n = match meta {
                2 => {
                    need(cur, 2, "enum")?;
                    cur.get_u16_le() as u64
                }
                _ => {
                    need(cur, 1, "enum")?;
                    cur.get_u8() as u64
                }
            };
            Ok(ColumnValue::Enum(n))
        }
        ColumnType::Set => {
            let width = (meta as usize).clamp(1, 8);
            need(cur, width, "set")?;
            Ok(ColumnValue::Set(cur.get_uint_le(width)))
        }
        ColumnType::Bit => {
            let nbits = ((meta >> 8) * 8 + (meta & 0xff)) as usize;
            let nbytes = nbits.div_ceil(8);
            Ok(ColumnValue::Bit(take_bytes(cur, nbytes, "bit")?))
        }
        ColumnType::Json => {
            let data = read_blob(cur, meta, "json")?;
            if data.is_empty() {
                return Ok(ColumnValue::Json(serde_json::Value::Null));
            }
            Ok(ColumnValue::Json(json::decode(&data)?))
        }
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Geometry
        | ColumnType::Vector => Ok(ColumnValue::Bytes(read_blob(cur, meta, "blob")?)),
        ColumnType::Null => Ok(ColumnValue::Null),
        ColumnType::Decimal => Err(EventError::UnknownColumnType(0)),
    }
}

/// CHAR/ENUM/SET share the String type tag; the real type hides in the
/// metadata's first byte.
fn decode_string_family(cur: &mut Cursor<&[u8]>, meta: u16) -> Result<ColumnValue> {
    let b0 = (meta >> 8) as u8;
    let b1 = (meta & 0xff) as u8;
    if b0 == 0 {
        let len = {
            need(cur, 1, "string length")?;
            cur.get_u8() as usize
        };
        return Ok(ColumnValue::String(take_bytes(cur, len, "string")?));
    }
    let (real, max_len) = if b0 & 0x30 != 0x30 {
        // Field lengths over 255 bytes steal two bits from the type byte.
        (
            b0 | 0x30,
            (b1 as u16) | ((((b0 as u16) & 0x30) ^ 0x30) << 4),
        )
    } else {
        (b0, b1 as u16)
    };
    match ColumnType::from_u8(real)? {
        ColumnType::Enum => {
            let n = match max_len {
                2 => {
                    need(cur, 2, "enum")?;
                    cur.get_u16_le() as u64
                }
                _ => {
                    need(cur, 1, "enum")?;
                    cur.get_u8() as u64
                }
            };
            Ok(ColumnValue::Enum(n))
        }
        ColumnType::Set => {
            let width = (max_len as usize).clamp(1, 8);
            need(cur, width, "set")?;
            Ok(ColumnValue::Set(cur.get_uint_le(width)))
        }
        _ => {
            let len = if max_len > 255 {
                need(cur, 2, "string length")?;
                cur.get_u16_le() as usize
            } else {
                need(cur, 1, "string length")?;
                cur.get_u8() as usize
            };
            Ok(ColumnValue::String(take_bytes(cur, len, "string")?))
        }
    }
}

fn read_blob(cur: &mut Cursor<&[u8]>, meta: u16, what: &'static str) -> Result<Vec<u8>> {
    let len = match meta {
        1 => {
            need(cur, 1, what)?;
            cur.get_u8() as usize
        }
        2 => {
            need(cur, 2, what)?;
            cur.get_u16_le() as usize
        }
        3 => {
            need(cur, 3, what)?;
            cur.get_uint_le(3) as usize
        }
        4 => {
            need(cur, 4, what)?;
            cur.get_u32_le() as usize
        }
        other => return Err(EventError::InvalidPackedInt(other as u8)),
    };
    take_bytes(cur, len, what)
}

/// Fractional seconds trail the integer part: ceil(fsp / 2) big-endian
/// bytes holding that many digit pairs.
fn read_fractional(cur: &mut Cursor<&[u8]>, fsp: u16) -> Result<u32> {
    let nbytes = (fsp as usize + 1) / 2;
    if nbytes == 0 {
        return Ok(0);
    }
    need(cur, nbytes, "fractional seconds")?;
    let raw = cur.get_uint(nbytes) as u32;
    let scale = match nbytes {
        1 => 10_000,
        2 => 100,
        _ => 1,
    };
    Ok(raw * scale)
}

const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

/// DECIMAL values pack nine decimal digits per four bytes, big-endian,
/// with the sign folded into the first byte's top bit.
fn decode_decimal(cur: &mut Cursor<&[u8]>, meta: u16) -> Result<ColumnValue> {
    let precision = (meta >> 8) as usize;
    let scale = (meta & 0xff) as usize;
    let intg = precision.saturating_sub(scale);
    let intg0 = intg / 9;
    let frac0 = scale / 9;
    let intg0x = intg - intg0 * 9;
    let frac0x = scale - frac0 * 9;
    let bin_size = intg0 * 4 + DIG_TO_BYTES[intg0x] + frac0 * 4 + DIG_TO_BYTES[frac0x];

    let mut buf = take_bytes(cur, bin_size, "decimal")?;
    if buf.is_empty() {
        return Ok(ColumnValue::Decimal("0".to_string()));
    }
    let positive = buf[0] & 0x80 != 0;
    buf[0] ^= 0x80;
    if !positive {
        for b in &mut buf {
            *b = !*b;
        }
    }

    let mut pos = 0;
    let mut int_part = String::new();
    if intg0x > 0 {
        let width = DIG_TO_BYTES[intg0x];
        int_part.push_str(&format!("{:09}", read_be_uint(&buf[pos..pos + width])));
        pos += width;
    }
    for _ in 0..intg0 {
        int_part.push_str(&format!("{:09}", read_be_uint(&buf[pos..pos + 4])));
        pos += 4;
    }
    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };

    let mut frac_part = String::new();
    for _ in 0..frac0 {
        frac_part.push_str(&format!("{:09}", read_be_uint(&buf[pos..pos + 4])));
        pos += 4;
    }
    if frac0x > 0 {
        let width = DIG_TO_BYTES[frac0x];
        frac_part.push_str(&format!(
            "{:0w$}",
            read_be_uint(&buf[pos..pos + width]),
            w = frac0x
        ));
    }

    let mut out = String::new();
    if !positive {
        out.push('-');
    }
    out.push_str(int_part);
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_part);
    }
    Ok(ColumnValue::Decimal(out))
}

/// Days-since-epoch to (year, month, day), proleptic Gregorian.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
