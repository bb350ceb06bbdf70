//! Stateful event decoder: raw event frames in, typed events out.
//!
//! The decoder keeps the two pieces of cross-event state a binlog
//! requires: the table map cache that row events resolve against, and
//! the checksum algorithm announced by the format description event.

use std::collections::HashMap;
use std::io::Cursor;

use bytes::Buf;

use crate::error::{EventError, Result};
use crate::event::{
    EventHeader, EventPayload, EventType, FormatDescriptionEvent, GtidEvent, LogEvent,
    QueryEvent, RotateEvent, RowsEvent, RowsQueryEvent, TableMapEvent, XidEvent,
};
use crate::value::{self, ColumnType, ColumnValue};

#[derive(Default)]
pub struct BinlogDecoder {
    table_cache: HashMap<u64, TableMapEvent>,
    checksum_alg: u8,
}

impl BinlogDecoder {
    pub fn new() -> BinlogDecoder {
        BinlogDecoder::default()
    }

    /// Decode one event body. The caller frames events and hands over the
    /// parsed header plus the body bytes that followed it.
    pub fn decode(&mut self, header: EventHeader, body: &[u8]) -> Result<LogEvent> {
        // CRC32 trailers are framing, not payload. The format description
        // event keeps its own trailer since the algorithm byte sits inside
        // it; everything after it gets stripped here once.
        let body = if header.event_type != EventType::FormatDescription
            && self.checksum_alg == 1
            && body.len() >= 4
        {
            &body[..body.len() - 4]
        } else {
            body
        };

        let mut cur = Cursor::new(body);
        let payload = match header.event_type {
            EventType::FormatDescription => {
                let fde = decode_format_description(&mut cur, body)?;
                self.checksum_alg = fde.checksum_alg;
                EventPayload::FormatDescription(fde)
            }
            EventType::TableMap => {
                let map = decode_table_map(&mut cur)?;
                self.table_cache.insert(map.table_id, map.clone());
                EventPayload::TableMap(map)
            }
            EventType::WriteRowsV1 => {
                EventPayload::WriteRows(self.decode_rows(&mut cur, 1, false)?)
            }
            EventType::WriteRowsV2 => {
                EventPayload::WriteRows(self.decode_rows(&mut cur, 2, false)?)
            }
            EventType::UpdateRowsV1 => {
                EventPayload::UpdateRows(self.decode_rows(&mut cur, 1, true)?)
            }
            EventType::UpdateRowsV2 => {
                EventPayload::UpdateRows(self.decode_rows(&mut cur, 2, true)?)
            }
            EventType::DeleteRowsV1 => {
                EventPayload::DeleteRows(self.decode_rows(&mut cur, 1, false)?)
            }
            EventType::DeleteRowsV2 => {
                EventPayload::DeleteRows(self.decode_rows(&mut cur, 2, false)?)
            }
            EventType::Query => EventPayload::Query(decode_query(&mut cur, body)?),
            EventType::Xid => {
                value::need(&cur, 8, "xid")?;
                EventPayload::Xid(XidEvent { xid: cur.get_u64_le() })
            }
            EventType::Gtid => EventPayload::Gtid(decode_gtid(&mut cur)?),
            EventType::Rotate => EventPayload::Rotate(decode_rotate(&mut cur, body)?),
            EventType::RowsQuery => {
                value::need(&cur, 1, "rows query")?;
                cur.advance(1);
                let at = cur.position() as usize;
                EventPayload::RowsQuery(RowsQueryEvent {
                    query: String::from_utf8_lossy(&body[at..]).into_owned(),
                })
            }
            other => EventPayload::Ignored(other),
        };
        Ok(LogEvent { header, payload })
    }

    fn decode_rows(
        &self,
        cur: &mut Cursor<&[u8]>,
        version: u8,
        update: bool,
    ) -> Result<RowsEvent> {
        value::need(cur, 8, "rows header")?;
        let table_id = cur.get_uint_le(6);
        let flags = cur.get_u16_le();
        if version == 2 {
            value::need(cur, 2, "rows extra data")?;
            let extra_len = cur.get_u16_le() as usize;
            let skip = extra_len.saturating_sub(2);
            value::need(cur, skip, "rows extra data")?;
            cur.advance(skip);
        }
        let table = self
            .table_cache
            .get(&table_id)
            .ok_or(EventError::UnknownTableId(table_id))?;

        let column_count = read_packed_int(cur)? as usize;
        let bitmap_len = column_count.div_ceil(8);
        let present1 = value::take_bytes(cur, bitmap_len, "columns bitmap")?;
        let present2 = if update {
            value::take_bytes(cur, bitmap_len, "columns bitmap")?
        } else {
            Vec::new()
        };

        let mut rows = Vec::new();
        while cur.remaining() > 0 {
            rows.push(decode_row(cur, table, column_count, &present1)?);
            if update {
                rows.push(decode_row(cur, table, column_count, &present2)?);
            }
        }
        Ok(RowsEvent {
            table_id,
            schema_name: table.schema_name.clone(),
            table_name: table.table_name.clone(),
            column_types: table.column_types.clone(),
            rows,
            flags,
        })
    }
}

fn bit(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .is_some_and(|b| b & (1 << (index % 8)) != 0)
}

fn decode_row(
    cur: &mut Cursor<&[u8]>,
    table: &TableMapEvent,
    column_count: usize,
    present: &[u8],
) -> Result<Vec<ColumnValue>> {
    let present_count = (0..column_count).filter(|&i| bit(present, i)).count();
    let null_bitmap = value::take_bytes(cur, present_count.div_ceil(8), "null bitmap")?;

    let mut row = Vec::with_capacity(column_count);
    let mut present_idx = 0;
    for i in 0..column_count {
        if !bit(present, i) {
            // Column absent from this row image.
            row.push(ColumnValue::Null);
            continue;
        }
        let is_null = bit(&null_bitmap, present_idx);
        present_idx += 1;
        if is_null {
            row.push(ColumnValue::Null);
            continue;
        }
        let ty = *table
            .column_types
            .get(i)
            .ok_or(EventError::ShortEvent("column types"))?;
        let meta = table.column_metadata.get(i).copied().unwrap_or(0);
        row.push(value::decode_value(cur, ty, meta)?);
    }
    Ok(row)
}

fn decode_format_description(
    cur: &mut Cursor<&[u8]>,
    body: &[u8],
) -> Result<FormatDescriptionEvent> {
    value::need(cur, 57, "format description")?;
    let binlog_version = cur.get_u16_le();
    let mut raw_version = [0u8; 50];
    cur.copy_to_slice(&mut raw_version);
    let end = raw_version
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(raw_version.len());
    let server_version = String::from_utf8_lossy(&raw_version[..end]).into_owned();
    let create_timestamp = cur.get_u32_le();
    let common_header_len = cur.get_u8();

    // Servers from 5.6.1 append the checksum algorithm byte and a CRC of
    // the event itself.
    let checksum_alg = if version_at_least(&server_version, 5, 6, 1) && body.len() >= 5 {
        body[body.len() - 5]
    } else {
        0
    };
    Ok(FormatDescriptionEvent {
        binlog_version,
        server_version,
        create_timestamp,
        common_header_len,
        checksum_alg,
    })
}

fn decode_table_map(cur: &mut Cursor<&[u8]>) -> Result<TableMapEvent> {
    value::need(cur, 8, "table map header")?;
    let table_id = cur.get_uint_le(6);
    cur.advance(2); // flags

    value::need(cur, 1, "table map schema")?;
    let schema_len = cur.get_u8() as usize;
    let schema_name =
        String::from_utf8_lossy(&value::take_bytes(cur, schema_len, "table map schema")?)
            .into_owned();
    value::need(cur, 1, "table map schema")?;
    cur.advance(1); // NUL

    value::need(cur, 1, "table map table")?;
    let table_len = cur.get_u8() as usize;
    let table_name =
        String::from_utf8_lossy(&value::take_bytes(cur, table_len, "table map table")?)
            .into_owned();
    value::need(cur, 1, "table map table")?;
    cur.advance(1); // NUL

    let column_count = read_packed_int(cur)? as usize;
    let raw_types = value::take_bytes(cur, column_count, "column types")?;
    let mut column_types = Vec::with_capacity(column_count);
    for tag in raw_types {
        column_types.push(ColumnType::from_u8(tag)?);
    }

    let metadata_len = read_packed_int(cur)? as usize;
    value::need(cur, metadata_len, "column metadata")?;
    let column_metadata = decode_column_metadata(cur, &column_types)?;

    let null_bitmap = value::take_bytes(cur, column_count.div_ceil(8), "null bitmap")?;
    Ok(TableMapEvent {
        table_id,
        schema_name,
        table_name,
        column_count,
        column_types,
        column_metadata,
        null_bitmap,
    })
}

/// Per-column metadata widths vary by type; see the table map layout in
/// the replication protocol.
fn decode_column_metadata(
    cur: &mut Cursor<&[u8]>,
    types: &[ColumnType],
) -> Result<Vec<u16>> {
    let mut metadata = Vec::with_capacity(types.len());
    for ty in types {
        let meta = match ty {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::Blob
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Geometry
            | ColumnType::Json
            | ColumnType::Vector
            | ColumnType::Timestamp2
            | ColumnType::DateTime2
            | ColumnType::Time2
            | ColumnType::Enum
            | ColumnType::Set => {
                value::need(cur, 1, "column metadata")?;
                cur.get_u8() as u16
            }
            ColumnType::Varchar | ColumnType::Bit => {
                value::need(cur, 2, "column metadata")?;
                cur.get_u16_le()
            }
            ColumnType::NewDecimal | ColumnType::VarString | ColumnType::String => {
                // Two bytes, packed big-endian style.
                value::need(cur, 2, "column metadata")?;
                let b0 = cur.get_u8() as u16;
                let b1 = cur.get_u8() as u16;
                (b0 << 8) | b1
            }
            _ => 0,
        };
        metadata.push(meta);
    }
    Ok(metadata)
}

fn decode_query(cur: &mut Cursor<&[u8]>, body: &[u8]) -> Result<QueryEvent> {
    value::need(cur, 13, "query header")?;
    let thread_id = cur.get_u32_le();
    let execution_time = cur.get_u32_le();
    let schema_len = cur.get_u8() as usize;
    let error_code = cur.get_u16_le();
    let status_vars_len = cur.get_u16_le() as usize;
    value::need(cur, status_vars_len, "query status vars")?;
    cur.advance(status_vars_len);

    let schema =
        String::from_utf8_lossy(&value::take_bytes(cur, schema_len, "query schema")?)
            .into_owned();
    value::need(cur, 1, "query schema")?;
    cur.advance(1); // NUL
    let at = cur.position() as usize;
    let query = String::from_utf8_lossy(&body[at..]).into_owned();
    Ok(QueryEvent {
        thread_id,
        execution_time,
        error_code,
        schema,
        query,
    })
}

fn decode_gtid(cur: &mut Cursor<&[u8]>) -> Result<GtidEvent> {
    value::need(cur, 25, "gtid")?;
    let flags = cur.get_u8();
    let mut sid = [0u8; 16];
    cur.copy_to_slice(&mut sid);
    let sequence = cur.get_u64_le();
    Ok(GtidEvent {
        flags,
        source_id: uuid::Uuid::from_bytes(sid),
        sequence,
    })
}

fn decode_rotate(cur: &mut Cursor<&[u8]>, body: &[u8]) -> Result<RotateEvent> {
    value::need(cur, 8, "rotate")?;
    let position = cur.get_u64_le();
    let at = cur.position() as usize;
    Ok(RotateEvent {
        position,
        next_file: String::from_utf8_lossy(&body[at..]).into_owned(),
    })
}

/// Length-encoded integer as used for column counts.
pub(crate) fn read_packed_int(cur: &mut Cursor<&[u8]>) -> Result<u64> {
    value::need(cur, 1, "length-encoded integer")?;
    let first = cur.get_u8();
    match first {
        0..=250 => Ok(first as u64),
        252 => {
            value::need(cur, 2, "length-encoded integer")?;
            Ok(cur.get_u16_le() as u64)
        }
        253 => {
            value::need(cur, 3, "length-encoded integer")?;
            Ok(cur.get_uint_le(3))
        }
        254 => {
            value::need(cur, 8, "length-encoded integer")?;
            Ok(cur.get_u64_le())
        }
        other => Err(EventError::InvalidPackedInt(other)),
    }
}

fn version_at_least(version: &str, major: u32, minor: u32, patch: u32) -> bool {
    let mut parts = [0u32; 3];
    for (i, piece) in version.split('.').take(3).enumerate() {
        let digits: String = piece
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        parts[i] = digits.parse().unwrap_or(0);
    }
    parts >= [major, minor, patch]
}
