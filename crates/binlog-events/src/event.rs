//! Event types, headers, and decoded payload structures.

use std::fmt;

use uuid::Uuid;

use crate::error::{EventError, Result};
use crate::value::{ColumnType, ColumnValue};

/// Magic bytes opening a plain binlog file.
pub const BINLOG_MAGIC: [u8; 4] = [0xfe, b'b', b'i', b'n'];
/// Magic bytes opening an encrypted binlog container.
pub const ENCRYPTED_MAGIC: [u8; 4] = [0xfd, b'b', b'i', b'n'];

/// Length of the fixed file magic.
pub const FILE_HEADER_LEN: usize = 4;
/// Length of the fixed per-event header.
pub const EVENT_HEADER_LEN: usize = 19;

/// How a binlog container stores its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Plain,
    Encrypted,
}

/// Classify the first four bytes of a file.
pub fn classify_magic(magic: &[u8; 4]) -> Result<ContainerKind> {
    if *magic == BINLOG_MAGIC {
        Ok(ContainerKind::Plain)
    } else if *magic == ENCRYPTED_MAGIC {
        Ok(ContainerKind::Encrypted)
    } else {
        Err(EventError::NotABinlog(*magic))
    }
}

/// Binlog event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Query,
    Stop,
    Rotate,
    FormatDescription,
    Xid,
    TableMap,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Heartbeat,
    RowsQuery,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    Unknown(u8),
}

impl EventType {
    pub fn from_u8(tag: u8) -> EventType {
        match tag {
            0x02 => EventType::Query,
            0x03 => EventType::Stop,
            0x04 => EventType::Rotate,
            0x0f => EventType::FormatDescription,
            0x10 => EventType::Xid,
            0x13 => EventType::TableMap,
            0x17 => EventType::WriteRowsV1,
            0x18 => EventType::UpdateRowsV1,
            0x19 => EventType::DeleteRowsV1,
            0x1b => EventType::Heartbeat,
            0x1d => EventType::RowsQuery,
            0x1e => EventType::WriteRowsV2,
            0x1f => EventType::UpdateRowsV2,
            0x20 => EventType::DeleteRowsV2,
            0x21 => EventType::Gtid,
            0x22 => EventType::AnonymousGtid,
            0x23 => EventType::PreviousGtids,
            other => EventType::Unknown(other),
        }
    }
}

/// The fixed 19-byte header every event starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Wall-clock seconds when the event was written.
    pub timestamp: u32,
    pub event_type: EventType,
    /// Server id of the event's origin.
    pub server_id: u32,
    /// Total event size including this header.
    pub event_size: u32,
    /// Position of the first byte after this event in the log.
    pub log_pos: u32,
    pub flags: u16,
}

impl EventHeader {
    /// Decode a header from the first 19 bytes of an event.
    pub fn parse(buf: &[u8]) -> Result<EventHeader> {
        if buf.len() < EVENT_HEADER_LEN {
            return Err(EventError::TruncatedEvent {
                expected: EVENT_HEADER_LEN,
                got: buf.len(),
            });
        }
        let header = EventHeader {
            timestamp: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            event_type: EventType::from_u8(buf[4]),
            server_id: u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
            event_size: u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
            log_pos: u32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]),
            flags: u16::from_le_bytes([buf[17], buf[18]]),
        };
        if header.event_size as usize <= EVENT_HEADER_LEN {
            return Err(EventError::InvalidEventSize(header.event_size));
        }
        Ok(header)
    }
}

/// FORMAT_DESCRIPTION_EVENT: declares the writer's version and whether
/// events carry a trailing CRC32 checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub common_header_len: u8,
    /// 0 = off, 1 = CRC32.
    pub checksum_alg: u8,
}

/// TABLE_MAP_EVENT: column layout for a table id used by later rows events.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub schema_name: String,
    pub table_name: String,
    pub column_count: usize,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
    pub null_bitmap: Vec<u8>,
}

/// A decoded rows event (insert, update, or delete).
///
/// Rows are flat: an update event stores alternating before/after images,
/// so row index 2k is the before-image and 2k+1 the after-image of the
/// k-th logical update.
#[derive(Debug, Clone, PartialEq)]
pub struct RowsEvent {
    pub table_id: u64,
    pub schema_name: String,
    pub table_name: String,
    pub column_types: Vec<ColumnType>,
    pub rows: Vec<Vec<ColumnValue>>,
    pub flags: u16,
}

impl RowsEvent {
    /// Backtick-quoted `schema`.`table` name.
    pub fn qualified_name(&self) -> String {
        format!("`{}`.`{}`", self.schema_name, self.table_name)
    }

    /// Backtick-quoted table name without the schema.
    pub fn table_only(&self) -> String {
        format!("`{}`", self.table_name)
    }
}

/// QUERY_EVENT: a statement executed on the source.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
    /// Connection id the statement ran on.
    pub thread_id: u32,
    /// Statement execution time in seconds, as reported by the source.
    pub execution_time: u32,
    pub error_code: u16,
    /// Default database at execution time.
    pub schema: String,
    pub query: String,
}

/// GTID_EVENT: marks the transaction that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtidEvent {
    pub flags: u8,
    pub source_id: Uuid,
    pub sequence: u64,
}

impl fmt::Display for GtidEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.sequence)
    }
}

/// XID_EVENT: commit marker of a transactional group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XidEvent {
    pub xid: u64,
}

/// ROTATE_EVENT: the log continues in another file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateEvent {
    pub position: u64,
    pub next_file: String,
}

/// ROWS_QUERY_EVENT: the original statement text of a rows event, when the
/// source logs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsQueryEvent {
    pub query: String,
}

/// Type-specific payload of a decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    FormatDescription(FormatDescriptionEvent),
    TableMap(TableMapEvent),
    WriteRows(RowsEvent),
    UpdateRows(RowsEvent),
    DeleteRows(RowsEvent),
    Query(QueryEvent),
    Gtid(GtidEvent),
    Xid(XidEvent),
    Rotate(RotateEvent),
    RowsQuery(RowsQueryEvent),
    /// Event types the pipeline has no use for; kept for position tracking.
    Ignored(EventType),
}

/// A fully decoded binlog event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub header: EventHeader,
    pub payload: EventPayload,
}

impl LogEvent {
    /// The rows payload, when this is a row-mutation event.
    pub fn rows(&self) -> Option<&RowsEvent> {
        match &self.payload {
            EventPayload::WriteRows(r)
            | EventPayload::UpdateRows(r)
            | EventPayload::DeleteRows(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_classification() {
        assert_eq!(
            classify_magic(&BINLOG_MAGIC).unwrap(),
            ContainerKind::Plain
        );
        assert_eq!(
            classify_magic(&ENCRYPTED_MAGIC).unwrap(),
            ContainerKind::Encrypted
        );
        let err = classify_magic(&[0x00, b'b', b'i', b'n']).unwrap_err();
        assert!(matches!(err, EventError::NotABinlog(_)));
    }

    #[test]
    fn header_round_trip() {
        let mut buf = [0u8; 19];
        buf[0..4].copy_from_slice(&100u32.to_le_bytes());
        buf[4] = 0x10;
        buf[5..9].copy_from_slice(&7u32.to_le_bytes());
        buf[9..13].copy_from_slice(&31u32.to_le_bytes());
        buf[13..17].copy_from_slice(&420u32.to_le_bytes());
        buf[17..19].copy_from_slice(&1u16.to_le_bytes());

        let h = EventHeader::parse(&buf).unwrap();
        assert_eq!(h.timestamp, 100);
        assert_eq!(h.event_type, EventType::Xid);
        assert_eq!(h.server_id, 7);
        assert_eq!(h.event_size, 31);
        assert_eq!(h.log_pos, 420);
        assert_eq!(h.flags, 1);
    }

    #[test]
    fn header_rejects_impossible_size() {
        let mut buf = [0u8; 19];
        buf[9..13].copy_from_slice(&19u32.to_le_bytes());
        assert!(matches!(
            EventHeader::parse(&buf),
            Err(EventError::InvalidEventSize(19))
        ));
    }

    #[test]
    fn gtid_display() {
        let g = GtidEvent {
            flags: 1,
            source_id: Uuid::from_bytes([0xab; 16]),
            sequence: 42,
        };
        assert_eq!(g.to_string(), "abababab-abab-abab-abab-abababababab:42");
    }
}
