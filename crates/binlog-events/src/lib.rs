//! MySQL binlog event decoding.
//!
//! This crate turns raw binlog bytes into typed events: container magic
//! classification, the 19-byte event header, and payload decoders for the
//! event kinds a rebuild needs (format description, table maps, row
//! images, queries, transaction markers). Decoding is I/O free; callers
//! own framing, file handling and decryption.

pub mod decoder;
pub mod error;
pub mod event;
mod json;
pub mod value;

pub use decoder::BinlogDecoder;
pub use error::{EventError, Result};
pub use event::{
    classify_magic, ContainerKind, EventHeader, EventPayload, EventType,
    FormatDescriptionEvent, GtidEvent, LogEvent, QueryEvent, RotateEvent, RowsEvent,
    RowsQueryEvent, TableMapEvent, XidEvent, BINLOG_MAGIC, ENCRYPTED_MAGIC,
    EVENT_HEADER_LEN, FILE_HEADER_LEN,
};
pub use value::{ColumnType, ColumnValue};
