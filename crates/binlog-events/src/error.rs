//! Error types for binlog container classification and event decoding.

use thiserror::Error;

/// Errors produced while classifying a binlog container or decoding events.
#[derive(Debug, Error)]
pub enum EventError {
    /// The first four bytes match neither the plain nor the encrypted magic.
    #[error("not a binlog: unrecognized magic {0:02x?}")]
    NotABinlog([u8; 4]),

    /// An event header declared a size that cannot hold the header itself.
    #[error("invalid event header, event size {0} is too small")]
    InvalidEventSize(u32),

    /// The source ended before a complete event could be read.
    #[error("truncated event: need {expected} bytes, got {got}")]
    TruncatedEvent { expected: usize, got: usize },

    /// A rows event arrived before the table map describing its table id.
    #[error("rows event references unknown table id {0}")]
    UnknownTableId(u64),

    /// A length-encoded integer used a prefix this decoder does not accept.
    #[error("unsupported length-encoded integer prefix {0:#04x}")]
    InvalidPackedInt(u8),

    /// A column carried a type tag outside the known set.
    #[error("unknown column type {0:#04x}")]
    UnknownColumnType(u8),

    /// An event body ended in the middle of the named structure.
    #[error("event body ended early while decoding {0}")]
    ShortEvent(&'static str),

    /// A JSON column value did not follow the binary JSON layout.
    #[error("malformed binary json: {0}")]
    Json(String),

    /// I/O failure from the underlying byte source.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
