//! Error type shared by keyring parsing and binlog decryption.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyringError {
    /// The keyring file does not start with the expected magic.
    #[error("not a keyring file: bad magic")]
    KeyringMagic,
    /// Only version 2.0 keyring files are supported.
    #[error("unsupported keyring version {0:?}")]
    KeyringVersion(String),
    /// A record ran past the end of the keyring file.
    #[error("keyring file ends mid-record")]
    KeyringTruncated,
    /// No key in the keyring matches the id the binlog names.
    #[error("key {0:?} not found in keyring")]
    KeyNotFound(String),
    /// The file does not carry the encrypted binlog magic.
    #[error("not an encrypted binlog: magic {0:02x?}")]
    NotEncrypted([u8; 4]),
    /// Encrypted header version byte other than 1.
    #[error("unsupported encrypted header version {0}")]
    HeaderVersion(u8),
    /// Unknown field type inside the encrypted header.
    #[error("unknown encrypted header field type {0}")]
    HeaderFieldType(u8),
    /// The fixed-size encrypted header is incomplete.
    #[error("encrypted binlog header is truncated")]
    HeaderTruncated,
    /// A required header field never appeared.
    #[error("encrypted header missing {0} field")]
    MissingHeaderField(&'static str),
    /// The keyring key has the wrong length for AES-256.
    #[error("key {id:?} has length {len}, expected 32")]
    InvalidKeyLength { id: String, len: usize },
    /// CBC unwrap of the file password failed.
    #[error("failed to unwrap file password")]
    PasswordUnwrap,
    /// Underlying file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeyringError>;
