//! Keyring-backed decryption for encrypted binlog files.
//!
//! Encrypted binlogs front their events with a 512-byte header naming a
//! keyring key. That key unwraps a per-file password, whose SHA-512
//! digest yields the AES-256-CTR key and nonce for everything after the
//! header. This crate parses keyring_file stores and headers and exposes
//! the derived cipher stream; it never loads whole binlogs itself.

pub mod error;
pub mod header;
pub mod keyring;
pub mod stream;

pub use error::{KeyringError, Result};
pub use header::{parse_encrypted_header, EncryptedHeader, ENCRYPT_HEADER_LEN};
pub use keyring::{find_key, load_keyring, parse_keyring, KeyringKey, OBFUSCATE_PAD};
pub use stream::{CipherStream, EncryptionContext};
