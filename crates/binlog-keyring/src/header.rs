//! The fixed 512-byte header that fronts an encrypted binlog file.

use crate::error::{KeyringError, Result};

/// Encrypted files reserve this much before the first event byte.
pub const ENCRYPT_HEADER_LEN: usize = 512;

const ENCRYPTED_MAGIC: [u8; 4] = [0xfd, b'b', b'i', b'n'];

const FIELD_KEY_ID: u8 = 1;
const FIELD_PASSWORD: u8 = 2;
const FIELD_IV: u8 = 3;

/// Parsed header fields: which keyring key wraps the file password, the
/// wrapped password itself, and the IV used for the unwrap.
pub struct EncryptedHeader {
    pub key_id: String,
    pub wrapped_password: [u8; 32],
    pub iv: [u8; 16],
}

/// Parse the encrypted file header. Fields sit in a type-tagged list
/// after the magic and version byte; only the key id carries a length,
/// the password and IV are fixed width. A zero type byte ends the list,
/// the rest of the 512 bytes is padding.
pub fn parse_encrypted_header(buf: &[u8]) -> Result<EncryptedHeader> {
    if buf.len() < ENCRYPT_HEADER_LEN {
        return Err(KeyringError::HeaderTruncated);
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&buf[..4]);
    if magic != ENCRYPTED_MAGIC {
        return Err(KeyringError::NotEncrypted(magic));
    }
    let version = buf[4];
    if version != 1 {
        return Err(KeyringError::HeaderVersion(version));
    }

    let mut key_id = None;
    let mut wrapped_password = None;
    let mut iv = None;
    let mut at = 5;
    while at < ENCRYPT_HEADER_LEN {
        let field_type = buf[at];
        at += 1;
        match field_type {
            0 => break,
            FIELD_KEY_ID => {
                let len = *buf.get(at).ok_or(KeyringError::HeaderTruncated)? as usize;
                at += 1;
                let raw = buf
                    .get(at..at + len)
                    .ok_or(KeyringError::HeaderTruncated)?;
                key_id = Some(String::from_utf8_lossy(raw).into_owned());
                at += len;
            }
            FIELD_PASSWORD => {
                let raw = buf
                    .get(at..at + 32)
                    .ok_or(KeyringError::HeaderTruncated)?;
                let mut out = [0u8; 32];
                out.copy_from_slice(raw);
                wrapped_password = Some(out);
                at += 32;
            }
            FIELD_IV => {
                let raw = buf
                    .get(at..at + 16)
                    .ok_or(KeyringError::HeaderTruncated)?;
                let mut out = [0u8; 16];
                out.copy_from_slice(raw);
                iv = Some(out);
                at += 16;
            }
            other => return Err(KeyringError::HeaderFieldType(other)),
        }
    }

    Ok(EncryptedHeader {
        key_id: key_id.ok_or(KeyringError::MissingHeaderField("key id"))?,
        wrapped_password: wrapped_password
            .ok_or(KeyringError::MissingHeaderField("password"))?,
        iv: iv.ok_or(KeyringError::MissingHeaderField("iv"))?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a well-formed 512-byte header for tests.
    pub(crate) fn encrypted_header(
        key_id: &str,
        wrapped_password: &[u8; 32],
        iv: &[u8; 16],
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENCRYPT_HEADER_LEN);
        buf.extend_from_slice(&ENCRYPTED_MAGIC);
        buf.push(1); // version
        buf.push(FIELD_KEY_ID);
        buf.push(key_id.len() as u8);
        buf.extend_from_slice(key_id.as_bytes());
        buf.push(FIELD_PASSWORD);
        buf.extend_from_slice(wrapped_password);
        buf.push(FIELD_IV);
        buf.extend_from_slice(iv);
        buf.resize(ENCRYPT_HEADER_LEN, 0);
        buf
    }

    #[test]
    fn parses_all_fields() {
        let buf = encrypted_header("MySQLReplicationKey_1", &[7u8; 32], &[9u8; 16]);
        let header = parse_encrypted_header(&buf).unwrap();
        assert_eq!(header.key_id, "MySQLReplicationKey_1");
        assert_eq!(header.wrapped_password, [7u8; 32]);
        assert_eq!(header.iv, [9u8; 16]);
    }

    #[test]
    fn rejects_plain_binlog() {
        let mut buf = vec![0u8; ENCRYPT_HEADER_LEN];
        buf[..4].copy_from_slice(&[0xfe, b'b', b'i', b'n']);
        assert!(matches!(
            parse_encrypted_header(&buf),
            Err(KeyringError::NotEncrypted(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = encrypted_header("k", &[0u8; 32], &[0u8; 16]);
        buf[4] = 2;
        assert!(matches!(
            parse_encrypted_header(&buf),
            Err(KeyringError::HeaderVersion(2))
        ));
    }

    #[test]
    fn short_header_is_truncated() {
        assert!(matches!(
            parse_encrypted_header(&[0xfd, b'b', b'i', b'n']),
            Err(KeyringError::HeaderTruncated)
        ));
    }

    #[test]
    fn missing_iv_is_reported() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ENCRYPTED_MAGIC);
        buf.push(1);
        buf.push(FIELD_KEY_ID);
        buf.push(1);
        buf.push(b'k');
        buf.push(FIELD_PASSWORD);
        buf.extend_from_slice(&[0u8; 32]);
        buf.resize(ENCRYPT_HEADER_LEN, 0);
        assert!(matches!(
            parse_encrypted_header(&buf),
            Err(KeyringError::MissingHeaderField("iv"))
        ));
    }
}
