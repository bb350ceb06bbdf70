//! Parser for keyring_file version 2.0 stores.

use std::fs;
use std::path::Path;

use crate::error::{KeyringError, Result};

const KEYRING_MAGIC: &[u8] = b"Keyring file version:";
const KEYRING_EOF: &[u8] = b"EOF";

/// Pad XORed over key material at rest. This is the fixed pad from the
/// server's keyring_file plugin, obfuscation rather than protection.
pub const OBFUSCATE_PAD: &[u8] = b"*305=Ljt0*!@$Hnm(*-9-w;:";

/// One key from the keyring, with the obfuscation already removed.
pub struct KeyringKey {
    pub key_id: String,
    pub key_type: String,
    pub user_id: String,
    pub key: Vec<u8>,
}

pub fn load_keyring(path: &Path) -> Result<Vec<KeyringKey>> {
    parse_keyring(&fs::read(path)?)
}

/// Parse a keyring store: the version banner, then length-prefixed key
/// records until the literal EOF marker.
pub fn parse_keyring(data: &[u8]) -> Result<Vec<KeyringKey>> {
    if data.len() < KEYRING_MAGIC.len() || &data[..KEYRING_MAGIC.len()] != KEYRING_MAGIC {
        return Err(KeyringError::KeyringMagic);
    }
    let version = data
        .get(21..24)
        .ok_or(KeyringError::KeyringTruncated)?;
    if version != b"2.0" {
        return Err(KeyringError::KeyringVersion(
            String::from_utf8_lossy(version).into_owned(),
        ));
    }

    let mut keys = Vec::new();
    let mut at = 24;
    loop {
        match data.get(at..at + KEYRING_EOF.len()) {
            Some(KEYRING_EOF) => break,
            None => return Err(KeyringError::KeyringTruncated),
            Some(_) => {}
        }
        let (key, total) = parse_record(&data[at..])?;
        keys.push(key);
        at += total;
    }
    Ok(keys)
}

/// Record layout: total length, then the four field lengths (key id,
/// type, owner, key material), each u64 little-endian, then the fields
/// back to back.
fn parse_record(record: &[u8]) -> Result<(KeyringKey, usize)> {
    if record.len() < 40 {
        return Err(KeyringError::KeyringTruncated);
    }
    let total = u64_le(record, 0) as usize;
    let id_len = u64_le(record, 8) as usize;
    let type_len = u64_le(record, 16) as usize;
    let user_len = u64_le(record, 24) as usize;
    let key_len = u64_le(record, 32) as usize;

    let end = 40 + id_len + type_len + user_len + key_len;
    if total < end || record.len() < total {
        return Err(KeyringError::KeyringTruncated);
    }

    let mut at = 40;
    let mut field = |len: usize| {
        let out = &record[at..at + len];
        at += len;
        out
    };
    let key_id = String::from_utf8_lossy(field(id_len)).into_owned();
    let key_type = String::from_utf8_lossy(field(type_len)).into_owned();
    let user_id = String::from_utf8_lossy(field(user_len)).into_owned();
    let mut key = field(key_len).to_vec();
    for (i, b) in key.iter_mut().enumerate() {
        *b ^= OBFUSCATE_PAD[i % OBFUSCATE_PAD.len()];
    }

    Ok((
        KeyringKey {
            key_id,
            key_type,
            user_id,
            key,
        },
        total,
    ))
}

/// Find the key a binlog header names. Server-side ids differ only in
/// case from what some tools write, so the match ignores ASCII case.
pub fn find_key<'a>(keys: &'a [KeyringKey], key_id: &str) -> Result<&'a KeyringKey> {
    keys.iter()
        .find(|k| k.key_id.eq_ignore_ascii_case(key_id))
        .ok_or_else(|| KeyringError::KeyNotFound(key_id.to_string()))
}

fn u64_le(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}
