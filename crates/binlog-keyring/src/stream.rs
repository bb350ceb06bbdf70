//! File password unwrap, key derivation, and the event byte stream.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit, StreamCipher};
use sha2::{Digest, Sha512};

use crate::error::{KeyringError, Result};
use crate::header::EncryptedHeader;
use crate::keyring::KeyringKey;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Derived stream key material for one binlog file.
///
/// Holds secrets: no Debug impl, and nothing here is ever logged or
/// written out.
pub struct EncryptionContext {
    key: [u8; 32],
    iv: [u8; 16],
}

impl EncryptionContext {
    /// Unwrap the file password with the keyring key, then derive the
    /// stream key and IV from the password's SHA-512 digest.
    pub fn derive(header: &EncryptedHeader, key: &KeyringKey) -> Result<EncryptionContext> {
        if key.key.len() != 32 {
            return Err(KeyringError::InvalidKeyLength {
                id: key.key_id.clone(),
                len: key.key.len(),
            });
        }
        let mut key_arr = [0u8; 32];
        key_arr.copy_from_slice(&key.key);

        let mut password = header.wrapped_password;
        let plain = Aes256CbcDec::new(&key_arr.into(), &header.iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut password)
            .map_err(|_| KeyringError::PasswordUnwrap)?;

        let digest = Sha512::digest(plain);
        let mut stream_key = [0u8; 32];
        stream_key.copy_from_slice(&digest[..32]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&digest[32..48]);
        // The counter occupies the low half of the nonce and starts at
        // zero for the first event byte.
        iv[8..16].fill(0);
        Ok(EncryptionContext {
            key: stream_key,
            iv,
        })
    }

    /// Start a cipher stream positioned at the first event byte, the one
    /// that follows the fixed header on disk.
    pub fn stream(&self) -> CipherStream {
        CipherStream {
            cipher: Aes256Ctr::new(&self.key.into(), &self.iv.into()),
        }
    }
}

/// AES-256-CTR keystream over the event bytes. Chunks must be fed in
/// file order; there is no seeking.
pub struct CipherStream {
    cipher: Aes256Ctr,
}

impl core::fmt::Debug for CipherStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CipherStream").finish_non_exhaustive()
    }
}

impl CipherStream {
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::encrypted_header;
    use crate::header::parse_encrypted_header;
    use crate::keyring::tests::{keyring_file, record};
    use crate::keyring::{find_key, parse_keyring};
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    pub(crate) const KEY_ID: &str = "MySQLReplicationKey_1_1";
    pub(crate) const MASTER_KEY: [u8; 32] = [0xa5; 32];
    pub(crate) const PASSWORD: [u8; 32] = [0x17; 32];
    pub(crate) const HEADER_IV: [u8; 16] = [0x3c; 16];

    /// Wrap the file password the way the server does, so tests can
    /// assemble a complete encrypted fixture.
    pub(crate) fn wrap_password() -> [u8; 32] {
        let mut buf = PASSWORD;
        Aes256CbcEnc::new(&MASTER_KEY.into(), &HEADER_IV.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, 32)
            .unwrap();
        buf
    }

    fn context() -> EncryptionContext {
        let header_buf = encrypted_header(KEY_ID, &wrap_password(), &HEADER_IV);
        let header = parse_encrypted_header(&header_buf).unwrap();
        let keyring = keyring_file(&[record(KEY_ID, "AES", "mysql_server", &MASTER_KEY)]);
        let keys = parse_keyring(&keyring).unwrap();
        let key = find_key(&keys, &header.key_id).unwrap();
        EncryptionContext::derive(&header, key).unwrap()
    }

    #[test]
    fn ctr_round_trips() {
        let ctx = context();
        let plain = b"The quick brown fox jumps over the lazy dog".to_vec();

        let mut encrypted = plain.clone();
        ctx.stream().decrypt(&mut encrypted);
        assert_ne!(encrypted, plain);

        let mut decrypted = encrypted.clone();
        ctx.stream().decrypt(&mut decrypted);
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn chunked_decrypt_matches_one_shot() {
        let ctx = context();
        let data: Vec<u8> = (0..100u8).collect();

        let mut one_shot = data.clone();
        ctx.stream().decrypt(&mut one_shot);

        let mut chunked = data;
        let mut stream = ctx.stream();
        for chunk in chunked.chunks_mut(32) {
            stream.decrypt(chunk);
        }
        assert_eq!(chunked, one_shot);
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let header_buf = encrypted_header(KEY_ID, &wrap_password(), &HEADER_IV);
        let header = parse_encrypted_header(&header_buf).unwrap();
        let short = KeyringKey {
            key_id: KEY_ID.to_string(),
            key_type: "AES".to_string(),
            user_id: String::new(),
            key: vec![1u8; 16],
        };
        assert!(matches!(
            EncryptionContext::derive(&header, &short),
            Err(KeyringError::InvalidKeyLength { len: 16, .. })
        ));
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = context();
        let b = context();
        let mut x = vec![0u8; 64];
        let mut y = vec![0u8; 64];
        a.stream().decrypt(&mut x);
        b.stream().decrypt(&mut y);
        assert_eq!(x, y);
    }
}
