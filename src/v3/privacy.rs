//! ScopedPDU encryption (RFC 3414 §8, RFC 3826, 3DES and AES-192/256 drafts).
//!
//! DES and 3DES run in CBC mode with IV = preIV XOR salt, where the salt is
//! engineBoots followed by a local counter. AES runs in CFB-128 mode with
//! IV = engineBoots || engineTime || salt. In every case the 8-octet salt
//! travels as msgPrivacyParameters.

use std::sync::atomic::{AtomicU64, Ordering};

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{AsyncStreamCipher, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::auth::{MasterKey, hash};
use super::{AuthProtocol, KeyExtension, PrivProtocol};
use crate::error::{CryptoErrorKind, Error, Result};

/// Monotonic salt source shared by every encryption a USM instance performs.
///
/// Seeded from the OS RNG and never yields zero.
#[derive(Debug)]
pub struct SaltCounter(AtomicU64);

impl SaltCounter {
    pub fn new() -> Self {
        let mut seed = [0u8; 8];
        // A failed RNG read falls back to the clock; salts only need to be unique.
        if getrandom::fill(&mut seed).is_err() {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(1);
            seed = nanos.to_be_bytes();
        }
        Self::from_value(u64::from_ne_bytes(seed))
    }

    pub fn from_value(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn next(&self) -> u64 {
        let value = self.0.fetch_add(1, Ordering::Relaxed);
        if value == 0 {
            self.0.fetch_add(1, Ordering::Relaxed)
        } else {
            value
        }
    }
}

impl Default for SaltCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Localized privacy key, already extended to the cipher's key length.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: PrivProtocol,
}

impl PrivKey {
    /// Derive from the privacy password using the user's auth hash.
    pub fn from_password(
        auth: AuthProtocol,
        protocol: PrivProtocol,
        password: &[u8],
        engine_id: &[u8],
    ) -> Result<Self> {
        let master = MasterKey::from_password(auth, password)?;
        Ok(Self::from_master_key(&master, protocol, engine_id))
    }

    /// Localize a cached master key and extend it if the digest is too short.
    pub fn from_master_key(master: &MasterKey, protocol: PrivProtocol, engine_id: &[u8]) -> Self {
        let auth = master.protocol();
        let need = protocol.key_len();
        let mut key = master.localize(engine_id).as_bytes().to_vec();

        match protocol.key_extension_for(auth) {
            KeyExtension::None => {}
            KeyExtension::Blumenthal => {
                while key.len() < need {
                    let mut more = hash(auth, &[&key]);
                    key.extend_from_slice(&more);
                    more.zeroize();
                }
            }
            KeyExtension::Reeder => {
                while key.len() < need {
                    let more = MasterKey::derive(auth, &key).localize(engine_id);
                    key.extend_from_slice(more.as_bytes());
                }
            }
        }
        key.truncate(need);
        Self { key, protocol }
    }

    /// Wrap raw localized key material.
    pub fn from_bytes(protocol: PrivProtocol, key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.len() < protocol.key_len() {
            return Err(Error::encrypt(None, CryptoErrorKind::InvalidKeyLength));
        }
        Ok(Self { key, protocol })
    }

    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Encrypt a serialized ScopedPDU, returning ciphertext and msgPrivacyParameters.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: u64,
    ) -> Result<(Vec<u8>, [u8; 8])> {
        match self.protocol {
            PrivProtocol::Des => {
                let salt = cbc_salt(engine_boots, salt);
                let iv = xor_iv(&self.key[8..16], &salt);
                Ok((cbc_encrypt::<des::Des>(&self.key[..8], &iv, plaintext)?, salt))
            }
            PrivProtocol::Des3 => {
                let salt = cbc_salt(engine_boots, salt);
                let iv = xor_iv(&self.key[24..32], &salt);
                Ok((cbc_encrypt::<des::TdesEde3>(&self.key[..24], &iv, plaintext)?, salt))
            }
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let salt = salt.to_be_bytes();
                let iv = cfb_iv(engine_boots, engine_time, &salt);
                let key = &self.key[..self.protocol.key_len()];
                let ciphertext = match self.protocol {
                    PrivProtocol::Aes128 => cfb_encrypt::<aes::Aes128>(key, &iv, plaintext)?,
                    PrivProtocol::Aes192 => cfb_encrypt::<aes::Aes192>(key, &iv, plaintext)?,
                    _ => cfb_encrypt::<aes::Aes256>(key, &iv, plaintext)?,
                };
                Ok((ciphertext, salt))
            }
        }
    }

    /// Decrypt an encryptedPDU. CBC output keeps its zero padding; the
    /// ScopedPDU decoder ignores bytes after the outer SEQUENCE.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Vec<u8>> {
        let salt: [u8; 8] = priv_params.try_into().map_err(|_| {
            Error::decrypt(
                None,
                CryptoErrorKind::InvalidPrivParamsLength {
                    expected: 8,
                    actual: priv_params.len(),
                },
            )
        })?;

        match self.protocol {
            PrivProtocol::Des => {
                let iv = xor_iv(&self.key[8..16], &salt);
                cbc_decrypt::<des::Des>(&self.key[..8], &iv, ciphertext)
            }
            PrivProtocol::Des3 => {
                let iv = xor_iv(&self.key[24..32], &salt);
                cbc_decrypt::<des::TdesEde3>(&self.key[..24], &iv, ciphertext)
            }
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let iv = cfb_iv(engine_boots, engine_time, &salt);
                let key = &self.key[..self.protocol.key_len()];
                match self.protocol {
                    PrivProtocol::Aes128 => cfb_decrypt::<aes::Aes128>(key, &iv, ciphertext),
                    PrivProtocol::Aes192 => cfb_decrypt::<aes::Aes192>(key, &iv, ciphertext),
                    _ => cfb_decrypt::<aes::Aes256>(key, &iv, ciphertext),
                }
            }
        }
    }
}

impl std::fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivKey")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

fn cbc_salt(engine_boots: u32, counter: u64) -> [u8; 8] {
    let mut salt = [0u8; 8];
    salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
    salt[4..].copy_from_slice(&(counter as u32).to_be_bytes());
    salt
}

fn xor_iv(pre_iv: &[u8], salt: &[u8; 8]) -> [u8; 8] {
    let mut iv = [0u8; 8];
    for (i, out) in iv.iter_mut().enumerate() {
        *out = pre_iv[i] ^ salt[i];
    }
    iv
}

fn cfb_iv(engine_boots: u32, engine_time: u32, salt: &[u8; 8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
    iv[8..].copy_from_slice(salt);
    iv
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher,
    cbc::Encryptor<C>: KeyIvInit + BlockEncryptMut,
{
    let padded_len = plaintext.len().div_ceil(8) * 8;
    let mut buffer = vec![0u8; padded_len];
    buffer[..plaintext.len()].copy_from_slice(plaintext);

    let cipher = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::encrypt(None, CryptoErrorKind::InvalidKeyLength))?;
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut buffer, padded_len)
        .map_err(|_| Error::encrypt(None, CryptoErrorKind::CipherError))?;
    Ok(buffer)
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    C: BlockDecryptMut + BlockCipher,
    cbc::Decryptor<C>: KeyIvInit + BlockDecryptMut,
{
    if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(8) {
        return Err(Error::decrypt(
            None,
            CryptoErrorKind::InvalidCiphertextLength {
                length: ciphertext.len(),
                block_size: 8,
            },
        ));
    }
    let cipher = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::decrypt(None, CryptoErrorKind::InvalidKeyLength))?;
    let mut buffer = ciphertext.to_vec();
    let len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| Error::decrypt(None, CryptoErrorKind::CipherError))?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

fn cfb_encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher,
    cfb_mode::Encryptor<C>: KeyIvInit + AsyncStreamCipher,
{
    let cipher = cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::encrypt(None, CryptoErrorKind::InvalidKeyLength))?;
    let mut buffer = plaintext.to_vec();
    cipher.encrypt(&mut buffer);
    Ok(buffer)
}

fn cfb_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher,
    cfb_mode::Decryptor<C>: KeyIvInit + AsyncStreamCipher,
{
    let cipher = cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::decrypt(None, CryptoErrorKind::InvalidKeyLength))?;
    let mut buffer = ciphertext.to_vec();
    cipher.decrypt(&mut buffer);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE: &[u8] = b"\x80\x00\x1f\x88\x80engine";

    fn key(auth: AuthProtocol, protocol: PrivProtocol) -> PrivKey {
        PrivKey::from_password(auth, protocol, b"privpassword", ENGINE).unwrap()
    }

    #[test]
    fn round_trip_every_cipher() {
        let plaintext = b"\x30\x0b\x04\x00\x04\x00\xa0\x05\x02\x01\x01\x02\x01";
        for protocol in [
            PrivProtocol::Des,
            PrivProtocol::Des3,
            PrivProtocol::Aes128,
            PrivProtocol::Aes192,
            PrivProtocol::Aes256,
        ] {
            let k = key(AuthProtocol::Sha1, protocol);
            assert_eq!(k.as_bytes().len(), protocol.key_len());
            let (ciphertext, salt) = k.encrypt(plaintext, 3, 1000, 77).unwrap();
            assert_ne!(&ciphertext[..plaintext.len()], &plaintext[..]);
            let decrypted = k.decrypt(&ciphertext, 3, 1000, &salt).unwrap();
            assert_eq!(&decrypted[..plaintext.len()], &plaintext[..], "{protocol}");
        }
    }

    #[test]
    fn des_salt_layout() {
        let k = key(AuthProtocol::Md5, PrivProtocol::Des);
        let (ciphertext, salt) = k.encrypt(b"abc", 0x0102_0304, 0, 0x1_0000_0005).unwrap();
        assert_eq!(salt, [1, 2, 3, 4, 0, 0, 0, 5]);
        assert_eq!(ciphertext.len(), 8);
    }

    #[test]
    fn aes_time_is_part_of_iv() {
        let k = key(AuthProtocol::Sha256, PrivProtocol::Aes128);
        let (ciphertext, salt) = k.encrypt(b"hello world", 1, 10, 9).unwrap();
        assert_eq!(ciphertext.len(), 11);
        assert_ne!(k.decrypt(&ciphertext, 1, 11, &salt).unwrap(), b"hello world");
    }

    #[test]
    fn bad_inputs_rejected() {
        let k = key(AuthProtocol::Md5, PrivProtocol::Des);
        assert!(matches!(
            k.decrypt(&[0u8; 12], 0, 0, &[0u8; 8]),
            Err(Error::DecryptionFailed {
                kind: CryptoErrorKind::InvalidCiphertextLength { length: 12, .. },
                ..
            })
        ));
        assert!(matches!(
            k.decrypt(&[0u8; 16], 0, 0, &[0u8; 4]),
            Err(Error::DecryptionFailed {
                kind: CryptoErrorKind::InvalidPrivParamsLength { actual: 4, .. },
                ..
            })
        ));
        assert!(PrivKey::from_bytes(PrivProtocol::Aes256, vec![0; 16]).is_err());
    }

    #[test]
    fn extension_prefix_is_localized_key() {
        let master = MasterKey::from_password(AuthProtocol::Sha1, b"privpassword").unwrap();
        let localized = master.localize(ENGINE);
        for protocol in [PrivProtocol::Aes256, PrivProtocol::Des3] {
            let k = PrivKey::from_master_key(&master, protocol, ENGINE);
            assert_eq!(k.as_bytes().len(), 32);
            assert_eq!(&k.as_bytes()[..20], localized.as_bytes());
        }
        let blumenthal = PrivKey::from_master_key(&master, PrivProtocol::Aes256, ENGINE);
        let reeder = PrivKey::from_master_key(&master, PrivProtocol::Des3, ENGINE);
        assert_ne!(&blumenthal.as_bytes()[20..], &reeder.as_bytes()[20..]);
    }

    #[test]
    fn salt_counter_skips_zero() {
        let counter = SaltCounter::from_value(u64::MAX);
        assert_eq!(counter.next(), u64::MAX);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }
}
