//! Key derivation and message authentication (RFC 3414 §A.2, RFC 7860).
//!
//! A password is stretched into a [`MasterKey`] (Ku) once, then localized
//! to each authoritative engine as Kul = H(Ku || engineID || Ku). Only the
//! localized key is ever used on the wire.

use digest::Digest;
use digest::core_api::BlockSizeUser;
use hmac::{Mac, SimpleHmac};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::AuthProtocol;
use crate::error::{AuthErrorKind, Error, Result};

/// Shortest password accepted for key derivation (RFC 3414 §11.2).
pub const MIN_PASSWORD_LEN: usize = 8;

/// Bytes of repeated password hashed by the password-to-key algorithm.
const EXPANSION_LEN: usize = 1_048_576;

/// Password-derived key, not yet bound to any engine.
///
/// Deriving Ku costs a megabyte of hashing; localizing it is one digest.
/// Keep a `MasterKey` around when the same credentials talk to many engines.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl MasterKey {
    /// Run the password-to-key algorithm.
    pub fn from_password(protocol: AuthProtocol, password: &[u8]) -> Result<Self> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::auth(
                None,
                AuthErrorKind::PasswordTooShort {
                    length: password.len(),
                },
            ));
        }
        Ok(Self::derive(protocol, password))
    }

    /// Password-to-key without the length check, for key extension input.
    pub(crate) fn derive(protocol: AuthProtocol, password: &[u8]) -> Self {
        let key = match protocol {
            AuthProtocol::Md5 => expand::<md5::Md5>(password),
            AuthProtocol::Sha1 => expand::<sha1::Sha1>(password),
            AuthProtocol::Sha224 => expand::<sha2::Sha224>(password),
            AuthProtocol::Sha256 => expand::<sha2::Sha256>(password),
            AuthProtocol::Sha384 => expand::<sha2::Sha384>(password),
            AuthProtocol::Sha512 => expand::<sha2::Sha512>(password),
        };
        Self { key, protocol }
    }

    /// Bind this key to an engine.
    pub fn localize(&self, engine_id: &[u8]) -> LocalizedKey {
        LocalizedKey {
            key: hash(self.protocol, &[&self.key, engine_id, &self.key]),
            protocol: self.protocol,
        }
    }

    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Key bound to one authoritative engine (Kul).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl LocalizedKey {
    /// Derive and localize in one step.
    pub fn from_password(protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Result<Self> {
        Ok(MasterKey::from_password(protocol, password)?.localize(engine_id))
    }

    /// Use raw key material that was localized elsewhere.
    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn mac_len(&self) -> usize {
        self.protocol.mac_len()
    }

    /// Truncated HMAC over `data`.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = match self.protocol {
            AuthProtocol::Md5 => hmac::<md5::Md5>(&self.key, data)?,
            AuthProtocol::Sha1 => hmac::<sha1::Sha1>(&self.key, data)?,
            AuthProtocol::Sha224 => hmac::<sha2::Sha224>(&self.key, data)?,
            AuthProtocol::Sha256 => hmac::<sha2::Sha256>(&self.key, data)?,
            AuthProtocol::Sha384 => hmac::<sha2::Sha384>(&self.key, data)?,
            AuthProtocol::Sha512 => hmac::<sha2::Sha512>(&self.key, data)?,
        };
        mac.truncate(self.mac_len());
        Ok(mac)
    }

    /// Constant-time check of a received MAC against `data`.
    ///
    /// `data` must be the whole message with the auth parameters zeroed.
    pub fn verify(&self, data: &[u8], received: &[u8]) -> Result<()> {
        if received.len() != self.mac_len() {
            return Err(Error::auth(
                None,
                AuthErrorKind::WrongMacLength {
                    expected: self.mac_len(),
                    actual: received.len(),
                },
            ));
        }
        let expected = self.sign(data)?;
        if bool::from(expected.ct_eq(received)) {
            Ok(())
        } else {
            Err(Error::auth(None, AuthErrorKind::HmacMismatch))
        }
    }
}

impl std::fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalizedKey")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// One-shot digest over concatenated parts.
pub(crate) fn hash(protocol: AuthProtocol, parts: &[&[u8]]) -> Vec<u8> {
    fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
        let mut hasher = D::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().to_vec()
    }
    match protocol {
        AuthProtocol::Md5 => run::<md5::Md5>(parts),
        AuthProtocol::Sha1 => run::<sha1::Sha1>(parts),
        AuthProtocol::Sha224 => run::<sha2::Sha224>(parts),
        AuthProtocol::Sha256 => run::<sha2::Sha256>(parts),
        AuthProtocol::Sha384 => run::<sha2::Sha384>(parts),
        AuthProtocol::Sha512 => run::<sha2::Sha512>(parts),
    }
}

fn expand<D: Digest>(password: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    let mut chunk = [0u8; 64];
    let mut index = 0usize;
    for _ in 0..EXPANSION_LEN / chunk.len() {
        for byte in chunk.iter_mut() {
            *byte = password[index % password.len()];
            index += 1;
        }
        hasher.update(chunk);
    }
    chunk.zeroize();
    hasher.finalize().to_vec()
}

fn hmac<D: Digest + BlockSizeUser>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(key)
        .map_err(|_| Error::auth(None, AuthErrorKind::NoAuthKey))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
