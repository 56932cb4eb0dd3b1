//! SNMPv3 User-based Security Model primitives (RFC 3414, RFC 3826, RFC 7860).
//!
//! The pieces here are stateless building blocks used by [`crate::security::Usm`]:
//!
//! - [`auth`]: password-to-key derivation, key localization and HMAC
//! - [`privacy`]: DES, 3DES and AES-CFB payload encryption
//! - [`UsmSecurityParams`]: the msgSecurityParameters codec
//! - [`EngineRegistry`]: per-engine boots/time state and timeliness checks

pub mod auth;
mod engine;
mod privacy;
mod usm;

pub use auth::{LocalizedKey, MasterKey, MIN_PASSWORD_LEN};
pub use engine::{
    DEFAULT_TIME_WINDOW, EngineRegistry, EngineState, MAX_ENGINE_BOOTS, generate_engine_id, report_kind,
    report_kind_for_oid, report_oid,
};
pub(crate) use engine::HexId;
pub use privacy::{PrivKey, SaltCounter};
pub use usm::UsmSecurityParams;

use crate::oid::Oid;

/// How a privacy key is stretched when the auth digest is shorter than the cipher needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum KeyExtension {
    #[default]
    None,
    /// draft-blumenthal-aes-usm-04: append H(Kul) until long enough.
    Blumenthal,
    /// draft-reeder-snmpv3-usm-3desede-00: append localize(P2K(Kul)).
    Reeder,
}

/// Error returned when a protocol name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} protocol '{input}'")]
pub struct ParseProtocolError {
    input: String,
    kind: &'static str,
}

/// Authentication protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthProtocol {
    /// usmHMACMD5AuthProtocol
    Md5,
    /// usmHMACSHAAuthProtocol
    Sha1,
    /// usmHMAC128SHA224AuthProtocol
    Sha224,
    /// usmHMAC192SHA256AuthProtocol
    Sha256,
    /// usmHMAC256SHA384AuthProtocol
    Sha384,
    /// usmHMAC384SHA512AuthProtocol
    Sha512,
}

impl AuthProtocol {
    /// Digest output length, which is also the localized key length.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Length of the truncated MAC carried in msgAuthenticationParameters.
    pub fn mac_len(self) -> usize {
        match self {
            Self::Md5 | Self::Sha1 => 12,
            Self::Sha224 => 16,
            Self::Sha256 => 24,
            Self::Sha384 => 32,
            Self::Sha512 => 48,
        }
    }

    /// Registration OID under snmpAuthProtocols.
    pub fn oid(self) -> Oid {
        let last = match self {
            Self::Md5 => 2,
            Self::Sha1 => 3,
            Self::Sha224 => 4,
            Self::Sha256 => 5,
            Self::Sha384 => 6,
            Self::Sha512 => 7,
        };
        crate::oid!(1, 3, 6, 1, 6, 3, 10, 1, 1).child(last)
    }
}

impl std::fmt::Display for AuthProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        })
    }
}

impl std::str::FromStr for AuthProtocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA" | "SHA1" => Ok(Self::Sha1),
            "SHA224" => Ok(Self::Sha224),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(ParseProtocolError {
                input: s.to_string(),
                kind: "authentication",
            }),
        }
    }
}

/// Privacy protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivProtocol {
    /// usmDESPrivProtocol. 56-bit keys; interoperability only.
    Des,
    /// 3DES-EDE in outside CBC mode.
    Des3,
    /// usmAesCfb128Protocol
    Aes128,
    Aes192,
    Aes256,
}

impl PrivProtocol {
    /// Key material needed, including the DES pre-IV where applicable.
    pub fn key_len(self) -> usize {
        match self {
            Self::Des => 16,
            Self::Des3 => 32,
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// msgPrivacyParameters is always an 8-octet salt.
    pub fn salt_len(self) -> usize {
        8
    }

    pub fn oid(self) -> Oid {
        match self {
            Self::Des => crate::oid!(1, 3, 6, 1, 6, 3, 10, 1, 2, 2),
            Self::Des3 => crate::oid!(1, 3, 6, 1, 6, 3, 10, 1, 2, 3),
            Self::Aes128 => crate::oid!(1, 3, 6, 1, 6, 3, 10, 1, 2, 4),
            Self::Aes192 => crate::oid!(1, 3, 6, 1, 4, 1, 14832, 1, 3),
            Self::Aes256 => crate::oid!(1, 3, 6, 1, 4, 1, 14832, 1, 4),
        }
    }

    pub(crate) fn key_extension_for(self, auth: AuthProtocol) -> KeyExtension {
        if auth.digest_len() >= self.key_len() {
            return KeyExtension::None;
        }
        match self {
            Self::Des3 => KeyExtension::Reeder,
            Self::Aes192 | Self::Aes256 => KeyExtension::Blumenthal,
            Self::Des | Self::Aes128 => KeyExtension::None,
        }
    }
}

impl std::fmt::Display for PrivProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Des => "DES",
            Self::Des3 => "3DES",
            Self::Aes128 => "AES",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
        })
    }
}

impl std::str::FromStr for PrivProtocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "").as_str() {
            "DES" => Ok(Self::Des),
            "3DES" | "3DESEDE" | "DES3" | "TDES" => Ok(Self::Des3),
            "AES" | "AES128" => Ok(Self::Aes128),
            "AES192" => Ok(Self::Aes192),
            "AES256" => Ok(Self::Aes256),
            _ => Err(ParseProtocolError {
                input: s.to_string(),
                kind: "privacy",
            }),
        }
    }
}
