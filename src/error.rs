//! Engine error types.
//!
//! [`Error`] is the single error returned across the public API. Layer
//! specific detail lives in small `*ErrorKind` enums carried inside it, so
//! callers can match on the broad category and dig into the kind when they
//! care.
//!
//! Failures on inbound datagrams are logged and the datagram dropped by the
//! dispatcher; they never stop the receive loop. Failures on outbound
//! operations are returned to the caller.

use std::net::SocketAddr;
use std::time::Duration;

use crate::access::DenyReason;
use crate::oid::Oid;
use crate::version::Version;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a USM message failed authentication, or which report the remote
/// engine sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthErrorKind {
    #[error("unknown user name")]
    UnknownUser,
    /// The user is not configured for the requested level.
    #[error("unsupported security level")]
    UnsupportedSecurityLevel,
    #[error("no authentication key available")]
    NoAuthKey,
    #[error("HMAC verification failed")]
    HmacMismatch,
    #[error("wrong MAC length: expected {expected}, got {actual}")]
    WrongMacLength { expected: usize, actual: usize },
    /// msgAuthenticationParameters could not be found in the raw bytes.
    #[error("could not locate auth params in message")]
    AuthParamsNotFound,
    /// RFC 3414 requires at least 8 octets.
    #[error("password must be at least 8 characters, got {length}")]
    PasswordTooShort { length: usize },
    #[error("agent reported {0}")]
    Report(ReportKind),
}

/// The usmStats counter named by a Report PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ReportKind {
    #[error("usmStatsUnsupportedSecLevels")]
    UnsupportedSecLevels,
    #[error("usmStatsNotInTimeWindows")]
    NotInTimeWindows,
    #[error("usmStatsUnknownUserNames")]
    UnknownUserNames,
    #[error("usmStatsUnknownEngineIDs")]
    UnknownEngineIds,
    #[error("usmStatsWrongDigests")]
    WrongDigests,
    #[error("usmStatsDecryptionErrors")]
    DecryptionErrors,
}

/// Privacy failures on either side of the cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoErrorKind {
    #[error("no privacy key available")]
    NoPrivKey,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("cipher operation failed")]
    CipherError,
    #[error("invalid privParameters length: expected {expected}, got {actual}")]
    InvalidPrivParamsLength { expected: usize, actual: usize },
    #[error("ciphertext length {length} not multiple of block size {block_size}")]
    InvalidCiphertextLength { length: usize, block_size: usize },
    #[error("decrypted data is not a scoped PDU")]
    MalformedPlaintext,
}

/// What was wrong with inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("expected tag 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedTag { expected: u8, actual: u8 },
    #[error("unexpected end of data")]
    TruncatedData,
    #[error("indefinite length encoding not supported")]
    IndefiniteLength,
    #[error("zero-length integer")]
    ZeroLengthInteger,
    #[error("invalid OID encoding")]
    InvalidOidEncoding,
    /// More than [`MAX_OID_LEN`](crate::oid::MAX_OID_LEN) arcs.
    #[error("OID too long: {count} arcs")]
    OidTooLong { count: usize },
    #[error("unknown SNMP version: {0}")]
    UnknownVersion(i32),
    #[error("unknown PDU type: 0x{0:02X}")]
    UnknownPduType(u8),
    /// A known PDU tag the message version may not carry.
    #[error("PDU type 0x{0:02X} not allowed here")]
    UnexpectedPduType(u8),
    #[error("constructed OCTET STRING (0x24) not supported")]
    ConstructedOctetString,
    #[error("invalid value tag: 0x{0:02X}")]
    InvalidValueTag(u8),
    /// Privacy flag without the authentication flag.
    #[error("invalid msgFlags: privacy without authentication")]
    InvalidMsgFlags,
    #[error("unknown security model: {0}")]
    UnknownSecurityModel(i32),
    #[error("msgMaxSize {value} below RFC 3412 minimum {minimum}")]
    MsgMaxSizeTooSmall { value: i32, minimum: i32 },
    #[error("negative value where non-negative required")]
    NegativeValue,
    #[error("NULL with non-zero length")]
    InvalidNull,
    #[error("IP address must be 4 bytes, got {length}")]
    InvalidIpAddressLength { length: usize },
    #[error("length encoding too long ({octets} octets)")]
    LengthTooLong { octets: usize },
    #[error("length {length} exceeds maximum {max}")]
    LengthExceedsMax { length: usize, max: usize },
    #[error("integer64 too long: {length} bytes")]
    Integer64TooLong { length: usize },
    #[error("unsigned value does not fit 32 bits ({length} bytes)")]
    Unsigned32Overflow { length: usize },
    #[error("need {needed} bytes but only {available} remaining")]
    InsufficientData { needed: usize, available: usize },
    #[error("{remaining} trailing bytes after message")]
    TrailingData { remaining: usize },
}

/// Why an outbound message could not be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeErrorKind {
    #[error("security parameters do not match {version}")]
    SecurityModelMismatch { version: Version },
    /// `Value::Raw` with a tag that belongs to a typed variant.
    #[error("raw value tag 0x{tag:02X} collides with a typed value")]
    ValueTypeMismatch { tag: u8 },
    #[error("OID cannot be BER encoded")]
    InvalidOid,
    #[error("engine not discovered")]
    EngineNotDiscovered,
    #[error("auth key not available for encoding")]
    MissingAuthKey,
    #[error("privacy key not available")]
    NoPrivKey,
    #[error("PDU not supported by {version}")]
    UnsupportedPdu { version: Version },
}

/// Rejected OID text or arc sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OidErrorKind {
    #[error("empty OID")]
    Empty,
    #[error("invalid arc value")]
    InvalidArc,
    #[error("first arc must be 0, 1, or 2, got {0}")]
    InvalidFirstArc(u32),
    #[error("second arc {second} too large for first arc {first}")]
    InvalidSecondArc { first: u32, second: u32 },
    #[error("OID must have at least 2 arcs")]
    TooShort,
    #[error("OID has {count} arcs, exceeds maximum {max}")]
    TooManyArcs { count: usize, max: usize },
}

macro_rules! error_statuses {
    ($($code:literal => $variant:ident, $name:literal;)*) => {
        /// PDU error-status codes (RFC 3416 section 3).
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[non_exhaustive]
        pub enum ErrorStatus {
            $($variant,)*
            /// Code outside the RFC 3416 range.
            Unknown(i32),
        }

        impl ErrorStatus {
            /// Map a wire code, keeping unrecognized values.
            pub fn from_i32(value: i32) -> Self {
                match value {
                    $($code => Self::$variant,)*
                    other => Self::Unknown(other),
                }
            }

            /// The wire code.
            pub fn as_i32(&self) -> i32 {
                match self {
                    $(Self::$variant => $code,)*
                    Self::Unknown(code) => *code,
                }
            }

            fn name(&self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some($name),)*
                    Self::Unknown(_) => None,
                }
            }
        }
    };
}

error_statuses! {
    0 => NoError, "noError";
    1 => TooBig, "tooBig";
    2 => NoSuchName, "noSuchName";
    3 => BadValue, "badValue";
    4 => ReadOnly, "readOnly";
    5 => GenErr, "genErr";
    6 => NoAccess, "noAccess";
    7 => WrongType, "wrongType";
    8 => WrongLength, "wrongLength";
    9 => WrongEncoding, "wrongEncoding";
    10 => WrongValue, "wrongValue";
    11 => NoCreation, "noCreation";
    12 => InconsistentValue, "inconsistentValue";
    13 => ResourceUnavailable, "resourceUnavailable";
    14 => CommitFailed, "commitFailed";
    15 => UndoFailed, "undoFailed";
    16 => AuthorizationError, "authorizationError";
    17 => NotWritable, "notWritable";
    18 => InconsistentName, "inconsistentName";
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "unknown({})", self.as_i32()),
        }
    }
}

fn peer(prefix: &str, target: &Option<SocketAddr>) -> String {
    target.map(|t| format!(" {prefix} {t}")).unwrap_or_default()
}

/// Engine error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error{}: {source}", peer("communicating with", target))]
    Io {
        target: Option<SocketAddr>,
        #[source]
        source: std::io::Error,
    },

    /// No response after the initial send and every retransmission.
    #[error(
        "timeout after {elapsed:?}{} (request_id={request_id}, retries={retries})",
        peer("waiting for", target)
    )]
    Timeout {
        target: Option<SocketAddr>,
        elapsed: Duration,
        request_id: i32,
        retries: u32,
    },

    /// Non-zero error-status in a response. `oid` is the varbind named by
    /// `index` when the index points inside the list.
    #[error("SNMP error{}: {status} at index {index}", peer("from", target))]
    Snmp {
        target: Option<SocketAddr>,
        status: ErrorStatus,
        index: u32,
        oid: Option<Oid>,
    },

    #[error("invalid OID: {kind}")]
    InvalidOid {
        kind: OidErrorKind,
        /// The rejected text, when parsing from a string.
        input: Option<Box<str>>,
    },

    #[error("decode error at offset {offset}: {kind}")]
    Decode {
        offset: usize,
        kind: DecodeErrorKind,
    },

    #[error("encode error: {kind}")]
    Encode { kind: EncodeErrorKind },

    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// msgAuthoritativeEngineID is not ours, or the remote engine is unknown.
    #[error("unknown engine ID")]
    UnknownEngineId { target: Option<SocketAddr> },

    #[error("message not in time window")]
    NotInTimeWindow { target: Option<SocketAddr> },

    #[error("authentication failed: {kind}")]
    AuthenticationFailed {
        target: Option<SocketAddr>,
        kind: AuthErrorKind,
    },

    #[error("decryption failed: {kind}")]
    DecryptionFailed {
        target: Option<SocketAddr>,
        kind: CryptoErrorKind,
    },

    #[error("encryption failed: {kind}")]
    EncryptionFailed {
        target: Option<SocketAddr>,
        kind: CryptoErrorKind,
    },

    /// Community string not present in the community table.
    #[error("no such community")]
    NoSuchCommunity { target: Option<SocketAddr> },

    /// Local access control refused the operation before anything was sent.
    #[error("access denied: {reason}")]
    AccessDenied { reason: DenyReason },

    #[error("request {request_id} cancelled")]
    Cancelled { request_id: i32 },

    /// The dispatcher has been shut down.
    #[error("dispatcher closed")]
    Closed,

    /// A walk saw an OID that does not sort after its predecessor.
    #[error("walk detected non-increasing OID: {previous} >= {current}")]
    NonIncreasingOid { previous: Oid, current: Oid },
}

impl Error {
    pub fn decode(offset: usize, kind: DecodeErrorKind) -> Self {
        Self::Decode { offset, kind }
    }

    pub fn encode(kind: EncodeErrorKind) -> Self {
        Self::Encode { kind }
    }

    pub fn auth(target: Option<SocketAddr>, kind: AuthErrorKind) -> Self {
        Self::AuthenticationFailed { target, kind }
    }

    pub fn decrypt(target: Option<SocketAddr>, kind: CryptoErrorKind) -> Self {
        Self::DecryptionFailed { target, kind }
    }

    pub fn encrypt(target: Option<SocketAddr>, kind: CryptoErrorKind) -> Self {
        Self::EncryptionFailed { target, kind }
    }

    pub fn invalid_oid(kind: OidErrorKind) -> Self {
        Self::InvalidOid { kind, input: None }
    }

    pub fn invalid_oid_with_input(kind: OidErrorKind, input: impl Into<Box<str>>) -> Self {
        Self::InvalidOid {
            kind,
            input: Some(input.into()),
        }
    }

    /// Remote address involved, for the variants that record one.
    pub fn target(&self) -> Option<SocketAddr> {
        match self {
            Self::Io { target, .. }
            | Self::Timeout { target, .. }
            | Self::Snmp { target, .. }
            | Self::UnknownEngineId { target }
            | Self::NotInTimeWindow { target }
            | Self::AuthenticationFailed { target, .. }
            | Self::DecryptionFailed { target, .. }
            | Self::EncryptionFailed { target, .. }
            | Self::NoSuchCommunity { target } => *target,
            _ => None,
        }
    }

    /// Fill in the remote address on variants that carry one.
    pub(crate) fn with_target(mut self, addr: SocketAddr) -> Self {
        match &mut self {
            Self::Io { target, .. }
            | Self::UnknownEngineId { target }
            | Self::NotInTimeWindow { target }
            | Self::AuthenticationFailed { target, .. }
            | Self::DecryptionFailed { target, .. }
            | Self::EncryptionFailed { target, .. }
            | Self::NoSuchCommunity { target } => *target = Some(addr),
            _ => {}
        }
        self
    }

    /// True for failures caused by the remote engine's security processing,
    /// as opposed to local misconfiguration.
    pub fn is_report(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed {
                kind: AuthErrorKind::Report(_),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        for code in 0..=18 {
            assert_eq!(ErrorStatus::from_i32(code).as_i32(), code);
        }
        assert_eq!(ErrorStatus::from_i32(99), ErrorStatus::Unknown(99));
        assert_eq!(ErrorStatus::AuthorizationError.to_string(), "authorizationError");
        assert_eq!(ErrorStatus::Unknown(42).to_string(), "unknown(42)");
    }

    #[test]
    fn with_target_fills_address() {
        let addr: SocketAddr = "192.0.2.1:161".parse().unwrap();
        let err = Error::NotInTimeWindow { target: None }.with_target(addr);
        assert_eq!(err.target(), Some(addr));

        let err = Error::Closed.with_target(addr);
        assert_eq!(err.target(), None);
    }

    #[test]
    fn display_includes_peer() {
        let addr: SocketAddr = "192.0.2.1:161".parse().unwrap();
        let err = Error::Snmp {
            target: Some(addr),
            status: ErrorStatus::NoSuchName,
            index: 2,
            oid: None,
        };
        assert_eq!(err.to_string(), "SNMP error from 192.0.2.1:161: noSuchName at index 2");
    }

    #[test]
    fn access_denied_display() {
        let err = Error::AccessDenied {
            reason: DenyReason::NotInView,
        };
        assert_eq!(err.to_string(), "access denied: not in view");
        assert!(
            Error::auth(None, AuthErrorKind::Report(ReportKind::WrongDigests)).is_report()
        );
        assert_eq!(
            AuthErrorKind::Report(ReportKind::UnknownEngineIds).to_string(),
            "agent reported usmStatsUnknownEngineIDs"
        );
    }
}
