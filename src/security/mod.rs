//! Security subsystem.
//!
//! Two security models are supported, selected by message version:
//!
//! - [`CommunityModel`] for SNMPv1/v2c, which stamps and checks community
//!   strings (RFC 3584).
//! - [`Usm`], the SNMPv3 User-based Security Model (RFC 3414), which
//!   authenticates and encrypts messages with keys localized to the
//!   authoritative engine.
//!
//! Both produce a [`SecurityContext`] on inbound validation, which is what
//! access control and the application see.

mod community;
mod usm;

pub use community::{CommunityEntry, CommunityModel};
pub use usm::{Usm, UsmBuilder, UsmStats, UsmUser, ValidatedMessage, report_kind_of};

use bytes::Bytes;

use crate::error::{DecodeErrorKind, Error, Result};

/// Security model identifiers (RFC 3411 SnmpSecurityModel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SecurityModel {
    /// Wildcard, only meaningful in VACM tables.
    Any,
    V1,
    V2c,
    Usm,
}

impl SecurityModel {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Any),
            1 => Some(Self::V1),
            2 => Some(Self::V2c),
            3 => Some(Self::Usm),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Any => 0,
            Self::V1 => 1,
            Self::V2c => 2,
            Self::Usm => 3,
        }
    }
}

/// Security level, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SecurityLevel {
    #[default]
    NoAuthNoPriv,
    AuthNoPriv,
    AuthPriv,
}

impl SecurityLevel {
    /// Decode the auth/priv bits of msgFlags; privacy without authentication is invalid.
    pub fn from_flags(flags: u8) -> Result<Self> {
        match flags & 0x03 {
            0x00 => Ok(Self::NoAuthNoPriv),
            0x01 => Ok(Self::AuthNoPriv),
            0x03 => Ok(Self::AuthPriv),
            _ => Err(Error::decode(0, DecodeErrorKind::InvalidMsgFlags)),
        }
    }

    pub fn to_flags(self) -> u8 {
        match self {
            Self::NoAuthNoPriv => 0x00,
            Self::AuthNoPriv => 0x01,
            Self::AuthPriv => 0x03,
        }
    }

    pub fn requires_auth(self) -> bool {
        self >= Self::AuthNoPriv
    }

    pub fn requires_priv(self) -> bool {
        self == Self::AuthPriv
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAuthNoPriv => write!(f, "noAuthNoPriv"),
            Self::AuthNoPriv => write!(f, "authNoPriv"),
            Self::AuthPriv => write!(f, "authPriv"),
        }
    }
}

/// Who sent a message and under what protection.
///
/// Built once per exchange and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityContext {
    pub security_model: SecurityModel,
    /// Community-mapped security name, or the USM user name.
    pub security_name: Bytes,
    pub security_level: SecurityLevel,
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
}

impl SecurityContext {
    /// Context for a community-based exchange (always noAuthNoPriv).
    pub fn community(model: SecurityModel, security_name: impl Into<Bytes>) -> Self {
        Self {
            security_model: model,
            security_name: security_name.into(),
            security_level: SecurityLevel::NoAuthNoPriv,
            context_engine_id: Bytes::new(),
            context_name: Bytes::new(),
        }
    }

    /// Context for a USM exchange in the default (empty) context.
    pub fn usm(user: impl Into<Bytes>, level: SecurityLevel) -> Self {
        Self {
            security_model: SecurityModel::Usm,
            security_name: user.into(),
            security_level: level,
            context_engine_id: Bytes::new(),
            context_name: Bytes::new(),
        }
    }

    pub fn with_context_name(mut self, name: impl Into<Bytes>) -> Self {
        self.context_name = name.into();
        self
    }

    pub fn with_context_engine_id(mut self, engine_id: impl Into<Bytes>) -> Self {
        self.context_engine_id = engine_id.into();
        self
    }
}
