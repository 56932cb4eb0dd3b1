//! SNMP message versions.

use crate::security::SecurityModel;

/// SNMP protocol version carried in the message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Version {
    /// SNMPv1 (RFC 1157)
    V1,
    /// SNMPv2c (RFC 1901)
    #[default]
    V2c,
    /// SNMPv3 (RFC 3411-3418)
    V3,
}

impl Version {
    /// Wire value of the msgVersion field.
    pub const fn as_i32(self) -> i32 {
        match self {
            Version::V1 => 0,
            Version::V2c => 1,
            Version::V3 => 3,
        }
    }

    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Version::V1),
            1 => Some(Version::V2c),
            3 => Some(Version::V3),
            _ => None,
        }
    }

    /// Security model implied by the version (RFC 3584 for v1/v2c).
    pub const fn security_model(self) -> SecurityModel {
        match self {
            Version::V1 => SecurityModel::V1,
            Version::V2c => SecurityModel::V2c,
            Version::V3 => SecurityModel::Usm,
        }
    }

    /// True for the community-based versions.
    pub const fn is_community(self) -> bool {
        matches!(self, Version::V1 | Version::V2c)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::V1 => write!(f, "SNMPv1"),
            Version::V2c => write!(f, "SNMPv2c"),
            Version::V3 => write!(f, "SNMPv3"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values() {
        for v in [Version::V1, Version::V2c, Version::V3] {
            assert_eq!(Version::from_i32(v.as_i32()), Some(v));
        }
        assert_eq!(Version::from_i32(2), None);
    }

    #[test]
    fn security_models() {
        assert_eq!(Version::V1.security_model(), SecurityModel::V1);
        assert_eq!(Version::V3.security_model(), SecurityModel::Usm);
        assert!(Version::V2c.is_community());
        assert!(!Version::V3.is_community());
    }
}
