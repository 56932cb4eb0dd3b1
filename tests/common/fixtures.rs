//! Common test fixtures and constants.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use snmp_engine::v3::{AuthProtocol, PrivProtocol};
use snmp_engine::{Oid, UsmUser, Value, oid};

// =============================================================================
// Standard system MIB OIDs (1.3.6.1.2.1.1.*)
// =============================================================================

pub fn sys_descr() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)
}
pub fn sys_object_id() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 2, 0)
}
pub fn sys_uptime() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)
}
pub fn sys_contact() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 4, 0)
}
pub fn sys_name() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)
}
pub fn sys_location() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 6, 0)
}

/// ifNumber.0
pub fn if_number() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2, 1, 0)
}

// =============================================================================
// Subtree roots (for walks and views)
// =============================================================================

/// mib-2: 1.3.6.1.2.1
pub fn mib2() -> Oid {
    oid!(1, 3, 6, 1, 2, 1)
}

/// System subtree root: 1.3.6.1.2.1.1
pub fn system_subtree() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1)
}

/// Interfaces subtree root: 1.3.6.1.2.1.2
pub fn interfaces_subtree() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2)
}

/// Nonexistent OID for testing NoSuchObject
pub fn nonexistent_oid() -> Oid {
    oid!(1, 3, 6, 1, 99, 99, 99, 0)
}

// =============================================================================
// Addresses and credentials
// =============================================================================

pub fn manager_addr() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// Address of the n-th mock agent.
pub fn agent_addr(n: u8) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1 + n], 161))
}

/// snmpEngineID of the mock agent.
pub const AGENT_ENGINE_ID: &[u8] = b"\x80\x00\x1f\x88\x04mock-agent";

pub const AUTH_PASSWORD: &str = "authpass123";
pub const PRIV_PASSWORD: &str = "privpass123";

/// V2c read-only community
pub const COMMUNITY_RO: &[u8] = b"public";
/// V2c read-write community
pub const COMMUNITY_RW: &[u8] = b"private";

pub mod users {
    pub const NOAUTH_USER: &str = "noauth_user";
    pub const AUTHSHA256_USER: &str = "authsha256_user";
    pub const PRIVAES128_USER: &str = "privaes128_user";
}

/// SHA-256 auth without privacy.
pub fn auth_user() -> UsmUser {
    UsmUser::new(users::AUTHSHA256_USER)
        .with_auth(AuthProtocol::Sha256, AUTH_PASSWORD)
        .unwrap()
}

/// SHA-1 auth with AES-128 privacy.
pub fn priv_user() -> UsmUser {
    UsmUser::new(users::PRIVAES128_USER)
        .with_auth(AuthProtocol::Sha1, AUTH_PASSWORD)
        .unwrap()
        .with_priv(PrivProtocol::Aes128, PRIV_PASSWORD)
        .unwrap()
}

/// A small system group plus ifNumber.
pub fn system_mib() -> BTreeMap<Oid, Value> {
    BTreeMap::from([
        (sys_descr(), Value::OctetString("mock agent".into())),
        (sys_object_id(), Value::ObjectIdentifier(oid!(1, 3, 6, 1, 4, 1, 99999))),
        (sys_uptime(), Value::TimeTicks(4242)),
        (sys_contact(), Value::OctetString("noc@example.net".into())),
        (sys_name(), Value::OctetString("agent-1".into())),
        (sys_location(), Value::OctetString("rack 7".into())),
        (if_number(), Value::Integer(2)),
    ])
}
