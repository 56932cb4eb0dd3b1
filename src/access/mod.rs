//! Access control (RFC 3415 `isAccessAllowed`).
//!
//! [`AccessControl`] is a closed set of models selected by configuration:
//!
//! - [`VoidAccess`] allows everything and stands in when access control is off.
//! - [`Vacm`] resolves security name to group, group to view, then tests the
//!   OID against the view's subtree families.
//!
//! Every check produces a fresh [`AccessDecision`].

mod vacm;
mod void;

pub use vacm::{AccessEntryBuilder, Vacm, VacmAccessEntry, VacmBuilder, View, ViewSubtree};
pub use void::VoidAccess;

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::pdu::PduType;
use crate::security::{SecurityContext, SecurityLevel, SecurityModel};

/// Which view of an access entry applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewType {
    Read,
    Write,
    Notify,
}

impl ViewType {
    /// View consulted for a PDU kind; `None` for response-class PDUs.
    pub fn for_pdu(pdu_type: PduType) -> Option<Self> {
        match pdu_type {
            PduType::GetRequest | PduType::GetNextRequest | PduType::GetBulkRequest => Some(Self::Read),
            PduType::SetRequest => Some(Self::Write),
            PduType::TrapV1 | PduType::TrapV2 | PduType::InformRequest => Some(Self::Notify),
            PduType::Response | PduType::Report => None,
        }
    }
}

impl std::fmt::Display for ViewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    NoSuchView,
    NoAccessEntry,
    NotInView,
    OtherError,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSuchView => write!(f, "no such view"),
            Self::NoAccessEntry => write!(f, "no access entry"),
            Self::NotInView => write!(f, "not in view"),
            Self::OtherError => write!(f, "other error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }

    /// `Err(AccessDenied)` for a deny.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(Error::AccessDenied { reason }),
        }
    }
}

/// The configured access-control model.
#[derive(Debug, Clone)]
pub enum AccessControl {
    Void(VoidAccess),
    Vacm(Vacm),
}

impl Default for AccessControl {
    fn default() -> Self {
        Self::Void(VoidAccess)
    }
}

impl AccessControl {
    /// SnmpAccessModel identifier: 0 for void, 3 for VACM.
    pub fn model_id(&self) -> i32 {
        match self {
            Self::Void(_) => 0,
            Self::Vacm(_) => 3,
        }
    }

    pub fn check(
        &self,
        security_model: SecurityModel,
        security_name: &[u8],
        security_level: SecurityLevel,
        view_type: ViewType,
        context_name: &[u8],
        oid: &Oid,
    ) -> AccessDecision {
        match self {
            Self::Void(void) => void.check(),
            Self::Vacm(vacm) => vacm.check(
                security_model,
                security_name,
                security_level,
                view_type,
                context_name,
                oid,
            ),
        }
    }

    /// Check with the fields of an established security context.
    pub fn check_context(&self, ctx: &SecurityContext, view_type: ViewType, oid: &Oid) -> AccessDecision {
        self.check(
            ctx.security_model,
            &ctx.security_name,
            ctx.security_level,
            view_type,
            &ctx.context_name,
            oid,
        )
    }

    /// First denied OID in `oids`, as a 0-based position and reason.
    pub fn first_denied<'a>(
        &self,
        ctx: &SecurityContext,
        view_type: ViewType,
        oids: impl IntoIterator<Item = &'a Oid>,
    ) -> Option<(usize, DenyReason)> {
        oids.into_iter()
            .enumerate()
            .find_map(|(index, oid)| match self.check_context(ctx, view_type, oid) {
                AccessDecision::Allow => None,
                AccessDecision::Deny(reason) => Some((index, reason)),
            })
    }
}

impl From<Vacm> for AccessControl {
    fn from(vacm: Vacm) -> Self {
        Self::Vacm(vacm)
    }
}

impl From<VoidAccess> for AccessControl {
    fn from(void: VoidAccess) -> Self {
        Self::Void(void)
    }
}
