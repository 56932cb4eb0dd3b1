//! View-based Access Control Model (RFC 3415).
//!
//! Three tables drive every decision:
//!
//! 1. **Security-to-group**: (securityModel, securityName) to groupName,
//!    falling back to [`SecurityModel::Any`].
//! 2. **Access**: (groupName, context, securityModel, securityLevel) to a
//!    read, write and notify view name.
//! 3. **View tree families**: named sets of (subtree, mask, include/exclude).
//!
//! ```rust
//! use snmp_engine::access::{AccessDecision, DenyReason, VacmBuilder, ViewType};
//! use snmp_engine::security::{SecurityLevel, SecurityModel};
//! use snmp_engine::oid;
//!
//! let vacm = VacmBuilder::new()
//!     .group("public", SecurityModel::V2c, "readers")
//!     .access("readers", |a| a.read_view("mib2"))
//!     .view("mib2", |v| v
//!         .include(oid!(1, 3, 6, 1, 2, 1))
//!         .exclude(oid!(1, 3, 6, 1, 2, 1, 1)))
//!     .build();
//!
//! let check = |oid| vacm.check(SecurityModel::V2c, b"public", SecurityLevel::NoAuthNoPriv, ViewType::Read, b"", &oid);
//! assert_eq!(check(oid!(1, 3, 6, 1, 2, 1, 2, 1)), AccessDecision::Allow);
//! assert_eq!(check(oid!(1, 3, 6, 1, 2, 1, 1, 5)), AccessDecision::Deny(DenyReason::NotInView));
//! ```

use std::collections::HashMap;

use bytes::Bytes;

use super::{AccessDecision, DenyReason, ViewType};
use crate::oid::Oid;
use crate::security::{SecurityLevel, SecurityModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ContextMatch {
    #[default]
    Exact,
    Prefix,
}

/// A named collection of subtree families.
#[derive(Debug, Clone, Default)]
pub struct View {
    subtrees: Vec<ViewSubtree>,
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(self, oid: Oid) -> Self {
        self.family(oid, Vec::new(), true)
    }

    /// Include a subtree with a wildcard mask; see [`ViewSubtree::mask`].
    pub fn include_masked(self, oid: Oid, mask: Vec<u8>) -> Self {
        self.family(oid, mask, true)
    }

    pub fn exclude(self, oid: Oid) -> Self {
        self.family(oid, Vec::new(), false)
    }

    pub fn exclude_masked(self, oid: Oid, mask: Vec<u8>) -> Self {
        self.family(oid, mask, false)
    }

    fn family(mut self, oid: Oid, mask: Vec<u8>, included: bool) -> Self {
        self.subtrees.push(ViewSubtree { oid, mask, included });
        self
    }

    /// Whether `oid` is in the view.
    ///
    /// Among the families matching `oid`, the one with the longest subtree
    /// decides; equal lengths go to the lexicographically larger subtree
    /// (RFC 3415 §5, vacmViewTreeFamilyTable).
    pub fn contains(&self, oid: &Oid) -> bool {
        self.subtrees
            .iter()
            .filter(|family| family.matches(oid))
            .max_by(|a, b| a.oid.len().cmp(&b.oid.len()).then_with(|| a.oid.cmp(&b.oid)))
            .is_some_and(|family| family.included)
    }
}

/// One view tree family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSubtree {
    pub oid: Oid,
    /// Wildcard mask, one bit per arc starting at bit 7 of byte 0.
    ///
    /// A 1 bit requires the arc to match exactly, a 0 bit accepts any value.
    /// Bits beyond the end of the mask count as 1.
    pub mask: Vec<u8>,
    pub included: bool,
}

impl ViewSubtree {
    pub fn matches(&self, oid: &Oid) -> bool {
        let arcs = oid.arcs();
        let subtree = self.oid.arcs();
        if arcs.len() < subtree.len() {
            return false;
        }
        subtree.iter().zip(arcs).enumerate().all(|(i, (want, got))| {
            let exact = self
                .mask
                .get(i / 8)
                .is_none_or(|byte| (byte >> (7 - (i % 8))) & 1 == 1);
            !exact || want == got
        })
    }
}

/// Access table row.
#[derive(Debug, Clone)]
pub struct VacmAccessEntry {
    pub group_name: Bytes,
    pub context_prefix: Bytes,
    pub security_model: SecurityModel,
    /// Minimum level the request must carry.
    pub security_level: SecurityLevel,
    context_match: ContextMatch,
    pub read_view: Bytes,
    pub write_view: Bytes,
    pub notify_view: Bytes,
}

impl VacmAccessEntry {
    fn view(&self, view_type: ViewType) -> &Bytes {
        match view_type {
            ViewType::Read => &self.read_view,
            ViewType::Write => &self.write_view,
            ViewType::Notify => &self.notify_view,
        }
    }

    fn context_matches(&self, context: &[u8]) -> bool {
        match self.context_match {
            ContextMatch::Exact => self.context_prefix == context,
            ContextMatch::Prefix => context.starts_with(&self.context_prefix),
        }
    }
}

/// Builder for one access row, used through [`VacmBuilder::access`].
pub struct AccessEntryBuilder {
    entry: VacmAccessEntry,
}

impl AccessEntryBuilder {
    pub fn new(group_name: impl Into<Bytes>) -> Self {
        Self {
            entry: VacmAccessEntry {
                group_name: group_name.into(),
                context_prefix: Bytes::new(),
                security_model: SecurityModel::Any,
                security_level: SecurityLevel::NoAuthNoPriv,
                context_match: ContextMatch::Exact,
                read_view: Bytes::new(),
                write_view: Bytes::new(),
                notify_view: Bytes::new(),
            },
        }
    }

    pub fn context_prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.entry.context_prefix = prefix.into();
        self
    }

    /// Match the context name by prefix instead of exactly.
    pub fn context_match_prefix(mut self) -> Self {
        self.entry.context_match = ContextMatch::Prefix;
        self
    }

    pub fn security_model(mut self, model: SecurityModel) -> Self {
        self.entry.security_model = model;
        self
    }

    pub fn security_level(mut self, level: SecurityLevel) -> Self {
        self.entry.security_level = level;
        self
    }

    pub fn read_view(mut self, view: impl Into<Bytes>) -> Self {
        self.entry.read_view = view.into();
        self
    }

    pub fn write_view(mut self, view: impl Into<Bytes>) -> Self {
        self.entry.write_view = view.into();
        self
    }

    pub fn notify_view(mut self, view: impl Into<Bytes>) -> Self {
        self.entry.notify_view = view.into();
        self
    }

    pub fn build(self) -> VacmAccessEntry {
        self.entry
    }
}

/// VACM tables.
#[derive(Debug, Clone, Default)]
pub struct Vacm {
    groups: HashMap<(SecurityModel, Bytes), Bytes>,
    access: Vec<VacmAccessEntry>,
    views: HashMap<Bytes, View>,
}

impl Vacm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> VacmBuilder {
        VacmBuilder::new()
    }

    pub fn add_group(
        &mut self,
        security_name: impl Into<Bytes>,
        security_model: SecurityModel,
        group_name: impl Into<Bytes>,
    ) {
        self.groups
            .insert((security_model, security_name.into()), group_name.into());
    }

    pub fn add_access(&mut self, entry: VacmAccessEntry) {
        self.access.push(entry);
    }

    pub fn add_view(&mut self, name: impl Into<Bytes>, view: View) {
        self.views.insert(name.into(), view);
    }

    /// Group for a principal, falling back to the `Any` model.
    pub fn group(&self, model: SecurityModel, name: &[u8]) -> Option<&Bytes> {
        let name = Bytes::copy_from_slice(name);
        self.groups
            .get(&(model, name.clone()))
            .or_else(|| self.groups.get(&(SecurityModel::Any, name)))
    }

    /// Best access row (RFC 3415 §4 vacmAccessTable).
    ///
    /// Preference: specific model over `Any`, exact context over prefix,
    /// longer prefix, then higher minimum level.
    pub fn access_entry(
        &self,
        group: &[u8],
        context: &[u8],
        model: SecurityModel,
        level: SecurityLevel,
    ) -> Option<&VacmAccessEntry> {
        self.access
            .iter()
            .filter(|e| {
                e.group_name == group
                    && e.context_matches(context)
                    && (e.security_model == model || e.security_model == SecurityModel::Any)
                    && level >= e.security_level
            })
            .max_by_key(|e| {
                (
                    e.security_model == model,
                    e.context_match == ContextMatch::Exact,
                    e.context_prefix.len(),
                    e.security_level,
                )
            })
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
        let decision = self.decide(security_model, security_name, security_level, view_type, context_name, oid);
        if let AccessDecision::Deny(reason) = decision {
            tracing::debug!(
                target: "snmp_engine::vacm",
                {
                    security_name = %String::from_utf8_lossy(security_name),
                    ?security_model,
                    %security_level,
                    %view_type,
                    %oid,
                    %reason,
                },
                "access denied"
            );
        }
        decision
    }

    fn decide(
        &self,
        security_model: SecurityModel,
        security_name: &[u8],
        security_level: SecurityLevel,
        view_type: ViewType,
        context_name: &[u8],
        oid: &Oid,
    ) -> AccessDecision {
        let Some(group) = self.group(security_model, security_name) else {
            return AccessDecision::Deny(DenyReason::NoAccessEntry);
        };
        let Some(entry) = self.access_entry(group, context_name, security_model, security_level) else {
            return AccessDecision::Deny(DenyReason::NoAccessEntry);
        };
        let view_name = entry.view(view_type);
        let Some(view) = self.views.get(view_name).filter(|_| !view_name.is_empty()) else {
            return AccessDecision::Deny(DenyReason::NoSuchView);
        };
        if view.contains(oid) {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny(DenyReason::NotInView)
        }
    }
}

/// Closure-style builder for [`Vacm`].
#[derive(Debug, Default)]
pub struct VacmBuilder {
    vacm: Vacm,
}

impl VacmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a community-derived security name or USM user to a group.
    pub fn group(
        mut self,
        security_name: impl Into<Bytes>,
        security_model: SecurityModel,
        group_name: impl Into<Bytes>,
    ) -> Self {
        self.vacm.add_group(security_name, security_model, group_name);
        self
    }

    pub fn access<F>(mut self, group_name: impl Into<Bytes>, configure: F) -> Self
    where
        F: FnOnce(AccessEntryBuilder) -> AccessEntryBuilder,
    {
        self.vacm
            .add_access(configure(AccessEntryBuilder::new(group_name)).build());
        self
    }

    pub fn view<F>(mut self, name: impl Into<Bytes>, configure: F) -> Self
    where
        F: FnOnce(View) -> View,
    {
        self.vacm.add_view(name, configure(View::new()));
        self
    }

    pub fn build(self) -> Vacm {
        self.vacm
    }
}
