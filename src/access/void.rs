use super::AccessDecision;

/// Access control disabled: every check is allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoidAccess;

impl VoidAccess {
    pub fn check(&self) -> AccessDecision {
        AccessDecision::Allow
    }
}
