//! Commonly used types.
//!
//! ```rust
//! use snmp_engine::prelude::*;
//! ```

pub use crate::dispatcher::{Dispatcher, Target, WalkMode};
pub use crate::error::{Error, Result};
pub use crate::oid::Oid;
pub use crate::pdu::Pdu;
pub use crate::processor::MessageProcessor;
pub use crate::security::{CommunityEntry, SecurityLevel, UsmUser};
pub use crate::v3::{AuthProtocol, PrivProtocol};
pub use crate::value::Value;
pub use crate::varbind::VarBind;
pub use crate::version::Version;

#[doc(no_inline)]
pub use crate::oid;
