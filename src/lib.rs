//! SNMPv1/v2c/v3 message processing engine.
//!
//! The crate is layered leaves first:
//!
//! - **Codec**: [`ber`], [`oid`], [`value`], [`varbind`], [`pdu`] and
//!   [`message`] turn messages into canonical BER and back. Decoding is
//!   bounds-checked and returns a typed [`Error::Decode`] for any malformed
//!   input.
//! - **Security**: [`security`] holds the community model and the
//!   User-based Security Model, built on the primitives in [`v3`].
//! - **Access control**: [`access`] decides whether a security context may
//!   touch an OID, either always ([`access::VoidAccess`]) or through VACM.
//! - **Message processing**: [`processor::MessageProcessor`] joins the three
//!   for one datagram at a time.
//! - **Dispatch**: [`dispatcher::Dispatcher`] correlates requests with
//!   responses over a [`transport::Transport`], with retries, timeouts,
//!   engine discovery, walks and notification intake.
//!
//! # Example
//!
//! ```rust,no_run
//! use snmp_engine::prelude::*;
//! use snmp_engine::dispatcher::Target;
//! use futures::StreamExt;
//!
//! # async fn run() -> snmp_engine::Result<()> {
//! let processor = MessageProcessor::builder()
//!     .user(UsmUser::new("admin").with_auth(AuthProtocol::Sha256, "authpass123")?)
//!     .build();
//! let (dispatcher, _notifications) = Dispatcher::builder()
//!     .processor(processor)
//!     .bind("[::]:0".parse().unwrap())
//!     .await?;
//!
//! let target = Target::v3("192.0.2.1:161".parse().unwrap(), "admin", SecurityLevel::AuthNoPriv);
//! let mut walk = dispatcher.bulk_walk(&target, oid!(1, 3, 6, 1, 2, 1, 1));
//! while let Some(vb) = walk.next().await {
//!     let vb = vb?;
//!     println!("{} = {:?}", vb.oid, vb.value);
//! }
//! # Ok(())
//! # }
//! ```

// The Error enum carries OIDs and addresses inline for diagnostics.
#![allow(clippy::result_large_err)]

pub mod access;
pub mod ber;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod oid;
pub mod pdu;
pub mod prelude;
pub mod processor;
pub mod security;
pub mod transport;
pub mod v3;
pub mod value;
pub mod varbind;
pub mod version;

pub use access::{AccessControl, AccessDecision, DenyReason, Vacm, VacmBuilder, ViewType, VoidAccess};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, Exchange, Notification, Retry, Target};
pub use error::{
    AuthErrorKind, CryptoErrorKind, DecodeErrorKind, EncodeErrorKind, Error, ErrorStatus, OidErrorKind, ReportKind,
    Result,
};
pub use message::{CommunityMessage, Message, V3Message};
pub use oid::Oid;
pub use pdu::{Pdu, PduBody, PduType, TrapV1Pdu};
pub use processor::{Incoming, MessageProcessor, ProcessOutcome};
pub use security::{CommunityEntry, CommunityModel, SecurityContext, SecurityLevel, SecurityModel, Usm, UsmUser};
pub use transport::{MockTransport, Transport, UdpTransport};
pub use v3::{AuthProtocol, EngineRegistry, EngineState, PrivProtocol};
pub use value::Value;
pub use varbind::VarBind;
pub use version::Version;
