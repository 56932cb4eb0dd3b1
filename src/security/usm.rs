//! User-based Security Model (RFC 3414 §3).
//!
//! Outbound ([`Usm::secure`]): serialize the scoped PDU, encrypt it when the
//! level asks for privacy, assemble the message with zeroed authentication
//! parameters, then HMAC the whole message and splice the digest in.
//!
//! Inbound ([`Usm::validate`]): user lookup, level check, digest, timeliness,
//! decryption and finally the scoped PDU decode. Each failure bumps the
//! matching usmStats counter, and [`Usm::report`] turns it into a Report.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use super::{SecurityContext, SecurityLevel, SecurityModel};
use crate::ber::Decoder;
use crate::error::{AuthErrorKind, CryptoErrorKind, EncodeErrorKind, Error, ReportKind, Result};
use crate::message::{DEFAULT_MSG_MAX_SIZE, MsgFlags, MsgGlobalData, ScopedPdu, V3Message, V3MessageData};
use crate::pdu::Pdu;
use crate::v3::{
    AuthProtocol, DEFAULT_TIME_WINDOW, EngineRegistry, HexId, LocalizedKey, MasterKey, PrivKey, PrivProtocol, SaltCounter,
    UsmSecurityParams, generate_engine_id, report_oid,
};
use crate::value::Value;
use crate::varbind::VarBind;

/// A row of the user table, holding password-derived master keys.
#[derive(Clone)]
pub struct UsmUser {
    name: Bytes,
    auth: Option<MasterKey>,
    privacy: Option<(PrivProtocol, MasterKey)>,
}

impl UsmUser {
    /// A noAuthNoPriv user.
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            auth: None,
            privacy: None,
        }
    }

    pub fn with_auth(mut self, protocol: AuthProtocol, password: impl AsRef<[u8]>) -> Result<Self> {
        self.auth = Some(MasterKey::from_password(protocol, password.as_ref())?);
        Ok(self)
    }

    /// Add privacy. The key is derived with the auth hash, so auth must come first.
    pub fn with_priv(mut self, protocol: PrivProtocol, password: impl AsRef<[u8]>) -> Result<Self> {
        let Some(auth) = &self.auth else {
            return Err(Error::encode(EncodeErrorKind::MissingAuthKey));
        };
        let master = MasterKey::from_password(auth.protocol(), password.as_ref())?;
        self.privacy = Some((protocol, master));
        Ok(self)
    }

    pub fn name(&self) -> &Bytes {
        &self.name
    }

    pub fn auth_protocol(&self) -> Option<AuthProtocol> {
        self.auth.as_ref().map(MasterKey::protocol)
    }

    pub fn priv_protocol(&self) -> Option<PrivProtocol> {
        self.privacy.as_ref().map(|(protocol, _)| *protocol)
    }

    /// Highest level this user's keys support.
    pub fn max_level(&self) -> SecurityLevel {
        match (&self.auth, &self.privacy) {
            (Some(_), Some(_)) => SecurityLevel::AuthPriv,
            (Some(_), None) => SecurityLevel::AuthNoPriv,
            _ => SecurityLevel::NoAuthNoPriv,
        }
    }

    fn localize(&self, engine_id: &[u8]) -> UserKeys {
        UserKeys {
            auth: self.auth.as_ref().map(|master| master.localize(engine_id)),
            privacy: self
                .privacy
                .as_ref()
                .map(|(protocol, master)| PrivKey::from_master_key(master, *protocol, engine_id)),
        }
    }
}

impl std::fmt::Debug for UsmUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsmUser")
            .field("name", &self.name)
            .field("auth", &self.auth_protocol())
            .field("priv", &self.priv_protocol())
            .finish()
    }
}

/// Keys localized to one engine.
#[derive(Debug)]
struct UserKeys {
    auth: Option<LocalizedKey>,
    privacy: Option<PrivKey>,
}

/// Snapshot of the usmStats counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsmStats {
    pub unsupported_sec_levels: u32,
    pub not_in_time_windows: u32,
    pub unknown_user_names: u32,
    pub unknown_engine_ids: u32,
    pub wrong_digests: u32,
    pub decryption_errors: u32,
}

#[derive(Debug, Default)]
struct Counters([AtomicU32; 6]);

impl Counters {
    fn slot(kind: ReportKind) -> usize {
        match kind {
            ReportKind::UnsupportedSecLevels => 0,
            ReportKind::NotInTimeWindows => 1,
            ReportKind::UnknownUserNames => 2,
            ReportKind::UnknownEngineIds => 3,
            ReportKind::WrongDigests => 4,
            ReportKind::DecryptionErrors => 5,
        }
    }

    fn bump(&self, kind: ReportKind) -> u32 {
        self.0[Self::slot(kind)].fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn get(&self, kind: ReportKind) -> u32 {
        self.0[Self::slot(kind)].load(Ordering::Relaxed)
    }
}

/// A v3 message that passed every USM check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMessage {
    pub msg_id: i32,
    pub msg_max_size: i32,
    pub flags: MsgFlags,
    pub params: UsmSecurityParams,
    pub context: SecurityContext,
    pub pdu: Pdu,
}

#[derive(Debug, Default)]
pub struct UsmBuilder {
    users: Vec<UsmUser>,
    engines: Option<Arc<EngineRegistry>>,
    max_msg_size: Option<i32>,
}

impl UsmBuilder {
    pub fn user(mut self, user: UsmUser) -> Self {
        self.users.push(user);
        self
    }

    pub fn users(mut self, users: impl IntoIterator<Item = UsmUser>) -> Self {
        self.users.extend(users);
        self
    }

    /// Engine registry shared with the rest of the engine.
    pub fn engines(mut self, engines: Arc<EngineRegistry>) -> Self {
        self.engines = Some(engines);
        self
    }

    /// msgMaxSize advertised in outgoing messages.
    pub fn max_msg_size(mut self, size: i32) -> Self {
        self.max_msg_size = Some(size);
        self
    }

    pub fn build(self) -> Usm {
        let engines = self.engines.unwrap_or_else(|| {
            Arc::new(EngineRegistry::new(
                generate_engine_id(),
                1,
                DEFAULT_TIME_WINDOW,
            ))
        });
        Usm {
            users: self.users.into_iter().map(|u| (u.name.clone(), u)).collect(),
            engines,
            keys: RwLock::new(HashMap::new()),
            salt: SaltCounter::new(),
            stats: Counters::default(),
            max_msg_size: self.max_msg_size.unwrap_or(DEFAULT_MSG_MAX_SIZE),
        }
    }
}

#[derive(Debug)]
pub struct Usm {
    users: HashMap<Bytes, UsmUser>,
    engines: Arc<EngineRegistry>,
    keys: RwLock<HashMap<(Bytes, Bytes), Arc<UserKeys>>>,
    salt: SaltCounter,
    stats: Counters,
    max_msg_size: i32,
}

impl Usm {
    pub fn builder() -> UsmBuilder {
        UsmBuilder::default()
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    pub fn user(&self, name: &[u8]) -> Option<&UsmUser> {
        self.users.get(name)
    }

    pub fn stats(&self) -> UsmStats {
        UsmStats {
            unsupported_sec_levels: self.stats.get(ReportKind::UnsupportedSecLevels),
            not_in_time_windows: self.stats.get(ReportKind::NotInTimeWindows),
            unknown_user_names: self.stats.get(ReportKind::UnknownUserNames),
            unknown_engine_ids: self.stats.get(ReportKind::UnknownEngineIds),
            wrong_digests: self.stats.get(ReportKind::WrongDigests),
            decryption_errors: self.stats.get(ReportKind::DecryptionErrors),
        }
    }

    fn keys_for(&self, user: &UsmUser, engine_id: &Bytes) -> Arc<UserKeys> {
        let cache_key = (user.name.clone(), engine_id.clone());
        if let Some(keys) = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
        {
            return keys.clone();
        }
        let keys = Arc::new(user.localize(engine_id));
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cache_key)
            .or_insert(keys)
            .clone()
    }

    /// Secure an outgoing PDU for `security_engine_id`.
    ///
    /// Requests and INFORMs are authoritative at the remote engine, whose
    /// boots/time must already be known unless the level is noAuthNoPriv.
    /// Responses, Reports and traps use the local engine's clock.
    pub fn secure(
        &self,
        msg_id: i32,
        context: &SecurityContext,
        security_engine_id: &Bytes,
        pdu: Pdu,
    ) -> Result<Bytes> {
        let level = context.security_level;
        let user = match self.users.get(&context.security_name) {
            Some(user) if user.max_level() >= level => Some(user),
            Some(_) if level.requires_priv() => return Err(Error::encode(EncodeErrorKind::NoPrivKey)),
            Some(_) => return Err(Error::encode(EncodeErrorKind::MissingAuthKey)),
            None if level == SecurityLevel::NoAuthNoPriv => None,
            None => return Err(Error::auth(None, AuthErrorKind::UnknownUser)),
        };

        let (boots, time) = if self.engines.is_local(security_engine_id) {
            (self.engines.local_boots(), self.engines.local_time())
        } else {
            match self.engines.get(security_engine_id) {
                Some(state) => (state.engine_boots, state.estimated_time()),
                None if level == SecurityLevel::NoAuthNoPriv => (0, 0),
                None => return Err(Error::encode(EncodeErrorKind::EngineNotDiscovered)),
            }
        };

        let context_engine_id = if context.context_engine_id.is_empty() {
            security_engine_id.clone()
        } else {
            context.context_engine_id.clone()
        };
        let reportable = pdu.pdu_type.is_confirmed();
        let scoped = ScopedPdu::new(context_engine_id, context.context_name.clone(), pdu);
        let global = MsgGlobalData::new(msg_id, self.max_msg_size, MsgFlags::new(level, reportable));
        let params = UsmSecurityParams::new(security_engine_id.clone(), boots, time, context.security_name.clone());
        let keys = user.map(|user| self.keys_for(user, security_engine_id));

        self.seal(global, params, scoped, keys.as_deref())
    }

    fn seal(
        &self,
        global: MsgGlobalData,
        mut params: UsmSecurityParams,
        scoped: ScopedPdu,
        keys: Option<&UserKeys>,
    ) -> Result<Bytes> {
        let level = global.msg_flags.security_level;
        scoped.pdu.validate()?;

        let data = if level.requires_priv() {
            let privacy = keys
                .and_then(|k| k.privacy.as_ref())
                .ok_or_else(|| Error::encode(EncodeErrorKind::NoPrivKey))?;
            let plaintext = scoped.to_bytes();
            let (ciphertext, salt) =
                privacy.encrypt(&plaintext, params.engine_boots, params.engine_time, self.salt.next())?;
            params = params.with_priv_params(salt.to_vec());
            V3MessageData::Encrypted(Bytes::from(ciphertext))
        } else {
            V3MessageData::Plaintext(scoped)
        };

        let auth = if level.requires_auth() {
            let auth = keys
                .and_then(|k| k.auth.as_ref())
                .ok_or_else(|| Error::encode(EncodeErrorKind::MissingAuthKey))?;
            params = params.with_auth_placeholder(auth.mac_len());
            Some(auth)
        } else {
            None
        };

        let (encoded_params, auth_range) = params.encode_marked();
        let (bytes, params_range) = V3Message::new(global, encoded_params, data).encode_marked()?;

        let Some(auth) = auth else {
            return Ok(bytes);
        };
        let mut out: Vec<u8> = bytes.into();
        let mac = auth.sign(&out)?;
        let start = params_range.start + auth_range.start;
        out[start..start + mac.len()].copy_from_slice(&mac);
        Ok(Bytes::from(out))
    }

    /// Run the inbound checks on a decoded v3 message.
    ///
    /// `data` must be the exact datagram `msg` was decoded from.
    pub fn validate(&self, data: &Bytes, msg: &V3Message, source: Option<SocketAddr>) -> Result<ValidatedMessage> {
        self.validate_inner(data, msg).map_err(|err| match source {
            Some(addr) => err.with_target(addr),
            None => err,
        })
    }

    fn validate_inner(&self, data: &Bytes, msg: &V3Message) -> Result<ValidatedMessage> {
        let (params, auth_range) = UsmSecurityParams::decode_marked(msg.security_params.clone())?;
        let level = msg.security_level();
        let local_authoritative = msg.global.msg_flags.reportable;

        if local_authoritative && !self.engines.is_local(&params.engine_id) {
            self.fail(ReportKind::UnknownEngineIds, &params);
            return Err(Error::UnknownEngineId { target: None });
        }

        let user = match self.users.get(&params.username) {
            Some(user) => Some(user),
            None if params.username.is_empty() && level == SecurityLevel::NoAuthNoPriv => None,
            None => {
                self.fail(ReportKind::UnknownUserNames, &params);
                return Err(Error::auth(None, AuthErrorKind::UnknownUser));
            }
        };
        if user.map_or(SecurityLevel::NoAuthNoPriv, UsmUser::max_level) < level {
            self.fail(ReportKind::UnsupportedSecLevels, &params);
            return Err(Error::auth(None, AuthErrorKind::UnsupportedSecurityLevel));
        }

        let keys = user.map(|user| self.keys_for(user, &params.engine_id));

        if level.requires_auth() {
            let auth = keys
                .as_ref()
                .and_then(|k| k.auth.as_ref())
                .ok_or_else(|| Error::auth(None, AuthErrorKind::NoAuthKey))?;
            let offset = msg
                .security_params_offset()
                .ok_or_else(|| Error::auth(None, AuthErrorKind::AuthParamsNotFound))?;
            let start = offset + auth_range.start;
            let end = offset + auth_range.end;
            if end > data.len() || data[start..end] != params.auth_params[..] {
                return Err(Error::auth(None, AuthErrorKind::AuthParamsNotFound));
            }
            let mut zeroed = data.to_vec();
            zeroed[start..end].fill(0);
            if let Err(err) = auth.verify(&zeroed, &params.auth_params) {
                self.fail(ReportKind::WrongDigests, &params);
                return Err(err);
            }

            let in_window = if local_authoritative {
                self.engines.is_local_in_time_window(params.engine_boots, params.engine_time)
            } else if self.engines.get(&params.engine_id).is_some() {
                self.engines
                    .is_remote_in_time_window(&params.engine_id, params.engine_boots, params.engine_time)
            } else {
                true
            };
            if !in_window {
                self.fail(ReportKind::NotInTimeWindows, &params);
                return Err(Error::NotInTimeWindow { target: None });
            }
            if !local_authoritative {
                self.engines
                    .update(&params.engine_id, params.engine_boots, params.engine_time);
            }
        }

        let scoped = match &msg.data {
            V3MessageData::Plaintext(scoped) => scoped.clone(),
            V3MessageData::Encrypted(ciphertext) => {
                let privacy = keys
                    .as_ref()
                    .and_then(|k| k.privacy.as_ref())
                    .ok_or_else(|| Error::decrypt(None, CryptoErrorKind::NoPrivKey))?;
                let decrypted = privacy
                    .decrypt(ciphertext, params.engine_boots, params.engine_time, &params.priv_params)
                    .and_then(|plain| {
                        ScopedPdu::decode(&mut Decoder::new(Bytes::from(plain)))
                            .map_err(|_| Error::decrypt(None, CryptoErrorKind::MalformedPlaintext))
                    });
                match decrypted {
                    Ok(scoped) => scoped,
                    Err(err) => {
                        self.fail(ReportKind::DecryptionErrors, &params);
                        return Err(err);
                    }
                }
            }
        };

        let context = SecurityContext {
            security_model: SecurityModel::Usm,
            security_name: params.username.clone(),
            security_level: level,
            context_engine_id: scoped.context_engine_id,
            context_name: scoped.context_name,
        };
        Ok(ValidatedMessage {
            msg_id: msg.msg_id(),
            msg_max_size: msg.global.msg_max_size,
            flags: msg.global.msg_flags,
            params,
            context,
            pdu: scoped.pdu,
        })
    }

    fn fail(&self, kind: ReportKind, params: &UsmSecurityParams) {
        let count = self.stats.bump(kind);
        tracing::debug!(
            target: "snmp_engine::usm",
            { snmp.engine_id = %HexId(&params.engine_id), user = %String::from_utf8_lossy(&params.username), counter = %kind, count },
            "USM validation failed"
        );
    }

    /// Build the Report answering a message that failed validation with `kind`.
    ///
    /// notInTimeWindow reports are authenticated so the requester can trust
    /// the boots/time they carry; the rest go out noAuthNoPriv.
    pub fn report(&self, msg: &V3Message, kind: ReportKind) -> Result<Bytes> {
        let received = UsmSecurityParams::decode(msg.security_params.clone()).unwrap_or_default();
        let request_id = msg.scoped_pdu().map_or(0, |s| s.pdu.request_id);

        let user = self.users.get(&received.username);
        let level = match (kind, user) {
            (ReportKind::NotInTimeWindows, Some(user)) if user.max_level().requires_auth() => SecurityLevel::AuthNoPriv,
            _ => SecurityLevel::NoAuthNoPriv,
        };
        let local_id = self.engines.local_engine_id().clone();
        let keys = match level {
            SecurityLevel::NoAuthNoPriv => None,
            _ => user.map(|user| self.keys_for(user, &local_id)),
        };

        let varbind = VarBind::new(report_oid(kind), Value::Counter32(self.stats.get(kind)));
        let pdu = Pdu::report(request_id, vec![varbind]);
        let global = MsgGlobalData::new(msg.msg_id(), self.max_msg_size, MsgFlags::new(level, false));
        let params = UsmSecurityParams::new(
            local_id.clone(),
            self.engines.local_boots(),
            self.engines.local_time(),
            received.username,
        );
        self.seal(global, params, ScopedPdu::new(local_id, Bytes::new(), pdu), keys.as_deref())
    }
}

/// Report counter for a validation failure, when the failure is reportable.
pub fn report_kind_of(err: &Error) -> Option<ReportKind> {
    match err {
        Error::UnknownEngineId { .. } => Some(ReportKind::UnknownEngineIds),
        Error::NotInTimeWindow { .. } => Some(ReportKind::NotInTimeWindows),
        Error::DecryptionFailed { .. } => Some(ReportKind::DecryptionErrors),
        Error::AuthenticationFailed { kind, .. } => match kind {
            AuthErrorKind::UnknownUser => Some(ReportKind::UnknownUserNames),
            AuthErrorKind::UnsupportedSecurityLevel => Some(ReportKind::UnsupportedSecLevels),
            AuthErrorKind::HmacMismatch | AuthErrorKind::WrongMacLength { .. } => Some(ReportKind::WrongDigests),
            _ => None,
        },
        _ => None,
    }
}
