//! Engine identity, boots/time bookkeeping and timeliness (RFC 3414 §2.2, §3.2 step 7).
//!
//! The registry holds the local (authoritative) engine and every remote
//! engine learned through discovery or authenticated traffic. Remote
//! entries are keyed by engine id; a secondary index maps transport
//! addresses to the engine last seen there so a sender can find cached
//! state before it knows the id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::ReportKind;
use crate::oid::Oid;
use crate::pdu::Pdu;

/// Default timeliness window in seconds.
pub const DEFAULT_TIME_WINDOW: u32 = 150;

/// Latched value of snmpEngineBoots; an engine in this state accepts nothing.
pub const MAX_ENGINE_BOOTS: u32 = 2_147_483_647;

const MAX_ENGINE_TIME: u32 = 2_147_483_647;

/// Cached view of a remote authoritative engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineState {
    pub engine_id: Bytes,
    pub engine_boots: u32,
    /// latestReceivedEngineTime for the current boots value.
    pub engine_time: u32,
    /// Local instant at which `engine_time` was observed.
    pub synced_at: Instant,
}

impl EngineState {
    pub fn new(engine_id: impl Into<Bytes>, engine_boots: u32, engine_time: u32) -> Self {
        Self {
            engine_id: engine_id.into(),
            engine_boots,
            engine_time,
            synced_at: Instant::now(),
        }
    }

    /// Remote engine time advanced by local elapsed seconds.
    pub fn estimated_time(&self) -> u32 {
        let elapsed = self.synced_at.elapsed().as_secs();
        u64::from(self.engine_time)
            .saturating_add(elapsed)
            .min(u64::from(MAX_ENGINE_TIME)) as u32
    }

    /// Non-authoritative timeliness check for an incoming message.
    pub fn is_in_time_window(&self, boots: u32, time: u32, window: u32) -> bool {
        if boots >= MAX_ENGINE_BOOTS || boots < self.engine_boots {
            return false;
        }
        !(boots == self.engine_boots && u64::from(time) + u64::from(window) < u64::from(self.engine_time))
    }

    /// Adopt newer boots/time; older or equal values leave the state untouched.
    pub fn update(&mut self, boots: u32, time: u32) -> bool {
        let newer = boots > self.engine_boots || (boots == self.engine_boots && time > self.engine_time);
        if newer {
            self.engine_boots = boots;
            self.engine_time = time;
            self.synced_at = Instant::now();
        }
        newer
    }

    /// Forced resync from a notInTimeWindow report, which may move boots backwards.
    pub fn resync(&mut self, boots: u32, time: u32) {
        self.engine_boots = boots;
        self.engine_time = time;
        self.synced_at = Instant::now();
    }
}

#[derive(Debug)]
struct LocalEngine {
    engine_id: Bytes,
    boots: u32,
    started: Instant,
}

/// Shared store of engine state, passed by handle to the security layer.
#[derive(Debug)]
pub struct EngineRegistry {
    local: LocalEngine,
    time_window: u32,
    remotes: RwLock<HashMap<Bytes, EngineState>>,
    by_addr: RwLock<HashMap<SocketAddr, Bytes>>,
}

impl EngineRegistry {
    pub fn new(local_engine_id: impl Into<Bytes>, local_boots: u32, time_window: u32) -> Self {
        Self {
            local: LocalEngine {
                engine_id: local_engine_id.into(),
                boots: local_boots,
                started: Instant::now(),
            },
            time_window,
            remotes: RwLock::new(HashMap::new()),
            by_addr: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_engine_id(&self) -> &Bytes {
        &self.local.engine_id
    }

    pub fn local_boots(&self) -> u32 {
        self.local.boots
    }

    /// Seconds since this registry was created.
    pub fn local_time(&self) -> u32 {
        self.local.started.elapsed().as_secs().min(u64::from(MAX_ENGINE_TIME)) as u32
    }

    pub fn time_window(&self) -> u32 {
        self.time_window
    }

    /// Authoritative timeliness check against the local engine.
    pub fn is_local_in_time_window(&self, boots: u32, time: u32) -> bool {
        if self.local.boots >= MAX_ENGINE_BOOTS || boots != self.local.boots {
            return false;
        }
        self.local_time().abs_diff(time) <= self.time_window
    }

    pub fn is_local(&self, engine_id: &[u8]) -> bool {
        self.local.engine_id.as_ref() == engine_id
    }

    pub fn get(&self, engine_id: &[u8]) -> Option<EngineState> {
        self.remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(engine_id)
            .cloned()
    }

    /// Cached state for the engine last seen at `addr`.
    pub fn lookup_addr(&self, addr: SocketAddr) -> Option<EngineState> {
        let engine_id = self
            .by_addr
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&addr)
            .cloned()?;
        self.get(&engine_id)
    }

    /// Record a discovered engine, replacing any previous state for its id.
    pub fn learn(&self, addr: Option<SocketAddr>, state: EngineState) {
        tracing::debug!(
            target: "snmp_engine::usm",
            { snmp.engine_id = %HexId(&state.engine_id), snmp.target = ?addr, boots = state.engine_boots, time = state.engine_time },
            "learned engine"
        );
        if let Some(addr) = addr {
            self.by_addr
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(addr, state.engine_id.clone());
        }
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.engine_id.clone(), state);
    }

    /// Advance cached boots/time after an authenticated message.
    ///
    /// Creates the entry if the engine is unknown. Returns whether anything changed.
    pub fn update(&self, engine_id: &Bytes, boots: u32, time: u32) -> bool {
        let mut remotes = self.remotes.write().unwrap_or_else(PoisonError::into_inner);
        match remotes.get_mut(engine_id) {
            Some(state) => state.update(boots, time),
            None => {
                remotes.insert(engine_id.clone(), EngineState::new(engine_id.clone(), boots, time));
                true
            }
        }
    }

    pub fn resync(&self, engine_id: &Bytes, boots: u32, time: u32) {
        let mut remotes = self.remotes.write().unwrap_or_else(PoisonError::into_inner);
        remotes
            .entry(engine_id.clone())
            .and_modify(|state| state.resync(boots, time))
            .or_insert_with(|| EngineState::new(engine_id.clone(), boots, time));
    }

    /// Non-authoritative timeliness check. Unknown engines are never in window.
    pub fn is_remote_in_time_window(&self, engine_id: &[u8], boots: u32, time: u32) -> bool {
        self.get(engine_id)
            .is_some_and(|state| state.is_in_time_window(boots, time, self.time_window))
    }

    /// Drop cached state for an engine and any address pointing at it.
    pub fn reset(&self, engine_id: &[u8]) -> Option<EngineState> {
        self.by_addr
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, id| id.as_ref() != engine_id);
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(engine_id)
    }

    /// Forget which engine lives at `addr`, forcing rediscovery there.
    pub fn forget_addr(&self, addr: SocketAddr) {
        self.by_addr
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&addr);
    }

    pub fn len(&self) -> usize {
        self.remotes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build an RFC 3411 snmpEngineID with eight random octets (format 5).
pub fn generate_engine_id() -> Bytes {
    let mut id = vec![0x80, 0x00, 0x00, 0x00, 0x05];
    let mut random = [0u8; 8];
    if getrandom::fill(&mut random).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        random = (nanos ^ u64::from(std::process::id())).to_be_bytes();
    }
    id.extend_from_slice(&random);
    Bytes::from(id)
}

/// usmStats counter OID carried in a Report for the given failure.
pub fn report_oid(kind: ReportKind) -> Oid {
    let arc = match kind {
        ReportKind::UnsupportedSecLevels => 1,
        ReportKind::NotInTimeWindows => 2,
        ReportKind::UnknownUserNames => 3,
        ReportKind::UnknownEngineIds => 4,
        ReportKind::WrongDigests => 5,
        ReportKind::DecryptionErrors => 6,
    };
    crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, arc, 0)
}

pub fn report_kind_for_oid(oid: &Oid) -> Option<ReportKind> {
    match oid.arcs() {
        [1, 3, 6, 1, 6, 3, 15, 1, 1, arc, 0] => match arc {
            1 => Some(ReportKind::UnsupportedSecLevels),
            2 => Some(ReportKind::NotInTimeWindows),
            3 => Some(ReportKind::UnknownUserNames),
            4 => Some(ReportKind::UnknownEngineIds),
            5 => Some(ReportKind::WrongDigests),
            6 => Some(ReportKind::DecryptionErrors),
            _ => None,
        },
        _ => None,
    }
}

/// Classify a Report PDU by its first varbind.
pub fn report_kind(pdu: &Pdu) -> Option<ReportKind> {
    pdu.varbinds
        .first()
        .and_then(|vb| report_kind_for_oid(&vb.oid))
}

pub(crate) struct HexId<'a>(pub &'a [u8]);

impl std::fmt::Display for HexId<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn generated_engine_id_shape() {
        let id = generate_engine_id();
        assert_eq!(id.len(), 13);
        assert_eq!(&id[..5], &[0x80, 0x00, 0x00, 0x00, 0x05]);
        assert_ne!(generate_engine_id(), id);
    }

    #[test]
    fn non_authoritative_window() {
        let state = EngineState::new(&b"remote"[..], 5, 1000);
        assert!(state.is_in_time_window(5, 1000, 150));
        assert!(state.is_in_time_window(5, 850, 150));
        assert!(!state.is_in_time_window(5, 849, 150));
        assert!(!state.is_in_time_window(4, 5000, 150));
        assert!(state.is_in_time_window(6, 0, 150));
        assert!(!state.is_in_time_window(MAX_ENGINE_BOOTS, 0, 150));
    }

    #[test]
    fn update_only_moves_forward() {
        let mut state = EngineState::new(&b"remote"[..], 5, 1000);
        assert!(!state.update(5, 900));
        assert!(!state.update(4, 2000));
        assert_eq!((state.engine_boots, state.engine_time), (5, 1000));
        assert!(state.update(5, 1001));
        assert!(state.update(6, 3));
        assert_eq!((state.engine_boots, state.engine_time), (6, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn estimated_time_advances() {
        let state = EngineState::new(&b"remote"[..], 1, 100);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(state.estimated_time(), 130);
    }

    #[tokio::test(start_paused = true)]
    async fn authoritative_window() {
        let registry = EngineRegistry::new(&b"local"[..], 3, 150);
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(registry.local_time(), 200);
        assert!(registry.is_local_in_time_window(3, 200));
        assert!(registry.is_local_in_time_window(3, 50));
        assert!(!registry.is_local_in_time_window(3, 49));
        assert!(!registry.is_local_in_time_window(3, 351));
        assert!(!registry.is_local_in_time_window(2, 200));
    }

    #[test]
    fn registry_address_index() {
        let registry = EngineRegistry::new(&b"local"[..], 1, DEFAULT_TIME_WINDOW);
        let addr: SocketAddr = "192.0.2.7:161".parse().unwrap();
        assert!(registry.lookup_addr(addr).is_none());

        registry.learn(Some(addr), EngineState::new(&b"agent"[..], 2, 50));
        assert_eq!(registry.lookup_addr(addr).unwrap().engine_id, &b"agent"[..]);
        assert!(registry.is_remote_in_time_window(b"agent", 2, 60));
        assert!(!registry.is_remote_in_time_window(b"other", 2, 60));

        registry.update(&Bytes::from_static(b"agent"), 3, 1);
        assert_eq!(registry.get(b"agent").unwrap().engine_boots, 3);

        registry.reset(b"agent");
        assert!(registry.lookup_addr(addr).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn report_oids_round_trip() {
        for kind in [
            ReportKind::UnsupportedSecLevels,
            ReportKind::NotInTimeWindows,
            ReportKind::UnknownUserNames,
            ReportKind::UnknownEngineIds,
            ReportKind::WrongDigests,
            ReportKind::DecryptionErrors,
        ] {
            assert_eq!(report_kind_for_oid(&report_oid(kind)), Some(kind));
        }
        assert_eq!(
            report_oid(ReportKind::UnknownEngineIds).to_string(),
            "1.3.6.1.6.3.15.1.1.4.0"
        );
        assert_eq!(report_kind_for_oid(&crate::oid!(1, 3, 6, 1)), None);
    }
}
