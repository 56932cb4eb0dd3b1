//! In-process agent answering through a [`MockTransport`] responder.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use snmp_engine::error::ErrorStatus;
use snmp_engine::{
    MessageProcessor, MockTransport, Oid, Pdu, PduType, ProcessOutcome, Value, VarBind, Version,
};

struct State {
    processor: Mutex<Arc<MessageProcessor>>,
    mib: Mutex<BTreeMap<Oid, Value>>,
    received: AtomicUsize,
    silent: AtomicUsize,
}

/// Command responder backed by a [`MessageProcessor`] and an OID table.
///
/// Security, access control and Reports all come from the processor; the
/// agent only implements GET, GETNEXT, GETBULK and SET over its table.
#[derive(Clone)]
pub struct MockAgent {
    state: Arc<State>,
}

impl MockAgent {
    pub fn new(processor: MessageProcessor, mib: BTreeMap<Oid, Value>) -> Self {
        Self {
            state: Arc::new(State {
                processor: Mutex::new(Arc::new(processor)),
                mib: Mutex::new(mib),
                received: AtomicUsize::new(0),
                silent: AtomicUsize::new(0),
            }),
        }
    }

    /// Serve `addr` on `mock`; every datagram sent there is answered.
    pub fn attach(&self, mock: &MockTransport, addr: SocketAddr) {
        let agent = self.clone();
        mock.set_responder(move |data, target| {
            if target != addr {
                return None;
            }
            agent.handle(data).map(|reply| (reply, addr))
        });
    }

    /// Swap the processor, e.g. to simulate a reboot.
    pub fn replace_processor(&self, processor: MessageProcessor) {
        *self.state.processor.lock().unwrap() = Arc::new(processor);
    }

    /// Drop the next `n` datagrams without answering.
    pub fn ignore_next(&self, n: usize) {
        self.state.silent.store(n, Ordering::SeqCst);
    }

    /// Datagrams received so far, answered or not.
    pub fn received(&self) -> usize {
        self.state.received.load(Ordering::SeqCst)
    }

    pub fn value(&self, oid: &Oid) -> Option<Value> {
        self.state.mib.lock().unwrap().get(oid).cloned()
    }

    pub fn handle(&self, data: &[u8]) -> Option<Bytes> {
        self.state.received.fetch_add(1, Ordering::SeqCst);
        let skip = self
            .state
            .silent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if skip {
            return None;
        }

        let processor = self.state.processor.lock().unwrap().clone();
        let incoming = match processor.process_incoming(Bytes::copy_from_slice(data), None).ok()? {
            ProcessOutcome::Respond(reply) => return Some(reply),
            ProcessOutcome::Deliver(incoming) => incoming,
        };
        let request = incoming.pdu.as_pdu()?.clone();
        let response = self.answer(incoming.version, &request)?;
        processor.prepare_response(&incoming, response).ok()
    }

    fn answer(&self, version: Version, request: &Pdu) -> Option<Pdu> {
        let mut mib = self.state.mib.lock().unwrap();
        let lookup = |oid: &Oid| mib.get(oid).cloned().unwrap_or(Value::NoSuchObject);
        let next = |oid: &Oid| {
            mib.range::<Oid, _>((std::ops::Bound::Excluded(oid), std::ops::Bound::Unbounded))
                .next()
                .map_or_else(
                    || VarBind::new(oid.clone(), Value::EndOfMibView),
                    |(oid, value)| VarBind::new(oid.clone(), value.clone()),
                )
        };

        let varbinds = match request.pdu_type {
            PduType::GetRequest => request
                .varbinds
                .iter()
                .map(|vb| VarBind::new(vb.oid.clone(), lookup(&vb.oid)))
                .collect(),
            PduType::GetNextRequest => request.varbinds.iter().map(|vb| next(&vb.oid)).collect(),
            PduType::GetBulkRequest => {
                let bulk = request.bulk_accounting()?;
                let (fixed, repeated) = request.varbinds.split_at(bulk.non_repeaters);
                let mut out: Vec<VarBind> = fixed.iter().map(|vb| next(&vb.oid)).collect();
                let mut cursors: Vec<Oid> = repeated.iter().map(|vb| vb.oid.clone()).collect();
                for _ in 0..bulk.max_repetitions {
                    let row: Vec<VarBind> = cursors.iter().map(&next).collect();
                    let finished = row.iter().all(|vb| vb.value == Value::EndOfMibView);
                    cursors = row.iter().map(|vb| vb.oid.clone()).collect();
                    out.extend(row);
                    if finished {
                        break;
                    }
                }
                out
            }
            PduType::SetRequest => {
                for vb in &request.varbinds {
                    mib.insert(vb.oid.clone(), vb.value.clone());
                }
                request.varbinds.clone()
            }
            _ => return Some(request.to_response()),
        };

        if version == Version::V1
            && let Some(index) = varbinds.iter().position(|vb| vb.value.is_exception())
        {
            return Some(request.to_error_response(ErrorStatus::NoSuchName, index as i32 + 1));
        }
        Some(Pdu::response(request.request_id, varbinds))
    }
}
