//! Walk stream implementations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use super::{DEFAULT_MAX_REPETITIONS, Dispatcher, Target};
use crate::error::{Error, ErrorStatus, Result};
use crate::oid::Oid;
use crate::pdu::Pdu;
use crate::transport::Transport;
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

type Fetch = Pin<Box<dyn Future<Output = Result<Vec<VarBind>>> + Send>>;

/// Where a walk stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalkMode {
    /// Stop at the first OID outside the starting subtree.
    #[default]
    Subtree,
    /// Continue until the agent reports endOfMibView.
    ToEndOfMib,
}

enum Step {
    Yield(VarBind),
    Stop,
    Fail(Error),
}

impl Step {
    fn into_poll(self) -> Poll<Option<Result<VarBind>>> {
        match self {
            Self::Yield(vb) => Poll::Ready(Some(Ok(vb))),
            Self::Stop => Poll::Ready(None),
            Self::Fail(err) => Poll::Ready(Some(Err(err))),
        }
    }
}

/// Position and stop rules shared by both walk kinds.
#[derive(Debug)]
struct Cursor {
    base: Oid,
    mode: WalkMode,
    next: Oid,
    /// Last OID handed to the caller, to catch agents that loop.
    last: Option<Oid>,
    done: bool,
}

impl Cursor {
    fn new(base: Oid) -> Self {
        Self {
            next: base.clone(),
            base,
            mode: WalkMode::default(),
            last: None,
            done: false,
        }
    }

    fn step(&mut self, vb: VarBind) -> Step {
        if matches!(vb.value, Value::EndOfMibView) {
            return self.stop();
        }
        if self.mode == WalkMode::Subtree && !vb.oid.starts_with(&self.base) {
            return self.stop();
        }
        if let Some(previous) = self.last.take()
            && vb.oid <= previous
        {
            self.done = true;
            return Step::Fail(Error::NonIncreasingOid {
                previous,
                current: vb.oid,
            });
        }
        self.next = vb.oid.clone();
        self.last = Some(vb.oid.clone());
        Step::Yield(vb)
    }

    fn stop(&mut self) -> Step {
        self.done = true;
        Step::Stop
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<VarBind>>> {
        self.done = true;
        Poll::Ready(Some(Err(err)))
    }
}

/// Stream of varbinds under an OID, one GETNEXT per item.
///
/// Created by [`Dispatcher::walk`]. Works with every version; an SNMPv1
/// noSuchName error ends the walk the way endOfMibView does for v2c/v3.
pub struct Walk<T: Transport> {
    dispatcher: Dispatcher<T>,
    target: Target,
    cursor: Cursor,
    pending: Option<Fetch>,
}

impl<T: Transport> Walk<T> {
    fn new(dispatcher: Dispatcher<T>, target: Target, oid: Oid) -> Self {
        Self {
            dispatcher,
            target,
            cursor: Cursor::new(oid),
            pending: None,
        }
    }

    pub fn mode(mut self, mode: WalkMode) -> Self {
        self.cursor.mode = mode;
        self
    }
}

impl<T: Transport> Stream for Walk<T> {
    type Item = Result<VarBind>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cursor.done {
            return Poll::Ready(None);
        }

        let pending = this.pending.get_or_insert_with(|| {
            let dispatcher = this.dispatcher.clone();
            let target = this.target.clone();
            let oid = this.cursor.next.clone();
            let fetch: Fetch = Box::pin(async move {
                dispatcher
                    .request(&target, Pdu::get_next_request(0, &[oid]))
                    .await
            });
            fetch
        });

        let result = match pending.as_mut().poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };
        this.pending = None;

        match result {
            Ok(varbinds) => match varbinds.into_iter().next() {
                Some(vb) => this.cursor.step(vb).into_poll(),
                None => this.cursor.stop().into_poll(),
            },
            Err(Error::Snmp {
                status: ErrorStatus::NoSuchName,
                ..
            }) if this.target.version == Version::V1 => this.cursor.stop().into_poll(),
            Err(err) => this.cursor.fail(err),
        }
    }
}

/// Stream of varbinds under an OID fetched with GETBULK.
///
/// Created by [`Dispatcher::bulk_walk`]. The walk ends without a further
/// request as soon as a response carries endOfMibView.
pub struct BulkWalk<T: Transport> {
    dispatcher: Dispatcher<T>,
    target: Target,
    cursor: Cursor,
    max_repetitions: i32,
    buffer: std::vec::IntoIter<VarBind>,
    pending: Option<Fetch>,
}

impl<T: Transport> BulkWalk<T> {
    fn new(dispatcher: Dispatcher<T>, target: Target, oid: Oid) -> Self {
        Self {
            dispatcher,
            target,
            cursor: Cursor::new(oid),
            max_repetitions: DEFAULT_MAX_REPETITIONS,
            buffer: Vec::new().into_iter(),
            pending: None,
        }
    }

    pub fn mode(mut self, mode: WalkMode) -> Self {
        self.cursor.mode = mode;
        self
    }

    /// Varbinds requested per GETBULK (default 50).
    pub fn max_repetitions(mut self, max_repetitions: i32) -> Self {
        self.max_repetitions = max_repetitions.max(1);
        self
    }
}

impl<T: Transport> Stream for BulkWalk<T> {
    type Item = Result<VarBind>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.cursor.done {
                return Poll::Ready(None);
            }

            if let Some(vb) = this.buffer.next() {
                return this.cursor.step(vb).into_poll();
            }

            let pending = this.pending.get_or_insert_with(|| {
                let dispatcher = this.dispatcher.clone();
                let target = this.target.clone();
                let oid = this.cursor.next.clone();
                let max_repetitions = this.max_repetitions;
                let fetch: Fetch = Box::pin(async move {
                    dispatcher
                        .request(&target, Pdu::get_bulk(0, 0, max_repetitions, &[oid]))
                        .await
                });
                fetch
            });

            let result = match pending.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => result,
            };
            this.pending = None;

            match result {
                Ok(varbinds) if varbinds.is_empty() => return this.cursor.stop().into_poll(),
                Ok(varbinds) => this.buffer = varbinds.into_iter(),
                Err(err) => return this.cursor.fail(err),
            }
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Walk the subtree under `oid` with GETNEXT.
    pub fn walk(&self, target: &Target, oid: Oid) -> Walk<T> {
        Walk::new(self.clone(), target.clone(), oid)
    }

    /// Walk the subtree under `oid` with GETBULK (SNMPv2c/v3 only).
    pub fn bulk_walk(&self, target: &Target, oid: Oid) -> BulkWalk<T> {
        BulkWalk::new(self.clone(), target.clone(), oid)
    }
}
