//! Request dispatcher (RFC 3412 §4.1).
//!
//! [`Dispatcher`] turns datagrams into correlated exchanges. It owns the
//! table of pending exchanges and the request-id counter, drives
//! retransmission and timeouts, and runs one receive loop per transport
//! that feeds every inbound datagram through the [`MessageProcessor`].
//!
//! # Exchanges
//!
//! [`Dispatcher::submit`] secures and sends a request and returns an
//! [`Exchange`] handle; [`Dispatcher::send`] is submit-and-await. Each
//! exchange resolves exactly once: with the matching response, with
//! [`Error::Timeout`] after the retries are exhausted, with
//! [`Error::Cancelled`] when its owner cancels it, or with
//! [`Error::Closed`] on shutdown. Late and duplicate responses are dropped.
//!
//! # SNMPv3
//!
//! Before the first authenticated request to an address the dispatcher
//! runs engine discovery. Concurrent requests to the same address share a
//! single discovery probe. A `notInTimeWindow` or `unknownEngineID`
//! report for a pending request resynchronizes the engine state,
//! re-secures the request and sends it once more; `notInTimeWindow` reports
//! are only trusted when authenticated. An authenticated trap or response
//! outside the cached time window drops that engine's clock and triggers
//! a fresh discovery of its sender.
//!
//! ```rust,no_run
//! use snmp_engine::dispatcher::{Dispatcher, Target};
//! use snmp_engine::pdu::Pdu;
//! use snmp_engine::oid;
//!
//! # async fn run() -> snmp_engine::Result<()> {
//! let (dispatcher, _notifications) = Dispatcher::builder().bind("0.0.0.0:0".parse().unwrap()).await?;
//! let target = Target::v2c("192.0.2.1:161".parse().unwrap(), "public");
//! let response = dispatcher
//!     .send(&target, Pdu::get_request(0, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]))
//!     .await?;
//! println!("{:?}", response.varbinds);
//! # Ok(())
//! # }
//! ```

mod notification;
mod retry;
mod walk;

pub use notification::Notification;
pub use retry::{Backoff, Retry, RetryBuilder};
pub use walk::{BulkWalk, Walk, WalkMode};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Span, instrument};

use crate::error::{AuthErrorKind, EncodeErrorKind, Error, ErrorStatus, ReportKind, Result};
use crate::message::{DEFAULT_MSG_MAX_SIZE, Message};
use crate::pdu::{Pdu, PduType};
use crate::processor::{Incoming, MessageProcessor, ProcessOutcome};
use crate::security::{SecurityContext, SecurityLevel};
use crate::transport::{Transport, UdpTransport};
use crate::v3::{EngineState, UsmSecurityParams, report_kind};
use crate::varbind::VarBind;
use crate::version::Version;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default notification channel capacity.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Default max-repetitions for bulk walks.
pub const DEFAULT_MAX_REPETITIONS: i32 = 50;

/// Dispatcher-wide defaults; [`Target`] can override timeout and retry.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub timeout: Duration,
    pub retry: Retry,
    pub notification_capacity: usize,
    /// Receive buffer size, and so the largest datagram accepted.
    pub max_msg_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: Retry::default(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            max_msg_size: DEFAULT_MSG_MAX_SIZE as usize,
        }
    }
}

/// How requests to a target are secured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSecurity {
    Community(Bytes),
    Usm {
        user: Bytes,
        level: SecurityLevel,
        context_name: Bytes,
        /// Defaults to the engine id learned by discovery.
        context_engine_id: Option<Bytes>,
    },
}

/// A remote engine and the parameters used to talk to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub addr: SocketAddr,
    pub version: Version,
    pub security: TargetSecurity,
    pub timeout: Option<Duration>,
    pub retry: Option<Retry>,
}

impl Target {
    pub fn v1(addr: SocketAddr, community: impl Into<Bytes>) -> Self {
        Self::community(addr, Version::V1, community)
    }

    pub fn v2c(addr: SocketAddr, community: impl Into<Bytes>) -> Self {
        Self::community(addr, Version::V2c, community)
    }

    fn community(addr: SocketAddr, version: Version, community: impl Into<Bytes>) -> Self {
        Self {
            addr,
            version,
            security: TargetSecurity::Community(community.into()),
            timeout: None,
            retry: None,
        }
    }

    pub fn v3(addr: SocketAddr, user: impl Into<Bytes>, level: SecurityLevel) -> Self {
        Self {
            addr,
            version: Version::V3,
            security: TargetSecurity::Usm {
                user: user.into(),
                level,
                context_name: Bytes::new(),
                context_engine_id: None,
            },
            timeout: None,
            retry: None,
        }
    }

    /// Set the v3 context name; ignored for community targets.
    pub fn context_name(mut self, name: impl Into<Bytes>) -> Self {
        if let TargetSecurity::Usm { context_name, .. } = &mut self.security {
            *context_name = name.into();
        }
        self
    }

    /// Pin the v3 context engine id; ignored for community targets.
    pub fn context_engine_id(mut self, engine_id: impl Into<Bytes>) -> Self {
        if let TargetSecurity::Usm { context_engine_id, .. } = &mut self.security {
            *context_engine_id = Some(engine_id.into());
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: impl Into<Retry>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    fn community_string(&self) -> Option<&Bytes> {
        match &self.security {
            TargetSecurity::Community(community) => Some(community),
            TargetSecurity::Usm { .. } => None,
        }
    }

    fn security_level(&self) -> SecurityLevel {
        match &self.security {
            TargetSecurity::Community(_) => SecurityLevel::NoAuthNoPriv,
            TargetSecurity::Usm { level, .. } => *level,
        }
    }
}

/// Builder for [`Dispatcher`].
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    processor: Option<MessageProcessor>,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Message processor holding the local engine, users, communities and
    /// access policy. Defaults to a processor with no users and void access.
    pub fn processor(mut self, processor: MessageProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: impl Into<Retry>) -> Self {
        self.config.retry = retry.into();
        self
    }

    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.config.notification_capacity = capacity.max(1);
        self
    }

    pub fn max_msg_size(mut self, size: usize) -> Self {
        self.config.max_msg_size = size;
        self
    }

    /// Start the dispatcher over `transport`.
    ///
    /// Spawns the receive loop, so this must run inside a tokio runtime.
    /// The returned receiver yields unsolicited TRAPs and INFORMs.
    pub fn build<T: Transport>(self, transport: T) -> (Dispatcher<T>, mpsc::Receiver<Notification>) {
        let (notify_tx, notify_rx) = mpsc::channel(self.config.notification_capacity);
        let inner = Arc::new(Inner {
            transport,
            processor: self.processor.unwrap_or_else(|| MessageProcessor::builder().build()),
            config: self.config,
            pending: Mutex::new(HashMap::new()),
            discoveries: Mutex::new(HashMap::new()),
            notify_tx,
            shutdown: CancellationToken::new(),
        });
        tracing::debug!(
            target: "snmp_engine::dispatcher",
            { snmp.local_addr = %inner.transport.local_addr() },
            "dispatcher started"
        );
        tokio::spawn(recv_loop(inner.clone()));
        (Dispatcher { inner }, notify_rx)
    }

    /// Bind a UDP transport and start the dispatcher on it.
    pub async fn bind(self, addr: SocketAddr) -> Result<(Dispatcher<UdpTransport>, mpsc::Receiver<Notification>)> {
        let transport = UdpTransport::bind(addr).await?;
        Ok(self.build(transport))
    }
}

/// Handle to an in-flight request.
///
/// Dropping the handle, or the future returned by
/// [`response`](Exchange::response), cancels the exchange.
#[derive(Debug)]
pub struct Exchange {
    request_id: i32,
    target: SocketAddr,
    reply: oneshot::Receiver<Result<Pdu>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl Exchange {
    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Cancel the exchange; a pending [`response`](Exchange::response)
    /// resolves with [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the response PDU.
    ///
    /// An agent error-status is not an error here; the PDU is returned as is.
    pub async fn response(self) -> Result<Pdu> {
        let Self { reply, _guard, .. } = self;
        reply.await.unwrap_or(Err(Error::Closed))
    }
}

/// Async SNMP request dispatcher. Cheap to clone.
pub struct Dispatcher<T: Transport = UdpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("local_addr", &self.inner.transport.local_addr())
            .field("pending", &self.pending_count())
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl Dispatcher<UdpTransport> {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn processor(&self) -> &MessageProcessor {
        &self.inner.processor
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Number of exchanges awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop the receive loop and resolve every pending exchange with
    /// [`Error::Closed`].
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::debug!(target: "snmp_engine::dispatcher", "dispatcher shutting down");
        }
        self.inner.shutdown.cancel();
        self.inner.close_pending();
    }

    /// Secure and send a confirmed request.
    ///
    /// The PDU's request-id is replaced by a freshly allocated one. Local
    /// failures (encoding, local access policy, discovery) are returned
    /// here; everything after the first transmission resolves through the
    /// returned [`Exchange`].
    #[instrument(
        level = "debug",
        skip(self, target, pdu),
        fields(snmp.target = %target.addr, snmp.request_id = tracing::field::Empty)
    )]
    pub async fn submit(&self, target: &Target, pdu: Pdu) -> Result<Exchange> {
        self.inner.ensure_open()?;
        if !pdu.pdu_type.is_confirmed() {
            return Err(Error::encode(EncodeErrorKind::UnsupportedPdu {
                version: target.version,
            }));
        }
        let (ctx, pinned) = self.security_context(target, pdu.pdu_type).await?;

        let request_id = self.inner.allocate_request_id();
        Span::current().record("snmp.request_id", request_id);
        let pdu = Pdu { request_id, ..pdu };
        let bytes = self.inner.processor.prepare_outgoing(target.version, pdu.clone(), &ctx)?;

        let purpose = Purpose::Request {
            pdu,
            ctx,
            context_pinned: pinned,
            resecured: false,
        };
        Ok(Inner::register(&self.inner, request_id, target, bytes, purpose))
    }

    /// Send a confirmed request and wait for its response.
    pub async fn send(&self, target: &Target, pdu: Pdu) -> Result<Pdu> {
        self.submit(target, pdu).await?.response().await
    }

    /// Send a request and return its varbinds, mapping a non-zero
    /// error-status to [`Error::Snmp`].
    pub async fn request(&self, target: &Target, pdu: Pdu) -> Result<Vec<VarBind>> {
        let response = self.send(target, pdu).await?;
        if response.is_error() {
            let index = response.error_index.max(0) as u32;
            return Err(Error::Snmp {
                target: Some(target.addr),
                status: response.error_status_enum(),
                index,
                oid: response.error_oid().cloned(),
            });
        }
        Ok(response.varbinds)
    }

    /// Learn the engine id, boots and time of the engine at `target`.
    ///
    /// Returns cached state when the address is already known. Concurrent
    /// calls for one address share a single probe.
    #[instrument(level = "debug", skip(self, target), fields(snmp.target = %target.addr))]
    pub async fn discover(&self, target: &Target) -> Result<EngineState> {
        Inner::discover(&self.inner, target).await
    }

    /// Security context for an outgoing PDU, and whether its context
    /// engine id was fixed by the target rather than by discovery.
    async fn security_context(&self, target: &Target, pdu_type: PduType) -> Result<(SecurityContext, bool)> {
        match &target.security {
            TargetSecurity::Community(community) => {
                let communities = self.inner.processor.communities();
                let name = communities
                    .get(community)
                    .map_or_else(|| community.clone(), |entry| entry.security_name.clone());
                Ok((SecurityContext::community(target.version.security_model(), name), true))
            }
            TargetSecurity::Usm {
                user,
                level,
                context_name,
                context_engine_id,
            } => {
                let ctx = SecurityContext::usm(user.clone(), *level).with_context_name(context_name.clone());
                if let Some(engine_id) = context_engine_id {
                    return Ok((ctx.with_context_engine_id(engine_id.clone()), true));
                }
                if !pdu_type.is_confirmed() {
                    return Ok((ctx, false));
                }
                let state = self.discover(target).await?;
                Ok((ctx.with_context_engine_id(state.engine_id), false))
            }
        }
    }
}

/// Why an exchange was registered.
#[derive(Debug)]
enum Purpose {
    Discovery,
    Request {
        pdu: Pdu,
        ctx: SecurityContext,
        context_pinned: bool,
        resecured: bool,
    },
}

#[derive(Debug)]
struct PendingExchange {
    target: SocketAddr,
    version: Version,
    community: Option<Bytes>,
    level: SecurityLevel,
    bytes: Bytes,
    purpose: Purpose,
    reply: oneshot::Sender<Result<Pdu>>,
    done: CancellationToken,
}

impl PendingExchange {
    /// Whether `incoming` may answer this exchange.
    fn accepts(&self, incoming: &Incoming, source: SocketAddr) -> bool {
        if source != self.target || incoming.version != self.version {
            return false;
        }
        if let Some(community) = &self.community
            && incoming.community.as_ref() != Some(community)
        {
            return false;
        }
        match incoming.pdu_type() {
            PduType::Report => true,
            _ => {
                incoming.context.security_level == self.level
                    && incoming.request_id() == incoming.correlation_id()
            }
        }
    }
}

/// What the receive loop does with a report for a pending exchange.
enum ReportAction {
    Resolve(Result<Pdu>),
    Resend(Bytes),
    Ignore,
}

struct Inner<T> {
    transport: T,
    processor: MessageProcessor,
    config: DispatcherConfig,
    pending: Mutex<HashMap<i32, PendingExchange>>,
    discoveries: Mutex<HashMap<SocketAddr, watch::Receiver<bool>>>,
    notify_tx: mpsc::Sender<Notification>,
    shutdown: CancellationToken,
}

/// Frees the discovery slot for an address.
///
/// Followers are woken with `true` once the probe finished, successfully or
/// not. If the probing caller is dropped first they see the channel close
/// and one of them probes again.
struct DiscoveryGuard<T: Transport> {
    inner: Arc<Inner<T>>,
    addr: SocketAddr,
    done: watch::Sender<bool>,
    finished: bool,
}

impl<T: Transport> Drop for DiscoveryGuard<T> {
    fn drop(&mut self) {
        self.inner
            .discoveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.addr);
        if self.finished {
            self.done.send_replace(true);
        }
    }
}

static NEXT_REQUEST_ID: LazyLock<AtomicI32> = LazyLock::new(|| AtomicI32::new(initial_request_id()));

fn initial_request_id() -> i32 {
    let mut seed = [0u8; 4];
    if getrandom::fill(&mut seed).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(1);
        seed = nanos.to_be_bytes();
    }
    (i32::from_be_bytes(seed) & i32::MAX).max(1)
}

impl<T: Transport> Inner<T> {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<i32, PendingExchange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Next positive request-id not held by a pending exchange.
    ///
    /// The counter is process-wide and wraps.
    fn allocate_request_id(&self) -> i32 {
        let pending = self.lock_pending();
        loop {
            let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed) & i32::MAX;
            if id != 0 && !pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn register(this: &Arc<Self>, request_id: i32, target: &Target, bytes: Bytes, purpose: Purpose) -> Exchange {
        let done = this.shutdown.child_token();
        let (reply_tx, reply_rx) = oneshot::channel();
        let level = match purpose {
            Purpose::Discovery => SecurityLevel::NoAuthNoPriv,
            Purpose::Request { .. } => target.security_level(),
        };
        this.lock_pending().insert(
            request_id,
            PendingExchange {
                target: target.addr,
                version: target.version,
                community: target.community_string().cloned(),
                level,
                bytes,
                purpose,
                reply: reply_tx,
                done: done.clone(),
            },
        );

        let timeout = target.timeout.unwrap_or(this.config.timeout);
        let retry = target.retry.clone().unwrap_or_else(|| this.config.retry.clone());
        tokio::spawn(retransmit(this.clone(), request_id, target.addr, timeout, retry, done.clone()));

        Exchange {
            request_id,
            target: target.addr,
            reply: reply_rx,
            cancel: done.clone(),
            _guard: done.drop_guard(),
        }
    }

    async fn discover(this: &Arc<Self>, target: &Target) -> Result<EngineState> {
        let engines = this.processor.engines();
        loop {
            if let Some(state) = engines.lookup_addr(target.addr) {
                return Ok(state);
            }
            this.ensure_open()?;

            let role = {
                let mut discoveries = this.discoveries.lock().unwrap_or_else(PoisonError::into_inner);
                match discoveries.get(&target.addr) {
                    Some(done) => Err(done.clone()),
                    None => {
                        let (tx, rx) = watch::channel(false);
                        discoveries.insert(target.addr, rx);
                        Ok(DiscoveryGuard {
                            inner: this.clone(),
                            addr: target.addr,
                            done: tx,
                            finished: false,
                        })
                    }
                }
            };

            match role {
                Ok(mut guard) => {
                    let result = Self::probe(this, target).await;
                    guard.finished = true;
                    return result;
                }
                Err(mut done) => {
                    tracing::trace!(target: "snmp_engine::dispatcher", { snmp.target = %target.addr }, "awaiting shared discovery");
                    if done.wait_for(|finished| *finished).await.is_ok() {
                        return engines
                            .lookup_addr(target.addr)
                            .ok_or(Error::UnknownEngineId {
                                target: Some(target.addr),
                            });
                    }
                    // The probing caller went away; take over.
                }
            }
        }
    }

    async fn probe(this: &Arc<Self>, target: &Target) -> Result<EngineState> {
        let request_id = this.allocate_request_id();
        let bytes = this.processor.prepare_discovery(request_id)?;
        tracing::debug!(
            target: "snmp_engine::dispatcher",
            { snmp.target = %target.addr, snmp.request_id = request_id },
            "probing engine"
        );
        Self::register(this, request_id, target, bytes, Purpose::Discovery)
            .response()
            .await?;
        this.processor
            .engines()
            .lookup_addr(target.addr)
            .ok_or(Error::UnknownEngineId {
                target: Some(target.addr),
            })
    }

    fn current_bytes(&self, request_id: i32) -> Option<Bytes> {
        self.lock_pending().get(&request_id).map(|p| p.bytes.clone())
    }

    /// Resolve and remove an exchange. Returns false if it was already gone.
    fn complete(&self, request_id: i32, result: Result<Pdu>) -> bool {
        let Some(entry) = self.lock_pending().remove(&request_id) else {
            return false;
        };
        let _ = entry.reply.send(result);
        entry.done.cancel();
        true
    }

    fn close_pending(&self) {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        for (_, entry) in drained {
            let _ = entry.reply.send(Err(Error::Closed));
            entry.done.cancel();
        }
    }

    async fn handle_datagram(this: &Arc<Self>, data: Bytes, source: SocketAddr) {
        match this.processor.process_incoming(data.clone(), Some(source)) {
            Err(err @ Error::NotInTimeWindow { .. }) => {
                tracing::debug!(target: "snmp_engine::dispatcher", { snmp.source = %source, error = %err }, "discarding datagram");
                Self::rediscover(this, &data, source);
            }
            Err(err) => {
                tracing::debug!(target: "snmp_engine::dispatcher", { snmp.source = %source, error = %err }, "discarding datagram");
            }
            Ok(ProcessOutcome::Respond(bytes)) => {
                if let Err(err) = this.transport.send_to(&bytes, source).await {
                    tracing::warn!(target: "snmp_engine::dispatcher", { snmp.target = %source, error = %err }, "failed to send reply");
                }
            }
            Ok(ProcessOutcome::Deliver(incoming)) if incoming.pdu_type().is_response_class() => {
                this.route_response(incoming, source).await;
            }
            Ok(ProcessOutcome::Deliver(incoming)) => this.handle_unsolicited(incoming, source).await,
        }
    }

    /// An authenticated message from `source` fell outside the cached time
    /// window of its engine, e.g. after the engine rebooted.
    ///
    /// Drops the cached clock so later messages resynchronize it, and starts
    /// a discovery for `source` unless one is already running.
    fn rediscover(this: &Arc<Self>, data: &Bytes, source: SocketAddr) {
        let engines = this.processor.engines();
        if let Ok(Message::V3(msg)) = Message::decode(data.clone())
            && let Ok(params) = UsmSecurityParams::decode(msg.security_params.clone())
        {
            engines.reset(&params.engine_id);
        }
        engines.forget_addr(source);

        let running = this
            .discoveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&source);
        if running || this.shutdown.is_cancelled() {
            return;
        }
        tracing::debug!(target: "snmp_engine::dispatcher", { snmp.target = %source }, "engine clock stale, rediscovering");
        let inner = this.clone();
        let target = Target::v3(source, Bytes::new(), SecurityLevel::NoAuthNoPriv);
        tokio::spawn(async move {
            if let Err(err) = Self::discover(&inner, &target).await {
                tracing::debug!(target: "snmp_engine::dispatcher", { snmp.target = %target.addr, error = %err }, "rediscovery failed");
            }
        });
    }

    async fn route_response(&self, incoming: Incoming, source: SocketAddr) {
        let Some(id) = incoming.correlation_id() else {
            return;
        };
        let Some(pdu) = incoming.pdu.as_pdu().cloned() else {
            return;
        };

        let action = {
            let mut pending = self.lock_pending();
            let Some(entry) = pending.get_mut(&id) else {
                tracing::debug!(
                    target: "snmp_engine::dispatcher",
                    { snmp.source = %source, snmp.request_id = id, pdu_type = %pdu.pdu_type },
                    "dropping unsolicited response"
                );
                return;
            };
            if !entry.accepts(&incoming, source) {
                tracing::debug!(
                    target: "snmp_engine::dispatcher",
                    { snmp.source = %source, snmp.request_id = id, version = %incoming.version, level = %incoming.context.security_level },
                    "response does not match pending request"
                );
                return;
            }
            match pdu.pdu_type {
                PduType::Report => self.on_report(entry, &incoming, pdu, source),
                _ => ReportAction::Resolve(Ok(pdu)),
            }
        };

        match action {
            ReportAction::Resolve(result) => {
                self.complete(id, result);
            }
            ReportAction::Resend(bytes) => {
                if let Err(err) = self.transport.send_to(&bytes, source).await {
                    self.complete(id, Err(err));
                }
            }
            ReportAction::Ignore => {}
        }
    }

    /// Decide on a report for `entry`; called with the pending table locked.
    fn on_report(&self, entry: &mut PendingExchange, incoming: &Incoming, pdu: Pdu, source: SocketAddr) -> ReportAction {
        let engines = self.processor.engines();
        let usm = incoming.usm.as_ref().filter(|usm| !usm.engine_id.is_empty());
        let kind = report_kind(&pdu);

        let Purpose::Request {
            pdu: request,
            ctx,
            context_pinned,
            resecured,
        } = &mut entry.purpose
        else {
            return match usm {
                Some(usm) => {
                    engines.learn(
                        Some(source),
                        EngineState::new(usm.engine_id.clone(), usm.engine_boots, usm.engine_time),
                    );
                    ReportAction::Resolve(Ok(pdu))
                }
                None => ReportAction::Resolve(Err(Error::UnknownEngineId { target: Some(source) })),
            };
        };

        // Boots/time in an unauthenticated notInTimeWindow report cannot be
        // trusted; leave the exchange to its retransmissions.
        if kind == Some(ReportKind::NotInTimeWindows) && !incoming.context.security_level.requires_auth() {
            tracing::debug!(
                target: "snmp_engine::dispatcher",
                { snmp.target = %source, snmp.request_id = request.request_id },
                "ignoring unauthenticated notInTimeWindow report"
            );
            return ReportAction::Ignore;
        }

        let recoverable = matches!(kind, Some(ReportKind::NotInTimeWindows | ReportKind::UnknownEngineIds));
        if let (true, false, Some(usm)) = (recoverable, *resecured, usm) {
            if kind == Some(ReportKind::NotInTimeWindows) {
                engines.resync(&usm.engine_id, usm.engine_boots, usm.engine_time);
            } else {
                engines.learn(
                    Some(source),
                    EngineState::new(usm.engine_id.clone(), usm.engine_boots, usm.engine_time),
                );
                if !*context_pinned {
                    ctx.context_engine_id = usm.engine_id.clone();
                }
            }
            tracing::debug!(
                target: "snmp_engine::dispatcher",
                { snmp.target = %source, snmp.request_id = request.request_id, report = ?kind },
                "resynchronized, resending request"
            );
            return match self.processor.prepare_outgoing(entry.version, request.clone(), ctx) {
                Ok(bytes) => {
                    *resecured = true;
                    entry.bytes = bytes.clone();
                    ReportAction::Resend(bytes)
                }
                Err(err) => ReportAction::Resolve(Err(err)),
            };
        }

        let err = match kind {
            Some(ReportKind::NotInTimeWindows) => Error::NotInTimeWindow { target: Some(source) },
            Some(ReportKind::UnknownEngineIds) => Error::UnknownEngineId { target: Some(source) },
            Some(kind) => Error::auth(Some(source), AuthErrorKind::Report(kind)),
            None => Error::Snmp {
                target: Some(source),
                status: ErrorStatus::GenErr,
                index: 0,
                oid: pdu.varbinds.first().map(|vb| vb.oid.clone()),
            },
        };
        tracing::debug!(target: "snmp_engine::dispatcher", { snmp.target = %source, error = %err }, "request failed with report");
        ReportAction::Resolve(Err(err))
    }
}

/// Retransmit until the exchange resolves or the retries run out.
#[instrument(
    level = "debug",
    skip(inner, retry, done),
    fields(snmp.attempt = tracing::field::Empty, snmp.elapsed_ms = tracing::field::Empty)
)]
async fn retransmit<T: Transport>(
    inner: Arc<Inner<T>>,
    request_id: i32,
    target: SocketAddr,
    timeout: Duration,
    retry: Retry,
    done: CancellationToken,
) {
    let start = Instant::now();
    for attempt in 0..=retry.max_retries {
        if attempt > 0 {
            let delay = retry.delay(attempt - 1);
            if !delay.is_zero() {
                tracing::debug!(target: "snmp_engine::dispatcher", { delay_ms = delay.as_millis() as u64 }, "backing off");
                tokio::select! {
                    _ = done.cancelled() => return abandon(&inner, request_id),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            tracing::debug!(target: "snmp_engine::dispatcher", "retransmitting request");
        }

        let Some(bytes) = inner.current_bytes(request_id) else {
            return;
        };
        Span::current().record("snmp.attempt", attempt);
        tracing::trace!(target: "snmp_engine::dispatcher", { snmp.bytes = bytes.len() }, "sending request");
        if let Err(err) = inner.transport.send_to(&bytes, target).await {
            inner.complete(request_id, Err(err));
            return;
        }

        tokio::select! {
            biased;
            _ = done.cancelled() => return abandon(&inner, request_id),
            _ = tokio::time::sleep(timeout) => {}
        }
    }

    let elapsed = start.elapsed();
    Span::current().record("snmp.elapsed_ms", elapsed.as_millis() as u64);
    let timed_out = inner.complete(
        request_id,
        Err(Error::Timeout {
            target: Some(target),
            elapsed,
            request_id,
            retries: retry.max_retries,
        }),
    );
    if timed_out {
        tracing::debug!(target: "snmp_engine::dispatcher", { ?elapsed, retries = retry.max_retries }, "request timed out");
    }
}

/// The exchange's token fired: it was resolved, cancelled or shut down.
fn abandon<T: Transport>(inner: &Inner<T>, request_id: i32) {
    let err = if inner.shutdown.is_cancelled() {
        Error::Closed
    } else {
        Error::Cancelled { request_id }
    };
    if inner.complete(request_id, Err(err)) {
        tracing::debug!(target: "snmp_engine::dispatcher", "request abandoned");
    }
}

async fn recv_loop<T: Transport>(inner: Arc<Inner<T>>) {
    let mut buf = vec![0u8; inner.config.max_msg_size];
    loop {
        let received = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            received = inner.transport.recv_from(&mut buf) => received,
        };
        match received {
            Ok((len, source)) => {
                tracing::trace!(target: "snmp_engine::dispatcher", { snmp.source = %source, snmp.bytes = len }, "received datagram");
                let data = Bytes::copy_from_slice(&buf[..len]);
                Inner::handle_datagram(&inner, data, source).await;
            }
            Err(Error::Closed) => break,
            Err(err) => {
                tracing::warn!(target: "snmp_engine::dispatcher", { error = %err }, "receive failed");
            }
        }
    }
    tracing::debug!(target: "snmp_engine::dispatcher", "receive loop stopped");
    inner.close_pending();
}
