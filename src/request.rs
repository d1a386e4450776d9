// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request layer (§4.F): one [`Request`] per in-flight command or
//! standing subscription. Allocation is `Arc`-based rather than a
//! process-wide free list (§9 Design Notes explicitly sanctions either
//! an arena+index or an `Arc`/`Weak` ownership model — a request is
//! reclaimed the moment its last strong ref, held by the invoker's
//! stack, the channel's live-request table, or the log's request list,
//! drops).

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicI64, AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use bitflags::bitflags;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::{
    cache::Cache,
    channel::Channel,
    error::{GdpError, GdpResult},
    event::{ActiveQueue, PendingQueue},
    logobj::{LogObjFlags, LogObject},
    metadata::LogName,
    pdu::{Ack, Command, Nak, Pdu, PduBody},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Free,
    Active,
    Waiting,
    Idle,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestFlags: u16 {
        const PERSISTENT          = 0b0000_0001;
        const CLIENT_SUBSCR       = 0b0000_0010;
        const SERVER_SUBSCR       = 0b0000_0100;
        const ASYNC_IO            = 0b0000_1000;
        const ON_LOG_LIST         = 0b0001_0000;
        const ON_CHANNEL_LIST     = 0b0010_0000;
        const VERIFY_CONTENT      = 0b0100_0000;
        const ROUTEFAIL_IS_FATAL  = 0b1000_0000;
    }
}

/// `rid` sentinel meaning "no request id assigned" (unacknowledged
/// commands don't need correlation).
pub const RID_NONE: u32 = 0;
/// Reserved "any" sentinel skipped by the rid generator on wraparound.
const RID_ANY: u32 = u32::MAX;
/// How long the maturity timer sleeps when the pending queue is empty,
/// before checking again for a newly inserted event.
const MATURITY_IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct RidGenerator(AtomicU32);

impl RidGenerator {
    pub fn next(&self) -> u32 {
        loop {
            let v = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if v != RID_NONE && v != RID_ANY {
                return v;
            }
        }
    }
}

pub struct Request {
    pub log: Option<Arc<LogObject>>,
    pub flags: RequestFlags,
    pub rid: Option<u32>,
    pub cmd: Pdu,
    pub response: Mutex<Option<Pdu>>,
    pub state: Mutex<RequestState>,
    pub next_recno: AtomicI64,
    pub remaining: AtomicI64,
    pub done: Notify,
    pub pending: Mutex<PendingQueue>,
}

impl Request {
    pub fn new(
        log: Option<Arc<LogObject>>,
        cmd_body: PduBody,
        src: LogName,
        dst: LogName,
        l4_seqno: u32,
        flags: RequestFlags,
        rid_gen: &RidGenerator,
        active: &ActiveQueue,
    ) -> Arc<Self> {
        let needs_rid = flags.contains(RequestFlags::PERSISTENT) || matches!(cmd_body, PduBody::Command(_));
        let rid = if needs_rid { Some(rid_gen.next()) } else { None };
        let cmd = Pdu {
            src,
            dst,
            l4_seqno,
            rid,
            l5_seqno: None,
            body: cmd_body,
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let notify = active.notify_handle();
        let pending = PendingQueue::new(tx, notify);
        let req = Arc::new(Request {
            log,
            flags,
            rid,
            cmd,
            response: Mutex::new(None),
            state: Mutex::new(RequestState::Active),
            next_recno: AtomicI64::new(0),
            remaining: AtomicI64::new(-1),
            done: Notify::new(),
            pending: Mutex::new(pending),
        });
        // The pending queue's internal channel feeds promoted events to
        // whoever drains `rx`; callers that care about ordered delivery
        // pull from here instead of discarding, but a request with no
        // subscriber (the common command/response case) just lets them
        // drop.
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        // Maturity timer (§4.I): `insert` already promotes synchronously,
        // but an event sitting alone in the queue past its maturity
        // deadline with no further insert to trigger a re-check would
        // otherwise wait forever. Holds only a `Weak` ref so it exits once
        // the request itself is dropped.
        let weak_req = Arc::downgrade(&req);
        tokio::spawn(async move {
            loop {
                let Some(req) = weak_req.upgrade() else { break };
                let deadline = req.pending.lock().await.earliest_maturity();
                drop(req);
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
                    None => tokio::time::sleep(MATURITY_IDLE_POLL).await,
                }
                let Some(req) = weak_req.upgrade() else { break };
                req.pending.lock().await.promote(Instant::now());
            }
        });
        req
    }

    /// Synchronous round-trip (§4.F `invoke`): send, wait for `DONE` with
    /// an absolute timeout, retrying on timeout or
    /// `NakRouterNoRoute` while retries remain.
    pub async fn invoke(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
        timeout: Duration,
        retries: u32,
        retry_delay: Duration,
    ) -> GdpResult<Pdu> {
        let mut attempts_left = retries;
        loop {
            channel
                .send(self.cmd.src, self.cmd.dst, self.cmd.encode(), 0)
                .await?;
            *self.state.lock().await = RequestState::Waiting;

            let outcome = tokio::time::timeout(timeout, self.done.notified()).await;
            *self.state.lock().await = RequestState::Active;

            match outcome {
                Ok(()) => {
                    let response = self.response.lock().await.clone();
                    match response {
                        Some(pdu) => {
                            if let PduBody::Nak(Nak::RouterNoRoute) = &pdu.body {
                                if attempts_left > 0 && !self.flags.contains(RequestFlags::ROUTEFAIL_IS_FATAL) {
                                    attempts_left -= 1;
                                    tokio::time::sleep(retry_delay).await;
                                    continue;
                                }
                                return Err(GdpError::NoRoute);
                            }
                            return Ok(pdu);
                        },
                        None => return Err(GdpError::InvokeTimeout),
                    }
                },
                Err(_elapsed) => {
                    if attempts_left == 0 {
                        return Err(GdpError::InvokeTimeout);
                    }
                    attempts_left -= 1;
                    warn!(rid = ?self.rid, "invoke timed out, retrying");
                    tokio::time::sleep(retry_delay).await;
                },
            }
        }
    }

    /// Deliver a matched response PDU to a waiting `invoke` (client
    /// dispatch, §4.F), applying the ack/nak adoption rules. `cache` lets
    /// the `Ack::Success` arm rebind a still-`PENDING` log from its
    /// placeholder name to the self-certifying name the server assigned.
    pub async fn deliver_response(self: &Arc<Self>, pdu: Pdu, cache: &Cache) {
        self.adopt_state(&pdu, cache).await;
        *self.response.lock().await = Some(pdu);
        self.done.notify_waiters();
    }

    async fn adopt_state(&self, pdu: &Pdu, cache: &Cache) {
        match &pdu.body {
            PduBody::Ack(Ack::Success { .. }) => {
                if let Some(log) = &self.log {
                    let pending = log.inner.lock().await.flags.contains(LogObjFlags::PENDING);
                    if pending {
                        cache.change_name(log.name, pdu.src).await;
                    }
                }
            },
            PduBody::Ack(Ack::Changed { recno }) => {
                if let Some(log) = &self.log {
                    log.nrecs.fetch_max(*recno, Ordering::AcqRel);
                }
            },
            PduBody::Ack(Ack::Content { datums }) => {
                if let Some(last) = datums.last() {
                    self.next_recno.store(last.recno + 1, Ordering::Release);
                }
                if self.remaining.load(Ordering::Acquire) > 0 {
                    self.remaining.fetch_sub(datums.len() as i64, Ordering::AcqRel);
                }
            },
            PduBody::Ack(Ack::EndOfResults { nresults, .. }) => {
                if let Some(n) = nresults {
                    debug!(nresults = n, "end of results");
                }
            },
            PduBody::Nak(Nak::Conflict { recno }) => {
                if let Some(log) = &self.log {
                    log.nrecs.store(*recno, Ordering::Release);
                }
            },
            _ => {},
        }
    }
}

/// Correlates responses to requests by `(src, dst, rid)` (§4.F client
/// dispatch), including the channel-wide fallback used when the
/// original command addressed a placeholder name later rebound.
#[derive(Default)]
pub struct RequestTable {
    by_rid: DashMap<(LogName, LogName, u32), Arc<Request>>,
}

impl RequestTable {
    pub fn new() -> Self {
        RequestTable::default()
    }

    pub fn insert(&self, req: Arc<Request>) {
        if let Some(rid) = req.rid {
            self.by_rid.insert((req.cmd.src, req.cmd.dst, rid), req);
        }
    }

    pub fn remove(&self, src: LogName, dst: LogName, rid: u32) -> Option<Arc<Request>> {
        self.by_rid.remove(&(src, dst, rid)).map(|(_, v)| v)
    }

    /// Match an incoming response: exact `(src,dst,rid)` first, then a
    /// channel-wide scan by `(src,rid)` ignoring `dst` (the rebind
    /// fallback named in §4.F).
    pub fn find(&self, pdu: &Pdu) -> Option<Arc<Request>> {
        let rid = pdu.rid?;
        if let Some(req) = self.by_rid.get(&(pdu.dst, pdu.src, rid)) {
            return Some(req.clone());
        }
        self.by_rid
            .iter()
            .find(|e| e.key().2 == rid && e.key().1 == pdu.src)
            .map(|e| e.value().clone())
    }
}

/// Per-command-code server dispatch table (§4.F server dispatch, §9
/// "dynamic dispatch through function tables ... trait objects").
pub type Handler = Arc<dyn Fn(Arc<Request>) -> GdpResult<Pdu> + Send + Sync>;

#[derive(Default)]
pub struct DispatchTable {
    handlers: DashMap<u8, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        DispatchTable::default()
    }

    pub fn register(&self, code: u8, handler: Handler) {
        self.handlers.insert(code, handler);
    }

    /// `Create` is serialized process-wide (§4.F); callers should check
    /// [`Command::code`] equals the `Create` code and take the
    /// process-wide creation lock before dispatching. This table itself
    /// has no opinion on threading — it is consulted the same way
    /// regardless of whether the caller runs it on a worker thread.
    pub fn dispatch(&self, code: u8, req: Arc<Request>) -> GdpResult<Pdu> {
        match self.handlers.get(&code) {
            Some(h) => h(req),
            None => Err(GdpError::ProtocolFail),
        }
    }
}

pub fn is_create(cmd: &Command) -> bool {
    matches!(cmd, Command::Create { .. })
}
