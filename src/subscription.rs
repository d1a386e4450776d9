// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriptions (§4.G): a standing request that receives every datum
//! appended to a log from some starting point onward, plus
//! server-side fan-out and lease expiry.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    channel::Channel,
    error::GdpResult,
    event::{ActiveQueue, Event},
    logobj::LogObject,
    metadata::LogName,
    pdu::{Ack, Pdu, PduBody},
    request::{Request, RequestFlags, RequestTable},
};

/// Default subscription lease (§6
/// `swarm.gdplogd.subscr.timeout`); a client poke before this elapses
/// keeps the subscription alive.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// One server-side subscriber bound to a log (§4.G server fan-out).
pub struct Subscriber {
    pub request: Arc<Request>,
    pub next_recno: std::sync::atomic::AtomicI64,
    /// Records left to deliver, or `None` for an unbounded subscription
    /// (§4.G `numrecs`). Decremented as each record is delivered; the
    /// subscription auto-terminates once this reaches zero.
    pub remaining: Option<std::sync::atomic::AtomicI64>,
    pub expires_at: Mutex<Instant>,
    pub lease: Duration,
}

impl Subscriber {
    pub fn new(request: Arc<Request>, start_recno: i64, remaining: Option<i64>, lease: Duration) -> Self {
        Subscriber {
            request,
            next_recno: std::sync::atomic::AtomicI64::new(start_recno),
            remaining: remaining.map(std::sync::atomic::AtomicI64::new),
            expires_at: Mutex::new(Instant::now() + lease),
            lease,
        }
    }

    pub async fn renew(&self) {
        *self.expires_at.lock().await = Instant::now() + self.lease;
    }

    pub async fn expired(&self, now: Instant) -> bool {
        now >= *self.expires_at.lock().await
    }
}

/// Server-side per-log subscriber set (§4.G: "the list of requests
/// bound to a log", specialized to the subscribing subset).
#[derive(Default)]
pub struct SubscriptionTable {
    by_log: DashMap<LogName, Vec<Arc<Subscriber>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        SubscriptionTable::default()
    }

    pub fn add(&self, name: LogName, sub: Arc<Subscriber>) {
        self.by_log.entry(name).or_default().push(sub);
    }

    pub fn remove(&self, name: LogName, rid: Option<u32>) {
        if let Some(mut subs) = self.by_log.get_mut(&name) {
            subs.retain(|s| s.request.rid != rid);
        }
    }

    /// Fan out a newly-appended datum to every subscriber on `name`
    /// whose next expected recno has arrived, delivering through the
    /// subscriber's own channel as an unsolicited `Ack::Content`
    /// (§4.G: "delivery reuses the ack path, correlated by the
    /// subscription's `rid`"). A bounded subscription (`numrecs > 0`)
    /// is sent `Ack::EndOfResults` and dropped once its count is
    /// exhausted.
    pub async fn notify_append(&self, name: LogName, log: &Arc<LogObject>, channel: &Arc<dyn Channel>) {
        let mut exhausted = Vec::new();
        {
            let Some(subs) = self.by_log.get(&name) else { return };
            for sub in subs.iter() {
                let recno = sub.next_recno.load(std::sync::atomic::Ordering::Acquire);
                if recno > log.max_recno() {
                    continue;
                }
                let mut datums = Vec::new();
                let _ = log.read_by_recno(recno, 1, &mut |d| {
                    datums.push(d);
                    Ok(())
                });
                let Some(datum) = datums.into_iter().next() else { continue };
                sub.next_recno.store(recno + 1, std::sync::atomic::Ordering::Release);

                let pdu = Pdu {
                    src: name,
                    dst: sub.request.cmd.src,
                    l4_seqno: 0,
                    rid: sub.request.rid,
                    l5_seqno: Some(recno as u16),
                    body: PduBody::Ack(Ack::Content { datums: vec![datum] }),
                };
                if let Err(e) = channel.send(pdu.src, pdu.dst, pdu.encode(), 0).await {
                    warn!(error = %e, ?name, "subscription delivery failed");
                    continue;
                }

                if let Some(remaining) = &sub.remaining {
                    if remaining.fetch_sub(1, std::sync::atomic::Ordering::AcqRel) <= 1 {
                        exhausted.push(sub.clone());
                    }
                }
            }
        }

        for sub in exhausted {
            let eor = Pdu {
                src: name,
                dst: sub.request.cmd.src,
                l4_seqno: 0,
                rid: sub.request.rid,
                l5_seqno: None,
                body: PduBody::Ack(Ack::EndOfResults { nresults: None, ep_stat: None }),
            };
            if let Err(e) = channel.send(eor.src, eor.dst, eor.encode(), 0).await {
                warn!(error = %e, ?name, "end-of-results delivery failed");
            }
            self.remove(name, sub.request.rid);
        }
    }

    /// Idle sweep (§4.G `reclaim_subscriptions`): drop subscribers whose
    /// lease has lapsed without a poke.
    pub async fn reclaim(&self) -> usize {
        let now = Instant::now();
        let mut reclaimed = 0;
        for mut entry in self.by_log.iter_mut() {
            let mut kept = Vec::with_capacity(entry.value().len());
            for sub in entry.value().drain(..) {
                if sub.expired(now).await {
                    reclaimed += 1;
                    debug!(rid = ?sub.request.rid, "subscription lease expired");
                } else {
                    kept.push(sub);
                }
            }
            *entry.value_mut() = kept;
        }
        reclaimed
    }
}

/// Client-side handle to a standing subscription (§4.G client side):
/// periodically pokes the server before the lease expires and can be
/// explicitly cancelled.
pub struct SubscriptionHandle {
    pub request: Arc<Request>,
    poke_task: Option<tokio::task::JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn spawn_poker(
        request: Arc<Request>,
        channel: Arc<dyn Channel>,
        interval: Duration,
    ) -> Self {
        let poke_request = request.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !poke_request.flags.contains(RequestFlags::CLIENT_SUBSCR) {
                    break;
                }
                if let Err(e) = channel
                    .send(poke_request.cmd.src, poke_request.cmd.dst, poke_request.cmd.encode(), 0)
                    .await
                {
                    warn!(error = %e, "subscription poke failed");
                }
            }
        });
        SubscriptionHandle {
            request,
            poke_task: Some(handle),
        }
    }

    pub async fn unsubscribe(mut self, table: &RequestTable) {
        if let Some(task) = self.poke_task.take() {
            task.abort();
        }
        table.remove(self.request.cmd.src, self.request.cmd.dst, self.request.rid.unwrap_or(0));
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.poke_task.take() {
            task.abort();
        }
    }
}

/// Deliver a received `Ack::Content`/`Ack::EndOfResults` to the active
/// queue as an ordered [`Event`] (§4.I integration point for
/// subscriptions and long-running reads alike).
pub async fn deliver_to_active_queue(active: &ActiveQueue, pdu: &Pdu) {
    match &pdu.body {
        PduBody::Ack(Ack::Content { datums }) => {
            for datum in datums {
                let event = Event::data(datum.clone(), pdu.l5_seqno.unwrap_or(0), Instant::now());
                active.push(event).await;
            }
        },
        PduBody::Ack(Ack::EndOfResults { .. }) => {
            active.push(Event::done(None, Instant::now())).await;
        },
        _ => {},
    }
}
