// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log object (§3, §4.D): the in-memory handle bound to one log name.
//! Owns the metadata, the hash/sign context, the storage engine handle,
//! and the list of requests currently bound to this log (subscriptions,
//! in-flight commands). Reference-counted and shared through
//! [`crate::cache::Cache`].

use std::sync::{
    Arc, Weak,
    atomic::{AtomicI32, AtomicI64, Ordering},
};

use bitflags::bitflags;
use tokio::sync::Mutex;

use crate::{
    crypto::HashAlg,
    datum::{Datum, Strictness},
    error::{GdpError, GdpResult},
    metadata::{LogName, Metadata},
    request::Request,
    storage::{ReadOutcome, StorageEngine, Stats},
};

bitflags! {
    /// Log-object state bits (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogObjFlags: u16 {
        const IN_USE      = 0b0000_0001;
        const PENDING     = 0b0000_0010;
        const DROPPING    = 0b0000_0100;
        const SIGNING     = 0b0000_1000;
        const VERIFYING   = 0b0001_0000;
        const DEFER_FREE  = 0b0010_0000;
        const KEEP_LOCKED = 0b0100_0000;
        const IN_CACHE    = 0b1000_0000;
    }
}

/// The conflict/gap policy for recno-addressed appends (§6:
/// `swarm.gdplogd.sequencing.{allowgaps,allowdups}`). Kept out of the
/// storage engine per its own contract and enforced here instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequencingPolicy {
    pub allow_gaps: bool,
    pub allow_dups: bool,
}

pub struct LogObjectInner {
    pub metadata: Metadata,
    pub flags: LogObjFlags,
    pub requests: Vec<Weak<Request>>,
}

/// One per distinct log name currently of interest (§3).
pub struct LogObject {
    pub name: LogName,
    pub hash_alg: HashAlg,
    pub nrecs: AtomicI64,
    pub refcnt: AtomicI32,
    pub storage: Arc<dyn StorageEngine>,
    pub strictness: Strictness,
    pub policy: SequencingPolicy,
    pub inner: Mutex<LogObjectInner>,
}

impl LogObject {
    /// Allocate a fresh, `PENDING`, zero-refcount object (§4.D `new`). Not
    /// yet inserted into any cache.
    pub fn new_pending(
        name: LogName,
        hash_alg: HashAlg,
        storage: Arc<dyn StorageEngine>,
        strictness: Strictness,
        policy: SequencingPolicy,
    ) -> Arc<Self> {
        Arc::new(LogObject {
            name,
            hash_alg,
            nrecs: AtomicI64::new(0),
            refcnt: AtomicI32::new(0),
            storage,
            strictness,
            policy,
            inner: Mutex::new(LogObjectInner {
                metadata: Metadata::new(0),
                flags: LogObjFlags::PENDING,
                requests: Vec::new(),
            }),
        })
    }

    /// Finish populating a pending object from its opened storage engine
    /// and clear `PENDING`, publishing it for other readers of the cache.
    pub async fn publish(self: &Arc<Self>, metadata: Metadata, nrecs: i64) {
        let mut inner = self.inner.lock().await;
        inner.metadata = metadata;
        inner.flags.remove(LogObjFlags::PENDING);
        inner.flags.insert(LogObjFlags::IN_USE);
        self.nrecs.store(nrecs, Ordering::Release);
    }

    pub fn incref(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` if this was the last reference and `DEFER_FREE` was
    /// not set — caller should then remove the object from the cache.
    pub async fn decref(&self) -> bool {
        let prev = self.refcnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "log object refcount underflow");
        if prev != 1 {
            return false;
        }
        let inner = self.inner.lock().await;
        !inner.flags.contains(LogObjFlags::DEFER_FREE)
    }

    pub async fn bind_request(&self, req: &Arc<Request>) {
        let mut inner = self.inner.lock().await;
        inner.requests.push(Arc::downgrade(req));
    }

    pub async fn unbind_request(&self, req: &Arc<Request>) {
        let mut inner = self.inner.lock().await;
        inner
            .requests
            .retain(|w| w.upgrade().is_none_or(|r| !Arc::ptr_eq(&r, req)));
    }

    /// Snapshot of requests still alive, pruning dead weak refs.
    pub async fn live_requests(&self) -> Vec<Arc<Request>> {
        let mut inner = self.inner.lock().await;
        let mut alive = Vec::with_capacity(inner.requests.len());
        inner.requests.retain(|w| match w.upgrade() {
            Some(r) => {
                alive.push(r);
                true
            },
            None => false,
        });
        alive
    }

    /// Append a client-provided datum, applying the recno conflict/gap
    /// policy (§8 boundary behavior: "Append with `recno` equal to an
    /// existing recno") before delegating to the storage engine.
    pub async fn append(&self, mut datum: Datum) -> GdpResult<i64> {
        let nrecs = self.nrecs.load(Ordering::Acquire);
        let target_recno = if datum.recno > 0 { datum.recno } else { nrecs + 1 };

        if target_recno <= nrecs {
            let existing_hash = self.storage.hash_at_recno(target_recno)?;
            let md = self.metadata_snapshot().await;
            let incoming_hash = datum.hash(&self.name, &md, self.hash_alg);
            match existing_hash {
                Some(h) if h == incoming_hash => {
                    // identical record, silently accepted (§8 duplicate detection)
                    return Ok(target_recno);
                },
                Some(_) if !self.policy.allow_dups => {
                    return Err(GdpError::RecnoSeqError);
                },
                _ => {},
            }
        } else if target_recno > nrecs + 1 && !self.policy.allow_gaps {
            return Err(GdpError::RecnoSeqError);
        }

        datum.recno = target_recno;

        // Verify against exactly the fields the writer signed (its own
        // recno/ts/prev_hash, not the server's) before either gets
        // overwritten below, per §4.A writer-side strictness.
        let md = self.metadata_snapshot().await;
        self.verify_append(&datum, &md)?;

        datum.ts = crate::datum::Timestamp::now();
        datum.prev_hash = if target_recno == 1 {
            self.name.0
        } else {
            self.storage
                .hash_at_recno(target_recno - 1)?
                .ok_or(GdpError::RecnoSeqError)?
        };

        self.storage.append(&datum)?;
        self.nrecs.fetch_max(target_recno, Ordering::AcqRel);
        Ok(target_recno)
    }

    /// Enforce `self.strictness` on an about-to-be-committed datum (§4.A:
    /// "writer-side strictness can force the server to reject unsigned or
    /// unverifiable records"). The writer pubkey, if any, comes from the
    /// log's own metadata.
    fn verify_append(&self, datum: &Datum, md: &Metadata) -> GdpResult<()> {
        let pubkey = md
            .find(crate::metadata::tag::WRITER_PUBKEY)
            .map(Metadata::decode_pubkey_entry)
            .transpose()?
            .map(|(_, _, _, pk)| pk);
        datum.verify(&self.name, md, self.hash_alg, pubkey.as_ref(), self.strictness)
    }

    pub fn read_by_recno(
        &self,
        start: i64,
        max_recs: i64,
        cb: &mut dyn FnMut(Datum) -> GdpResult<()>,
    ) -> GdpResult<ReadOutcome> {
        if start == 0 {
            // recno 0 is the metadata record; surface NotFound per the
            // "or NotFound depending on API variant" boundary note (§8).
            return Ok(ReadOutcome::NotFound);
        }
        if start > self.nrecs.load(Ordering::Acquire) {
            return Ok(ReadOutcome::NotFound);
        }
        self.storage.read_by_recno(start, max_recs, cb)
    }

    pub fn read_by_timestamp(
        &self,
        since_sec: i64,
        since_nsec: i32,
        max_recs: i64,
        cb: &mut dyn FnMut(Datum) -> GdpResult<()>,
    ) -> GdpResult<ReadOutcome> {
        self.storage
            .read_by_timestamp(since_sec, since_nsec, max_recs, cb)
    }

    pub fn read_by_hash(&self, hash: &crate::crypto::Hash) -> GdpResult<Option<Datum>> {
        self.storage.read_by_hash(hash)
    }

    pub async fn metadata_snapshot(&self) -> Metadata {
        self.inner.lock().await.metadata.clone()
    }

    pub fn get_stats(&self) -> GdpResult<Stats> {
        self.storage.get_stats()
    }

    pub fn max_recno(&self) -> i64 {
        self.nrecs.load(Ordering::Acquire)
    }
}
