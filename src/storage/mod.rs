// SPDX-License-Identifier: AGPL-3.0-or-later

//! Storage engine contract (§4.C): a per-log, append-only container
//! holding the metadata record and data records, indexed by recno,
//! timestamp, and content hash.
//!
//! The engine itself is synchronous (sqlite has no async story worth
//! having); callers from the async request/dispatch layer run engine
//! calls on a blocking thread (see [`crate::logobj::LogObject::append`]
//! and friends) exactly the way the original C code never held the
//! per-log RW lock across network I/O (§5).

pub mod sqlite;

use crate::{datum::Datum, error::GdpResult, metadata::Metadata};

/// Outcome of a ranged read, matching §4.C's three-way contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Zero rows matched the range at all.
    NotFound,
    /// At least one row matched and the range is now exhausted.
    EndOfResults,
    /// `n` rows matched but the range is not yet exhausted (more could be
    /// read from the next starting point).
    More(u64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub nrecs: i64,
    pub bytes: i64,
}

/// Per-log on-disk storage contract. Implemented once, by
/// [`sqlite::SqliteStore`]; kept as a trait object per Design Notes §9
/// ("dynamic dispatch through function tables ... should become trait
/// objects").
pub trait StorageEngine: Send + Sync {
    /// Highest recno committed (`nrecs` of §3).
    fn max_recno(&self) -> i64;

    fn append(&self, datum: &Datum) -> GdpResult<()>;

    /// Begin/commit/abort a transaction wrapping one or more appends
    /// (§4.C). Implementations that are always-transactional per-call may
    /// treat `xact_begin`/`xact_end` as no-ops; `SqliteStore` uses a real
    /// `SAVEPOINT`.
    fn xact_begin(&self) -> GdpResult<()>;
    fn xact_end(&self) -> GdpResult<()>;
    fn xact_abort(&self) -> GdpResult<()>;

    /// Read up to `max_recs` records starting at `start`, in ascending
    /// recno order, invoking `cb` once per record. `max_recs == 0` means
    /// "read exactly one record at `start`" (§4.C).
    ///
    /// Negative `start` is interpreted as `nrecs + start + 1`, clamped to
    /// `>= 1` (§8 boundary behavior).
    fn read_by_recno(
        &self,
        start: i64,
        max_recs: i64,
        cb: &mut dyn FnMut(Datum) -> GdpResult<()>,
    ) -> GdpResult<ReadOutcome>;

    /// Read records with `ts >= since`, ascending by timestamp and, for
    /// ties, ascending by recno (§9 Open Questions, third bullet).
    fn read_by_timestamp(
        &self,
        since_sec: i64,
        since_nsec: i32,
        max_recs: i64,
        cb: &mut dyn FnMut(Datum) -> GdpResult<()>,
    ) -> GdpResult<ReadOutcome>;

    /// At most one match, by content hash.
    fn read_by_hash(&self, hash: &[u8; 32]) -> GdpResult<Option<Datum>>;

    fn get_metadata(&self) -> GdpResult<Metadata>;

    fn recno_exists(&self, recno: i64) -> GdpResult<bool>;

    /// If `recno` exists, return the hash recorded for it (used by the
    /// gap/conflict policy in [`crate::logobj`] to compare against an
    /// incoming append with the same recno).
    fn hash_at_recno(&self, recno: i64) -> GdpResult<Option<[u8; 32]>>;

    fn get_stats(&self) -> GdpResult<Stats>;

    fn close(&self) -> GdpResult<()>;
}
