// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-backed implementation of [`super::StorageEngine`] (§4.C, §6).
//!
//! Schema: one table, `records`, keyed by content `hash` (duplicate
//! insert on the same hash is silently ignored — the idempotent-append
//! semantics of §4.C), with secondary indices on `recno` and `ts`. The
//! metadata record lives in the same table at `recno = 0`. Header stamps
//! (`application_id` / `user_version`) are sqlite's own pragmas of the
//! same name, which is exactly what they're for.
//!
//! Readers and the writer share one physical connection (serialized by
//! `conn`); `lock` is the reader/writer gate described in §4.C/§5 — kept
//! as a distinct lock (rather than folded into `conn`) so a future
//! multi-connection (WAL, separate reader handles) implementation can
//! grow into real concurrent reads without an API change.

use std::{
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicI64, Ordering},
    },
};

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::RwLock;

use super::{ReadOutcome, Stats, StorageEngine};
use crate::{
    datum::{Datum, Timestamp},
    error::{GdpError, GdpResult},
    metadata::{LogName, Metadata},
};

/// Identifies the GDP log file format family (arbitrary fixed constant).
const APPLICATION_ID: i32 = 0x47_44_50_31; // "GDP1"
const USER_VERSION: i32 = 1;

/// Tunable pragmas (§6: `swarm.gdplogd.sqlite.pragma.*`).
#[derive(Debug, Clone)]
pub struct PragmaConfig {
    pub synchronous: String,
    pub journal_mode: String,
    pub page_size: i64,
    pub cache_size: i64,
    pub journal_size_limit: i64,
    pub busy_timeout_ms: i64,
    pub temp_store: String,
    pub locking_mode: String,
}

impl Default for PragmaConfig {
    fn default() -> Self {
        PragmaConfig {
            synchronous: "NORMAL".into(),
            journal_mode: "WAL".into(),
            page_size: 4096,
            cache_size: -2000,
            journal_size_limit: 67_108_864,
            busy_timeout_ms: 5000,
            temp_store: "MEMORY".into(),
            locking_mode: "NORMAL".into(),
        }
    }
}

fn apply_pragmas(conn: &Connection, cfg: &PragmaConfig) -> GdpResult<()> {
    conn.pragma_update(None, "synchronous", &cfg.synchronous)?;
    conn.pragma_update(None, "journal_mode", &cfg.journal_mode)?;
    conn.pragma_update(None, "page_size", cfg.page_size)?;
    conn.pragma_update(None, "cache_size", cfg.cache_size)?;
    conn.pragma_update(None, "journal_size_limit", cfg.journal_size_limit)?;
    conn.busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms as u64))?;
    conn.pragma_update(None, "temp_store", &cfg.temp_store)?;
    conn.pragma_update(None, "locking_mode", &cfg.locking_mode)?;
    Ok(())
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    hash        BLOB PRIMARY KEY,
    recno       INTEGER NOT NULL,
    ts_sec      INTEGER NOT NULL,
    ts_nsec     INTEGER NOT NULL,
    ts_accuracy REAL NOT NULL,
    prev_hash   BLOB NOT NULL,
    payload     BLOB NOT NULL,
    sig         BLOB
);
CREATE UNIQUE INDEX IF NOT EXISTS records_by_recno ON records(recno);
CREATE INDEX IF NOT EXISTS records_by_ts ON records(ts_sec, ts_nsec, recno);
";

/// Sharded on-disk path for a log: `<root>/<first-byte-hex>/<printable-name>.gdplog`.
pub fn path_for(root: &Path, name: &LogName) -> PathBuf {
    let shard = format!("{:02x}", name.shard_byte());
    root.join(shard).join(format!("{}.gdplog", name.printable()))
}

pub struct SqliteStore {
    lock: RwLock<()>,
    conn: Mutex<Connection>,
    nrecs: AtomicI64,
    path: PathBuf,
}

impl SqliteStore {
    /// Create a brand-new log file. Fails [`GdpError::RecordDuplicated`]-free
    /// "Conflict" (mapped to [`GdpError::NameInvalid`] upstream via the
    /// dispatcher) if the file already exists.
    pub fn create(
        root: &Path,
        name: &LogName,
        metadata: &Metadata,
        pragmas: &PragmaConfig,
    ) -> GdpResult<Self> {
        let path = path_for(root, name);
        if path.exists() {
            return Err(GdpError::RecordDuplicated);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GdpError::PhysioError(e.to_string()))?;
        }
        let conn = Connection::open(&path)?;
        apply_pragmas(&conn, pragmas)?;
        conn.pragma_update(None, "application_id", APPLICATION_ID)?;
        conn.pragma_update(None, "user_version", USER_VERSION)?;
        conn.execute_batch(SCHEMA)?;

        let md_bytes = metadata.serialize();
        let name_bytes = name.0;
        conn.execute(
            "INSERT INTO records (hash, recno, ts_sec, ts_nsec, ts_accuracy, prev_hash, \
             payload, sig) VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![
                name_bytes.as_slice(),
                0i64,
                0i32,
                0f32,
                [0u8; 32].as_slice(),
                md_bytes,
            ],
        )?;

        Ok(SqliteStore {
            lock: RwLock::new(()),
            conn: Mutex::new(conn),
            nrecs: AtomicI64::new(0),
            path,
        })
    }

    /// Open an existing log file, validating its header stamps.
    pub fn open(root: &Path, name: &LogName, pragmas: &PragmaConfig) -> GdpResult<Self> {
        let path = path_for(root, name);
        if !path.exists() {
            return Err(GdpError::NotFound);
        }
        let conn = Connection::open(&path)?;
        apply_pragmas(&conn, pragmas)?;

        let app_id: i32 = conn.pragma_query_value(None, "application_id", |r| r.get(0))?;
        if app_id != APPLICATION_ID {
            return Err(GdpError::CorruptLog);
        }
        let version: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
        if version != USER_VERSION {
            return Err(GdpError::LogVersionMismatch);
        }

        let nrecs: i64 = conn
            .query_row("SELECT COALESCE(MAX(recno), 0) FROM records", [], |r| {
                r.get(0)
            })
            .unwrap_or(0);

        Ok(SqliteStore {
            lock: RwLock::new(()),
            conn: Mutex::new(conn),
            nrecs: AtomicI64::new(nrecs),
            path,
        })
    }

    pub fn remove(root: &Path, name: &LogName) -> GdpResult<()> {
        let path = path_for(root, name);
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let p = PathBuf::from(format!("{}{suffix}", path.display()));
            let _ = std::fs::remove_file(p);
        }
        Ok(())
    }

    fn row_to_datum(row: &rusqlite::Row<'_>) -> rusqlite::Result<Datum> {
        let recno: i64 = row.get("recno")?;
        let ts_sec: i64 = row.get("ts_sec")?;
        let ts_nsec: i32 = row.get("ts_nsec")?;
        let ts_accuracy: f32 = row.get("ts_accuracy")?;
        let prev_hash: Vec<u8> = row.get("prev_hash")?;
        let payload: Vec<u8> = row.get("payload")?;
        let sig: Option<Vec<u8>> = row.get("sig")?;
        let mut prev = [0u8; 32];
        if prev_hash.len() == 32 {
            prev.copy_from_slice(&prev_hash);
        }
        Ok(Datum {
            recno,
            ts: Timestamp {
                sec: ts_sec,
                nsec: ts_nsec,
                accuracy: ts_accuracy,
            },
            prev_hash: prev,
            payload,
            sig,
        })
    }

    fn resolve_start(&self, start: i64) -> i64 {
        if start < 0 {
            (self.max_recno() + start + 1).max(1)
        } else {
            start
        }
    }
}

impl StorageEngine for SqliteStore {
    fn max_recno(&self) -> i64 {
        self.nrecs.load(Ordering::Acquire)
    }

    fn append(&self, datum: &Datum) -> GdpResult<()> {
        let _guard = self.lock.blocking_write();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let hash = crate::crypto::hash_parts(
            crate::crypto::HashAlg::Sha256,
            &[&datum.recno.to_be_bytes(), &datum.payload],
        );
        let changed = conn.execute(
            "INSERT OR IGNORE INTO records (hash, recno, ts_sec, ts_nsec, ts_accuracy, \
             prev_hash, payload, sig) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                hash.as_slice(),
                datum.recno,
                datum.ts.sec,
                datum.ts.nsec,
                datum.ts.accuracy,
                datum.prev_hash.as_slice(),
                datum.payload,
                datum.sig,
            ],
        )?;
        if changed > 0 {
            self.nrecs.fetch_max(datum.recno, Ordering::AcqRel);
        }
        Ok(())
    }

    fn xact_begin(&self) -> GdpResult<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute_batch("SAVEPOINT gdp_xact")?;
        Ok(())
    }

    fn xact_end(&self) -> GdpResult<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute_batch("RELEASE SAVEPOINT gdp_xact")?;
        Ok(())
    }

    fn xact_abort(&self) -> GdpResult<()> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute_batch("ROLLBACK TO SAVEPOINT gdp_xact; RELEASE SAVEPOINT gdp_xact")?;
        Ok(())
    }

    fn read_by_recno(
        &self,
        start: i64,
        max_recs: i64,
        cb: &mut dyn FnMut(Datum) -> GdpResult<()>,
    ) -> GdpResult<ReadOutcome> {
        let _guard = self.lock.blocking_read();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let start = self.resolve_start(start);
        let limit = if max_recs == 0 { 1 } else { max_recs };

        let mut stmt = conn.prepare(
            "SELECT * FROM records WHERE recno >= ?1 ORDER BY recno ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![start, limit], Self::row_to_datum)?;

        let mut count = 0u64;
        for row in rows {
            let datum = row?;
            let recno = datum.recno;
            cb(datum)?;
            count += 1;
            let _ = recno;
        }

        if count == 0 {
            Ok(ReadOutcome::NotFound)
        } else if start + count as i64 > self.max_recno() {
            Ok(ReadOutcome::EndOfResults)
        } else {
            Ok(ReadOutcome::More(count))
        }
    }

    fn read_by_timestamp(
        &self,
        since_sec: i64,
        since_nsec: i32,
        max_recs: i64,
        cb: &mut dyn FnMut(Datum) -> GdpResult<()>,
    ) -> GdpResult<ReadOutcome> {
        let _guard = self.lock.blocking_read();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let limit = if max_recs == 0 { 1 } else { max_recs };

        let mut stmt = conn.prepare(
            "SELECT * FROM records WHERE (ts_sec > ?1) OR (ts_sec = ?1 AND ts_nsec >= ?2) \
             ORDER BY ts_sec ASC, ts_nsec ASC, recno ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![since_sec, since_nsec, limit], Self::row_to_datum)?;

        let mut count = 0u64;
        for row in rows {
            cb(row?)?;
            count += 1;
        }

        if count == 0 {
            Ok(ReadOutcome::NotFound)
        } else if (count as i64) < limit {
            Ok(ReadOutcome::EndOfResults)
        } else {
            Ok(ReadOutcome::More(count))
        }
    }

    fn read_by_hash(&self, hash: &[u8; 32]) -> GdpResult<Option<Datum>> {
        let _guard = self.lock.blocking_read();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.query_row(
            "SELECT * FROM records WHERE hash = ?1",
            params![hash.as_slice()],
            Self::row_to_datum,
        )
        .optional()
        .map_err(GdpError::from)
    }

    fn get_metadata(&self) -> GdpResult<Metadata> {
        let _guard = self.lock.blocking_read();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let bytes: Vec<u8> = conn.query_row(
            "SELECT payload FROM records WHERE recno = 0",
            [],
            |r| r.get(0),
        )?;
        Metadata::deserialize(&bytes).map_err(|_| GdpError::CorruptLog)
    }

    fn recno_exists(&self, recno: i64) -> GdpResult<bool> {
        let _guard = self.lock.blocking_read();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE recno = ?1",
            params![recno],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    fn hash_at_recno(&self, recno: i64) -> GdpResult<Option<[u8; 32]>> {
        let _guard = self.lock.blocking_read();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let hash: Option<Vec<u8>> = conn
            .query_row(
                "SELECT hash FROM records WHERE recno = ?1",
                params![recno],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hash.and_then(|h| h.try_into().ok()))
    }

    fn get_stats(&self) -> GdpResult<Stats> {
        let _guard = self.lock.blocking_read();
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let (nrecs, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*) - 1, COALESCE(SUM(LENGTH(payload)), 0) FROM records",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(Stats {
            nrecs: nrecs.max(0),
            bytes,
        })
    }

    fn close(&self) -> GdpResult<()> {
        // rusqlite closes the connection on Drop; nothing to flush
        // explicitly beyond letting WAL checkpoint naturally. Idempotent
        // per §4.C's contract.
        Ok(())
    }
}
