// SPDX-License-Identifier: AGPL-3.0-or-later

//! Object cache (§4.D), grounded directly on the reference cache
//! implementation: a name→object map and a recency-ordered list behind
//! one cache mutex, strict lock ordering (cache before object), a
//! consistency check that rebuilds the list from the map on drift, and
//! a reclamation sweep with a shrinking age threshold.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::{
    logobj::{LogObjFlags, LogObject},
    metadata::LogName,
};

/// Flags accepted by [`Cache::get`] (§4.D).
#[derive(Debug, Clone, Copy, Default)]
pub struct GetFlags {
    pub create: bool,
    pub peek: bool,
    pub get_pending: bool,
}

struct LruEntry {
    name: LogName,
    touched: Instant,
}

/// Intrusive-in-spirit recency list plus the name→object map, both
/// guarded by one async mutex around the list (the map itself is a
/// [`DashMap`] for lock-free lookups, but every insert/remove that must
/// stay consistent with the list takes `list` first — cache before
/// object, per the lock-order invariant of §4.D).
pub struct Cache {
    map: DashMap<LogName, Arc<LogObject>>,
    list: AsyncMutex<Vec<LruEntry>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            map: DashMap::new(),
            list: AsyncMutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `get(name, flags)` (§4.D): look up by name; on a hit, revalidate;
    /// on a miss with `create` set, allocate a fresh `PENDING` object.
    /// Returns `None` only on a miss without `create`.
    pub async fn get(
        &self,
        name: LogName,
        flags: GetFlags,
        make_pending: impl FnOnce() -> Arc<LogObject>,
    ) -> Option<Arc<LogObject>> {
        if let Some(existing) = self.map.get(&name).map(|e| e.value().clone()) {
            let valid = {
                let inner = existing.inner.lock().await;
                let ok_pending = flags.get_pending || !inner.flags.contains(LogObjFlags::PENDING);
                inner.flags.contains(LogObjFlags::IN_CACHE)
                    && !inner.flags.contains(LogObjFlags::DROPPING)
                    && ok_pending
            };
            if valid {
                if !flags.peek {
                    existing.incref();
                    self.touch(name).await;
                }
                return Some(existing);
            }
            self.remove_entry(&name).await;
        }

        if !flags.create {
            return None;
        }

        let obj = make_pending();
        self.insert(obj.clone()).await;
        if !flags.peek {
            obj.incref();
        }
        Some(obj)
    }

    /// Insert a freshly created object. Lock order is cache (the list
    /// mutex) before object — callers must not be holding the object's
    /// inner lock when calling this (§4.D's "insertion rule").
    pub async fn insert(&self, obj: Arc<LogObject>) {
        let name = obj.name;
        {
            let mut inner = obj.inner.lock().await;
            inner.flags.insert(LogObjFlags::IN_CACHE);
        }
        self.map.insert(name, obj);
        let mut list = self.list.lock().await;
        list.push(LruEntry {
            name,
            touched: Instant::now(),
        });
    }

    pub async fn touch(&self, name: LogName) {
        let mut list = self.list.lock().await;
        if let Some(pos) = list.iter().position(|e| e.name == name) {
            let mut entry = list.remove(pos);
            entry.touched = Instant::now();
            list.push(entry);
        }
    }

    async fn remove_entry(&self, name: &LogName) {
        self.map.remove(name);
        let mut list = self.list.lock().await;
        list.retain(|e| &e.name != name);
    }

    /// `change_name` (§4.D): rebind a placeholder-named object to its
    /// computed self-certifying name.
    pub async fn change_name(&self, old: LogName, new: LogName) -> bool {
        let Some((_, obj)) = self.map.remove(&old) else {
            return false;
        };
        self.map.insert(new, obj);
        let mut list = self.list.lock().await;
        if let Some(entry) = list.iter_mut().find(|e| e.name == old) {
            entry.name = new;
        }
        true
    }

    /// Consistency check (§4.D): every object in the map must appear in
    /// the list and vice versa; on drift, rebuild the list from the map
    /// in descending touch order (here: arbitrary order, since the map
    /// itself does not track recency — freshly rebuilt entries are
    /// touched as of now).
    pub async fn consistency_check(&self) {
        let mut list = self.list.lock().await;
        let listed: HashSet<LogName> = list.iter().map(|e| e.name).collect();
        let mapped: HashSet<LogName> = self.map.iter().map(|e| *e.key()).collect();
        if listed == mapped {
            return;
        }
        warn!(
            listed = listed.len(),
            mapped = mapped.len(),
            "cache list/map drift detected, rebuilding"
        );
        let now = Instant::now();
        *list = mapped
            .into_iter()
            .map(|name| LruEntry { name, touched: now })
            .collect();
    }

    /// Reclamation sweep (§4.D): walk oldest to newest, skip objects that
    /// are dropping, referenced, or touched more recently than `cutoff`
    /// ago. If `min_reclaimed` objects are not freed, the caller should
    /// retry with a smaller `cutoff` (the shrinking-age-threshold policy
    /// lives in the caller, e.g. the logd reclamation task).
    pub async fn reclaim(&self, cutoff: Duration) -> usize {
        self.consistency_check().await;
        let now = Instant::now();
        let candidates: Vec<LogName> = {
            let list = self.list.lock().await;
            list.iter()
                .filter(|e| now.duration_since(e.touched) >= cutoff)
                .map(|e| e.name)
                .collect()
        };

        let mut reclaimed = 0usize;
        for name in candidates {
            let Some(obj) = self.map.get(&name).map(|e| e.value().clone()) else {
                continue;
            };
            let Ok(mut inner) = obj.inner.try_lock() else {
                continue;
            };
            if inner.flags.contains(LogObjFlags::DROPPING)
                || obj.refcnt.load(std::sync::atomic::Ordering::Acquire) > 0
            {
                continue;
            }
            inner.flags.insert(LogObjFlags::DROPPING);
            drop(inner);
            self.remove_entry(&name).await;
            let _ = obj.storage.close();
            reclaimed += 1;
        }
        debug!(reclaimed, "cache reclamation pass complete");
        reclaimed
    }

    /// Admin/introspection dump (supplemented feature: `gdp_gob_cache_dump`):
    /// `(name, age, refcnt)` for every cached object, oldest first.
    pub async fn dump(&self) -> Vec<(LogName, Duration, i32)> {
        let now = Instant::now();
        let list = self.list.lock().await;
        list.iter()
            .filter_map(|e| {
                self.map.get(&e.name).map(|obj| {
                    (
                        e.name,
                        now.duration_since(e.touched),
                        obj.refcnt.load(std::sync::atomic::Ordering::Acquire),
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;
    use crate::{
        crypto::{HashAlg, KeyPair},
        datum::Strictness,
        logobj::SequencingPolicy,
        metadata::{Metadata, tag},
        storage::{ReadOutcome, StorageEngine, Stats},
    };

    struct NullStore;
    impl StorageEngine for NullStore {
        fn max_recno(&self) -> i64 {
            0
        }
        fn append(&self, _d: &crate::datum::Datum) -> crate::error::GdpResult<()> {
            Ok(())
        }
        fn xact_begin(&self) -> crate::error::GdpResult<()> {
            Ok(())
        }
        fn xact_end(&self) -> crate::error::GdpResult<()> {
            Ok(())
        }
        fn xact_abort(&self) -> crate::error::GdpResult<()> {
            Ok(())
        }
        fn read_by_recno(
            &self,
            _s: i64,
            _m: i64,
            _cb: &mut dyn FnMut(crate::datum::Datum) -> crate::error::GdpResult<()>,
        ) -> crate::error::GdpResult<ReadOutcome> {
            Ok(ReadOutcome::NotFound)
        }
        fn read_by_timestamp(
            &self,
            _s: i64,
            _n: i32,
            _m: i64,
            _cb: &mut dyn FnMut(crate::datum::Datum) -> crate::error::GdpResult<()>,
        ) -> crate::error::GdpResult<ReadOutcome> {
            Ok(ReadOutcome::NotFound)
        }
        fn read_by_hash(
            &self,
            _h: &[u8; 32],
        ) -> crate::error::GdpResult<Option<crate::datum::Datum>> {
            Ok(None)
        }
        fn get_metadata(&self) -> crate::error::GdpResult<Metadata> {
            Ok(Metadata::new(0))
        }
        fn recno_exists(&self, _r: i64) -> crate::error::GdpResult<bool> {
            Ok(false)
        }
        fn hash_at_recno(&self, _r: i64) -> crate::error::GdpResult<Option<[u8; 32]>> {
            Ok(None)
        }
        fn get_stats(&self) -> crate::error::GdpResult<Stats> {
            Ok(Stats::default())
        }
        fn close(&self) -> crate::error::GdpResult<()> {
            Ok(())
        }
    }

    fn sample_name(seed: u8) -> LogName {
        let mut md = Metadata::new(4);
        let kp = KeyPair::generate(&mut OsRng);
        md.add(tag::CREATOR, vec![seed]).expect("add");
        md.add(tag::CREATION_TIME, b"t".to_vec()).expect("add");
        md.add(tag::NONCE, vec![seed; 4]).expect("add");
        md.add(
            tag::OWNER_PUBKEY,
            Metadata::encode_pubkey_entry(HashAlg::Sha256, &kp.public_key()),
        )
        .expect("add");
        md.compute_name()
    }

    fn make_obj(name: LogName) -> Arc<LogObject> {
        LogObject::new_pending(
            name,
            HashAlg::Sha256,
            Arc::new(NullStore),
            Strictness::empty(),
            SequencingPolicy::default(),
        )
    }

    #[tokio::test]
    async fn get_miss_without_create_returns_none() {
        let cache = Cache::new();
        let name = sample_name(1);
        assert!(
            cache
                .get(name, GetFlags::default(), || make_obj(name))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn get_create_then_hit_increments_refcnt() {
        let cache = Cache::new();
        let name = sample_name(2);
        let flags = GetFlags {
            create: true,
            ..Default::default()
        };
        let obj = cache.get(name, flags, || make_obj(name)).await.expect("created");
        assert_eq!(obj.refcnt.load(std::sync::atomic::Ordering::Acquire), 1);

        let obj2 = cache
            .get(name, GetFlags::default(), || make_obj(name))
            .await
            .expect("hit");
        assert_eq!(obj2.refcnt.load(std::sync::atomic::Ordering::Acquire), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn reclaim_skips_referenced_objects() {
        let cache = Cache::new();
        let name = sample_name(3);
        let flags = GetFlags {
            create: true,
            ..Default::default()
        };
        let _obj = cache.get(name, flags, || make_obj(name)).await.expect("created");
        let reclaimed = cache.reclaim(Duration::from_secs(0)).await;
        assert_eq!(reclaimed, 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn reclaim_frees_unreferenced_aged_objects() {
        let cache = Cache::new();
        let name = sample_name(4);
        let flags = GetFlags {
            create: true,
            peek: true,
            ..Default::default()
        };
        cache.get(name, flags, || make_obj(name)).await.expect("created");
        let reclaimed = cache.reclaim(Duration::from_secs(0)).await;
        assert_eq!(reclaimed, 1);
        assert_eq!(cache.len(), 0);
    }
}
