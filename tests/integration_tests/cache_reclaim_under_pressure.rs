use std::time::Duration;

use gdp::cache::Cache;

use crate::integration_tests::common::new_published_log;

/// A cache holding several real SQLite-backed logs reclaims only the
/// ones nobody holds a reference to, mirroring the in-module
/// `reclaim_skips_referenced_objects` / `reclaim_frees_unreferenced_aged_objects`
/// pair but against actual storage rather than a null backend.
#[tokio::test]
async fn reclaim_frees_only_objects_with_no_outstanding_refs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Cache::new();

    let (held_name, held) = new_published_log(dir.path(), 1).await;
    let (free_name, free) = new_published_log(dir.path(), 2).await;
    let (also_free_name, also_free) = new_published_log(dir.path(), 3).await;

    cache.insert(held.clone()).await;
    cache.insert(free.clone()).await;
    cache.insert(also_free.clone()).await;

    // Only the held object gets an outstanding reference; the other two
    // stay at refcnt zero, the way a cache hit vs. a peek would leave them.
    held.incref();

    assert_eq!(cache.len(), 3);
    let reclaimed = cache.reclaim(Duration::from_secs(0)).await;
    assert_eq!(reclaimed, 2);
    assert_eq!(cache.len(), 1);

    assert!(
        cache
            .get(held_name, gdp::cache::GetFlags { peek: true, ..Default::default() }, || unreachable!())
            .await
            .is_some()
    );
    assert!(
        cache
            .get(free_name, gdp::cache::GetFlags { peek: true, ..Default::default() }, || unreachable!())
            .await
            .is_none()
    );
    assert!(
        cache
            .get(also_free_name, gdp::cache::GetFlags { peek: true, ..Default::default() }, || unreachable!())
            .await
            .is_none()
    );
}

/// Dropping the reference on a previously-held object makes it eligible
/// for reclamation on the next sweep.
#[tokio::test]
async fn decref_makes_a_previously_held_object_reclaimable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Cache::new();

    let (name, obj) = new_published_log(dir.path(), 4).await;
    cache.insert(obj.clone()).await;
    obj.incref();

    assert_eq!(cache.reclaim(Duration::from_secs(0)).await, 0);
    assert_eq!(cache.len(), 1);

    obj.decref().await;
    let reclaimed = cache.reclaim(Duration::from_secs(0)).await;
    assert_eq!(reclaimed, 1);
    assert!(
        cache
            .get(name, gdp::cache::GetFlags { peek: true, ..Default::default() }, || unreachable!())
            .await
            .is_none()
    );
}
