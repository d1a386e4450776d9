use std::sync::Arc;

use gdp::{
    crypto::{HashAlg, KeyPair},
    datum::{Datum, Strictness},
    error::GdpError,
    logobj::{LogObject, SequencingPolicy},
    metadata::{tag, Metadata},
    storage::{sqlite::PragmaConfig, sqlite::SqliteStore, StorageEngine},
};

fn sample_metadata(seed: u8) -> Metadata {
    let kp = KeyPair::generate(&mut rand::rngs::OsRng);
    let mut md = Metadata::new(8);
    md.add(tag::CREATOR, vec![seed]).expect("add");
    md.add(tag::CREATION_TIME, b"2024-01-01T00:00:00Z".to_vec()).expect("add");
    md.add(tag::NONCE, vec![seed; 4]).expect("add");
    md.add(
        tag::OWNER_PUBKEY,
        Metadata::encode_pubkey_entry(HashAlg::Sha256, &kp.public_key()),
    )
    .expect("add");
    md.add(
        tag::WRITER_PUBKEY,
        Metadata::encode_pubkey_entry(HashAlg::Sha256, &kp.public_key()),
    )
    .expect("add");
    md
}

fn open_log(dir: &std::path::Path, seed: u8, policy: SequencingPolicy) -> Arc<LogObject> {
    let md = sample_metadata(seed);
    let name = md.compute_name();
    let pragmas = PragmaConfig::default();
    let store = SqliteStore::create(dir, &name, &md, &pragmas).expect("create store");
    let obj = LogObject::new_pending(name, HashAlg::Sha256, Arc::new(store), Strictness::empty(), policy);
    obj
}

/// Like `sample_metadata`, but hands back the writer key pair too so a
/// test can sign datums against it.
fn sample_metadata_with_key(seed: u8) -> (Metadata, KeyPair) {
    let kp = KeyPair::generate(&mut rand::rngs::OsRng);
    let mut md = Metadata::new(8);
    md.add(tag::CREATOR, vec![seed]).expect("add");
    md.add(tag::CREATION_TIME, b"2024-01-01T00:00:00Z".to_vec()).expect("add");
    md.add(tag::NONCE, vec![seed; 4]).expect("add");
    md.add(
        tag::OWNER_PUBKEY,
        Metadata::encode_pubkey_entry(HashAlg::Sha256, &kp.public_key()),
    )
    .expect("add");
    md.add(
        tag::WRITER_PUBKEY,
        Metadata::encode_pubkey_entry(HashAlg::Sha256, &kp.public_key()),
    )
    .expect("add");
    (md, kp)
}

fn open_log_with_strictness(
    dir: &std::path::Path,
    md: &Metadata,
    strictness: Strictness,
) -> Arc<LogObject> {
    let name = md.compute_name();
    let pragmas = PragmaConfig::default();
    let store = SqliteStore::create(dir, &name, md, &pragmas).expect("create store");
    LogObject::new_pending(name, HashAlg::Sha256, Arc::new(store), strictness, SequencingPolicy::default())
}

#[tokio::test]
async fn append_and_read_back_by_recno_and_hash() {
    let dir = tempfile::tempdir().expect("tempdir");
    let obj = open_log(dir.path(), 1, SequencingPolicy::default());
    obj.publish(Metadata::new(0), 0).await;

    let r1 = obj.append(Datum::new(b"one".to_vec())).await.expect("append 1");
    let r2 = obj.append(Datum::new(b"two".to_vec())).await.expect("append 2");
    assert_eq!(r1, 1);
    assert_eq!(r2, 2);
    assert_eq!(obj.max_recno(), 2);

    let mut seen = Vec::new();
    obj.read_by_recno(1, 2, &mut |d| {
        seen.push(d);
        Ok(())
    })
    .expect("read");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].payload, b"one");
    assert_eq!(seen[1].payload, b"two");

    let hash = obj.storage.hash_at_recno(1).expect("hash lookup").expect("present");
    let by_hash = obj.read_by_hash(&hash).expect("read by hash").expect("found");
    assert_eq!(by_hash.payload, b"one");
}

#[tokio::test]
async fn reopening_an_existing_store_resumes_at_its_recno() {
    let dir = tempfile::tempdir().expect("tempdir");
    let md = sample_metadata(2);
    let name = md.compute_name();
    let pragmas = PragmaConfig::default();

    {
        let store = SqliteStore::create(dir.path(), &name, &md, &pragmas).expect("create");
        let obj = LogObject::new_pending(
            name,
            HashAlg::Sha256,
            Arc::new(store),
            Strictness::empty(),
            SequencingPolicy::default(),
        );
        obj.publish(md.clone(), 0).await;
        obj.append(Datum::new(b"a".to_vec())).await.expect("append");
    }

    let reopened = SqliteStore::open(dir.path(), &name, &pragmas).expect("reopen");
    assert_eq!(reopened.max_recno(), 1);
}

#[tokio::test]
async fn skipping_ahead_of_the_next_recno_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let strict = open_log(dir.path(), 3, SequencingPolicy { allow_gaps: false, allow_dups: true });
    strict.publish(Metadata::new(0), 0).await;

    let mut skipping = Datum::new(b"skip".to_vec());
    skipping.recno = 5;
    let err = strict.append(skipping).await.unwrap_err();
    assert_eq!(err, GdpError::RecnoSeqError);
}

#[tokio::test]
async fn reappending_an_existing_recno_is_gated_by_allow_dups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lenient = open_log(dir.path(), 5, SequencingPolicy { allow_gaps: false, allow_dups: true });
    lenient.publish(Metadata::new(0), 0).await;
    lenient.append(Datum::new(b"same".to_vec())).await.expect("first append");
    let mut retry = Datum::new(b"same".to_vec());
    retry.recno = 1;
    let recno = lenient.append(retry).await.expect("dup allowed");
    assert_eq!(recno, 1);

    let dir2 = tempfile::tempdir().expect("tempdir");
    let strict = open_log(dir2.path(), 6, SequencingPolicy { allow_gaps: false, allow_dups: false });
    strict.publish(Metadata::new(0), 0).await;
    strict.append(Datum::new(b"same".to_vec())).await.expect("first append");
    let mut retry = Datum::new(b"same".to_vec());
    retry.recno = 1;
    let err = strict.append(retry).await.unwrap_err();
    assert_eq!(err, GdpError::RecnoSeqError);
}

/// With `REQUIRE_SIG_IF_PUBKEY` set and a writer pubkey present in the
/// log's metadata, an unsigned append is rejected at the strictness gate.
#[tokio::test]
async fn unsigned_append_is_rejected_when_signature_is_required() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (md, _kp) = sample_metadata_with_key(7);
    let log = open_log_with_strictness(dir.path(), &md, Strictness::REQUIRE_SIG_IF_PUBKEY);
    log.publish(md, 0).await;

    let err = log.append(Datum::new(b"unsigned".to_vec())).await.unwrap_err();
    assert_eq!(err, GdpError::SigMissing);
}

/// A datum signed over the exact recno/ts/prev_hash it will be appended
/// with verifies and commits even under full strictness.
#[tokio::test]
async fn correctly_signed_append_succeeds_under_full_strictness() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (md, kp) = sample_metadata_with_key(8);
    let name = md.compute_name();
    let log = open_log_with_strictness(dir.path(), &md, Strictness::all());
    log.publish(md.clone(), 0).await;

    let mut datum = Datum::new(b"signed".to_vec());
    datum.recno = 1;
    datum.prev_hash = name.0;
    datum.sign(&name, &md, HashAlg::Sha256, &kp);

    let recno = log.append(datum).await.expect("signed append must verify");
    assert_eq!(recno, 1);
}

/// A tampered signature is hard-rejected once `MUST_VERIFY_IF_PRESENT` is
/// set, rather than silently downgraded to a warning.
#[tokio::test]
async fn tampered_signature_is_rejected_under_full_strictness() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (md, kp) = sample_metadata_with_key(9);
    let name = md.compute_name();
    let log = open_log_with_strictness(dir.path(), &md, Strictness::all());
    log.publish(md.clone(), 0).await;

    let mut datum = Datum::new(b"signed".to_vec());
    datum.recno = 1;
    datum.prev_hash = name.0;
    datum.sign(&name, &md, HashAlg::Sha256, &kp);
    datum.payload = b"tampered".to_vec();

    let err = log.append(datum).await.unwrap_err();
    assert_eq!(err, GdpError::VrfyFail);
}
