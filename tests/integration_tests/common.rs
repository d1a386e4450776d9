use std::sync::Arc;

use gdp::{
    crypto::{HashAlg, KeyPair},
    datum::Strictness,
    logobj::{LogObject, SequencingPolicy},
    metadata::{tag, LogName, Metadata},
    storage::sqlite::{PragmaConfig, SqliteStore},
};

pub fn sample_metadata(seed: u8) -> Metadata {
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

/// Lay down a real SQLite-backed log and publish it, the way `logd`'s
/// `create_log` does, minus the cache/advertise bookkeeping.
pub async fn new_published_log(dir: &std::path::Path, seed: u8) -> (LogName, Arc<LogObject>) {
    let md = sample_metadata(seed);
    let name = md.compute_name();
    let pragmas = PragmaConfig::default();
    let store = SqliteStore::create(dir, &name, &md, &pragmas).expect("create store");
    let obj = LogObject::new_pending(
        name,
        HashAlg::Sha256,
        Arc::new(store),
        Strictness::empty(),
        SequencingPolicy::default(),
    );
    obj.publish(md, 0).await;
    (name, obj)
}
