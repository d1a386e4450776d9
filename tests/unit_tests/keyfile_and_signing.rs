use gdp::{
    crypto::{HashAlg, KeyPair},
    datum::{Datum, Strictness},
    keyfile::{self, KeyRole},
    metadata::{tag, LogName, Metadata},
};

fn sample_metadata(kp: &KeyPair) -> Metadata {
    let mut md = Metadata::new(8);
    md.add(tag::CREATOR, b"writer@example".to_vec()).expect("add");
    md.add(tag::CREATION_TIME, b"2024-06-01T00:00:00Z".to_vec()).expect("add");
    md.add(tag::NONCE, vec![9u8; 8]).expect("add");
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

/// A key loaded back from a key file must produce a signature that
/// verifies against the public key recorded in the log's own metadata.
#[test]
fn a_key_loaded_from_disk_signs_datums_the_metadata_pubkey_can_verify() {
    let dir = tempfile::tempdir().expect("tempdir");
    let original = KeyPair::generate(&mut rand::rngs::OsRng);
    let md = sample_metadata(&original);
    let name = md.compute_name();

    keyfile::create(dir.path(), &name, KeyRole::Writer, &original).expect("create key file");
    let loaded = keyfile::load(dir.path(), &name, KeyRole::Writer).expect("load key file");
    assert_eq!(loaded.secret_bytes(), original.secret_bytes());

    let mut datum = Datum::new(b"hello log".to_vec());
    datum.recno = 1;
    datum.prev_hash = name.0;
    datum.sign(&name, &md, HashAlg::Sha256, &loaded);

    let pubkey_entry = md.find(tag::WRITER_PUBKEY).expect("writer pubkey present");
    let (_, _, _, pubkey) = Metadata::decode_pubkey_entry(pubkey_entry).expect("decode pubkey");
    datum
        .verify(&name, &md, HashAlg::Sha256, Some(&pubkey), Strictness::all())
        .expect("signature must verify");
}

#[test]
fn two_logs_never_collide_on_the_same_key_file_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = LogName([1u8; 32]);
    let b = LogName([2u8; 32]);
    assert_ne!(
        keyfile::key_path(dir.path(), &a, KeyRole::Owner),
        keyfile::key_path(dir.path(), &b, KeyRole::Owner)
    );
}
