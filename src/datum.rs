// SPDX-License-Identifier: AGPL-3.0-or-later

//! Datum, hash and signature (§3, §4.A): one immutable record within a
//! log, plus the canonical digest computation that both the hash chain
//! and the signature are built over.

use bitflags::bitflags;

use crate::{
    crypto::{self, Hash, HashAlg, KeyPair, PublicKey},
    error::{GdpError, GdpResult},
    metadata::Metadata,
};

/// Server-assigned commit timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i32,
    pub accuracy: f32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            sec: now.as_secs() as i64,
            nsec: now.subsec_nanos() as i32,
            accuracy: 0.0,
        }
    }
}

bitflags! {
    /// Signature verification strictness bitmask, chosen at log-open time
    /// (§4.A). Controls whether missing/invalid signatures fail or warn.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Strictness: u8 {
        const MUST_VERIFY_IF_PRESENT     = 0b001;
        const REQUIRE_SIG_IF_PUBKEY      = 0b010;
        const REQUIRE_PUBKEY             = 0b100;
    }
}

/// A record within a log. Recno 0 is reserved for the metadata record and
/// is never represented by this type (the metadata record is handled
/// directly by the storage engine).
#[derive(Debug, Clone, PartialEq)]
pub struct Datum {
    pub recno: i64,
    pub ts: Timestamp,
    pub prev_hash: Hash,
    pub payload: Vec<u8>,
    pub sig: Option<Vec<u8>>,
}

impl Datum {
    pub fn new(payload: Vec<u8>) -> Self {
        Datum {
            recno: 0,
            ts: Timestamp::default(),
            prev_hash: [0u8; 32],
            payload,
            sig: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Datum::new(Vec::new());
    }

    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Canonical datum digest (§3):
    /// `H(log_name || serialized_metadata || recno_be64 || sec_be64 ||
    /// nsec_be32 || accuracy_be32 || prev_hash || H(payload))`.
    pub fn hash(&self, log_name: &crate::metadata::LogName, md: &Metadata, alg: HashAlg) -> Hash {
        let payload_hash = crypto::hash(alg, &self.payload);
        let recno_be = self.recno.to_be_bytes();
        let sec_be = self.ts.sec.to_be_bytes();
        let nsec_be = self.ts.nsec.to_be_bytes();
        let accuracy_be = self.ts.accuracy.to_be_bytes();
        let serialized_md = md.serialize();
        crypto::hash_parts(
            alg,
            &[
                &log_name.0,
                &serialized_md,
                &recno_be,
                &sec_be,
                &nsec_be,
                &accuracy_be,
                &self.prev_hash,
                &payload_hash,
            ],
        )
    }

    pub fn hash_equals(&self, other: &Hash, log_name: &crate::metadata::LogName, md: &Metadata, alg: HashAlg) -> bool {
        &self.hash(log_name, md, alg) == other
    }

    /// Sign the canonical digest with the writer key. Per §4.A this
    /// requires the caller to be in a signing context (modeled here as
    /// simply taking the key pair — the log-object-level `SIGNING` flag
    /// that serializes this on the real object is enforced by the caller,
    /// e.g. [`crate::logobj::LogObject::append`]).
    pub fn sign(
        &mut self,
        log_name: &crate::metadata::LogName,
        md: &Metadata,
        alg: HashAlg,
        key: &KeyPair,
    ) {
        let digest = self.hash(log_name, md, alg);
        self.sig = Some(key.sign(&digest));
    }

    /// Verify this datum's signature against `pubkey`, honoring
    /// `strictness` for the missing-signature / missing-key cases.
    pub fn verify(
        &self,
        log_name: &crate::metadata::LogName,
        md: &Metadata,
        alg: HashAlg,
        pubkey: Option<&PublicKey>,
        strictness: Strictness,
    ) -> GdpResult<()> {
        match (pubkey, &self.sig) {
            (Some(pk), Some(sig)) => {
                let digest = self.hash(log_name, md, alg);
                match pk.verify(&digest, sig) {
                    Ok(()) => Ok(()),
                    Err(e) if !strictness.contains(Strictness::MUST_VERIFY_IF_PRESENT) => {
                        tracing::warn!(recno = self.recno, error = %e, "signature did not verify, accepting under relaxed strictness");
                        Ok(())
                    },
                    Err(e) => Err(e),
                }
            },
            (Some(_), None) => {
                if strictness.contains(Strictness::REQUIRE_SIG_IF_PUBKEY) {
                    Err(GdpError::SigMissing)
                } else {
                    Ok(())
                }
            },
            (None, _) => {
                if strictness.contains(Strictness::REQUIRE_PUBKEY) {
                    Err(GdpError::NoPubKey)
                } else {
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;
    use crate::metadata::{tag, Metadata};

    fn sample_md_and_key() -> (Metadata, KeyPair) {
        let kp = KeyPair::generate(&mut OsRng);
        let mut md = Metadata::new(4);
        md.add(tag::CREATOR, b"u@h".to_vec()).expect("add");
        md.add(tag::CREATION_TIME, b"2024-01-01T00:00:00Z".to_vec())
            .expect("add");
        md.add(tag::NONCE, vec![1, 2, 3, 4]).expect("add");
        md.add(
            tag::WRITER_PUBKEY,
            Metadata::encode_pubkey_entry(HashAlg::Sha256, &kp.public_key()),
        )
        .expect("add");
        (md, kp)
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let (md, kp) = sample_md_and_key();
        let name = md.compute_name();
        let mut d = Datum::new(b"hello".to_vec());
        d.recno = 1;
        d.sign(&name, &md, HashAlg::Sha256, &kp);
        assert!(
            d.verify(
                &name,
                &md,
                HashAlg::Sha256,
                Some(&kp.public_key()),
                Strictness::all()
            )
            .is_ok()
        );
    }

    #[test]
    fn verify_fails_on_tampered_payload() {
        let (md, kp) = sample_md_and_key();
        let name = md.compute_name();
        let mut d = Datum::new(b"hello".to_vec());
        d.recno = 1;
        d.sign(&name, &md, HashAlg::Sha256, &kp);
        d.payload = b"tampered".to_vec();
        assert!(
            d.verify(
                &name,
                &md,
                HashAlg::Sha256,
                Some(&kp.public_key()),
                Strictness::all()
            )
            .is_err()
        );
    }

    #[test]
    fn missing_signature_is_warning_unless_required() {
        let (md, kp) = sample_md_and_key();
        let name = md.compute_name();
        let mut d = Datum::new(b"hello".to_vec());
        d.recno = 1;
        assert!(
            d.verify(&name, &md, HashAlg::Sha256, Some(&kp.public_key()), Strictness::empty())
                .is_ok()
        );
        assert!(
            d.verify(
                &name,
                &md,
                HashAlg::Sha256,
                Some(&kp.public_key()),
                Strictness::REQUIRE_SIG_IF_PUBKEY
            )
            .is_err()
        );
    }

    #[test]
    fn tampered_payload_downgrades_to_a_warning_without_must_verify() {
        let (md, kp) = sample_md_and_key();
        let name = md.compute_name();
        let mut d = Datum::new(b"hello".to_vec());
        d.recno = 1;
        d.sign(&name, &md, HashAlg::Sha256, &kp);
        d.payload = b"tampered".to_vec();
        assert!(
            d.verify(&name, &md, HashAlg::Sha256, Some(&kp.public_key()), Strictness::empty())
                .is_ok()
        );
        assert!(
            d.verify(
                &name,
                &md,
                HashAlg::Sha256,
                Some(&kp.public_key()),
                Strictness::MUST_VERIFY_IF_PRESENT
            )
            .is_err()
        );
    }

    #[test]
    fn hash_chain_links_successive_records() {
        let (md, _kp) = sample_md_and_key();
        let name = md.compute_name();
        let mut d1 = Datum::new(b"first".to_vec());
        d1.recno = 1;
        d1.prev_hash = name.0; // chained from the metadata record
        let h1 = d1.hash(&name, &md, HashAlg::Sha256);

        let mut d2 = Datum::new(b"second".to_vec());
        d2.recno = 2;
        d2.prev_hash = h1;
        assert_eq!(d2.prev_hash, h1);
    }
}
