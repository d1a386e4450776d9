// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metadata block (§3, §4.B): an ordered, append-only `(tag, bytes)` set
//! attached to a log at creation. Once serialized it is immutable, and
//! its serialization is what the log's self-certifying name is computed
//! over.

use base64::Engine;

use crate::{
    crypto::{self, HashAlg},
    error::{GdpError, GdpResult},
};

/// Well-known metadata tags (§3).
pub mod tag {
    pub const EXTERNAL_ID: u32 = 1;
    pub const CREATION_TIME: u32 = 2;
    pub const CREATOR: u32 = 3;
    pub const NONCE: u32 = 4;
    pub const OWNER_PUBKEY: u32 = 5;
    pub const WRITER_PUBKEY: u32 = 6;
    pub const EXPIRATION: u32 = 7;
    pub const SYNTAX_HINT: u32 = 8;
}

/// 32-byte self-certifying log name: `SHA256(serialize(metadata))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogName(pub [u8; 32]);

impl LogName {
    /// Printable form: base64url without padding.
    pub fn printable(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_printable(s: &str) -> GdpResult<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| GdpError::NameInvalid)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| GdpError::NameInvalid)?;
        Ok(LogName(arr))
    }

    /// First byte of the binary name, used for sharding on-disk storage
    /// (§6: "sharded by first name byte").
    pub fn shard_byte(&self) -> u8 {
        self.0[0]
    }
}

impl std::fmt::Display for LogName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.printable())
    }
}

/// One `(tag, bytes)` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub tag: u32,
    pub bytes: Vec<u8>,
}

/// An ordered set of metadata entries. `read_only` is set once a block has
/// been deserialized or otherwise finalized, per §4.B's `add` contract
/// ("reject when marked read-only").
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: Vec<Entry>,
    read_only: bool,
}

impl Metadata {
    pub fn new(capacity: usize) -> Self {
        Metadata {
            entries: Vec::with_capacity(capacity),
            read_only: false,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Add (or replace, if the tag is already present) an entry. Rejected
    /// with [`GdpError::ReadOnly`] if the block has been finalized.
    pub fn add(&mut self, tag: u32, bytes: Vec<u8>) -> GdpResult<()> {
        if self.read_only {
            return Err(GdpError::ReadOnly);
        }
        if let Some(existing) = self.entries.iter_mut().find(|e| e.tag == tag) {
            existing.bytes = bytes;
        } else {
            self.entries.push(Entry { tag, bytes });
        }
        Ok(())
    }

    pub fn find(&self, tag: u32) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.tag == tag)
            .map(|e| e.bytes.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deterministic wire format: `u16 count`, then `count` pairs of
    /// `(u32 tag, u32 length)`, then the concatenated bytes (§3).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let count = self.entries.len() as u16;
        out.extend_from_slice(&count.to_be_bytes());
        for e in &self.entries {
            out.extend_from_slice(&e.tag.to_be_bytes());
            out.extend_from_slice(&(e.bytes.len() as u32).to_be_bytes());
        }
        for e in &self.entries {
            out.extend_from_slice(&e.bytes);
        }
        out
    }

    /// Deserialize a block. The result is marked read-only (§4.B).
    pub fn deserialize(buf: &[u8]) -> GdpResult<Self> {
        if buf.len() < 2 {
            return Err(GdpError::ShortMsg);
        }
        let count = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let mut pos = 2usize;
        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.len() < pos + 8 {
                return Err(GdpError::ShortMsg);
            }
            let tag = u32::from_be_bytes(buf[pos..pos + 4].try_into().expect("4 bytes"));
            let len = u32::from_be_bytes(
                buf[pos + 4..pos + 8].try_into().expect("4 bytes"),
            ) as usize;
            lengths.push((tag, len));
            pos += 8;
        }
        let mut entries = Vec::with_capacity(count);
        for (tag, len) in lengths {
            if buf.len() < pos + len {
                return Err(GdpError::ShortMsg);
            }
            entries.push(Entry {
                tag,
                bytes: buf[pos..pos + len].to_vec(),
            });
            pos += len;
        }
        Ok(Metadata {
            entries,
            read_only: true,
        })
    }

    pub fn clone_mutable(&self) -> Self {
        Metadata {
            entries: self.entries.clone(),
            read_only: false,
        }
    }

    /// `SHA256(serialize(md))` — the log's self-certifying name.
    pub fn compute_name(&self) -> LogName {
        LogName(crypto::hash(HashAlg::Sha256, &self.serialize()))
    }

    /// Reject a block missing any of the entries required at log-creation
    /// time: owner key, writer key, creator, creation time, nonce (§4.B).
    pub fn validate_for_creation(&self) -> GdpResult<()> {
        for required in [
            tag::OWNER_PUBKEY,
            tag::WRITER_PUBKEY,
            tag::CREATOR,
            tag::CREATION_TIME,
            tag::NONCE,
        ] {
            if self.find(required).is_none() {
                return Err(GdpError::MetadataRequired);
            }
        }
        Ok(())
    }

    /// Decode a public-key metadata entry's leading `{digest_alg,
    /// key_type, key_bits_hi, key_bits_lo}` header plus its DER-like key
    /// body (§6).
    pub fn decode_pubkey_entry(
        bytes: &[u8],
    ) -> GdpResult<(HashAlg, crate::crypto::SignAlg, u16, crate::crypto::PublicKey)> {
        if bytes.len() < 4 {
            return Err(GdpError::ShortMsg);
        }
        let digest_alg = HashAlg::from_byte(bytes[0])?;
        let key_type = crate::crypto::SignAlg::from_byte(bytes[1])?;
        let key_bits = u16::from_be_bytes([bytes[2], bytes[3]]);
        let pk = crate::crypto::PublicKey::from_der_like_bytes(key_type, &bytes[4..])?;
        Ok((digest_alg, key_type, key_bits, pk))
    }

    /// Encode a public key into the on-wire pubkey-entry format.
    pub fn encode_pubkey_entry(
        digest_alg: HashAlg,
        pk: &crate::crypto::PublicKey,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 32);
        out.push(digest_alg.as_byte());
        out.push(pk.alg().as_byte());
        out.extend_from_slice(&pk.alg().key_bits().to_be_bytes());
        out.extend_from_slice(&pk.to_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;
    use crate::crypto::KeyPair;

    fn sample_md() -> Metadata {
        let mut md = Metadata::new(8);
        md.add(tag::EXTERNAL_ID, b"t".to_vec()).expect("add");
        md.add(tag::CREATOR, b"u@h".to_vec()).expect("add");
        md.add(tag::CREATION_TIME, b"2024-01-01T00:00:00Z".to_vec())
            .expect("add");
        md.add(tag::NONCE, vec![0u8; 16]).expect("add");
        let kp = KeyPair::generate(&mut OsRng);
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

    #[test]
    fn serialize_deserialize_round_trips_byte_exact() {
        let md = sample_md();
        let bytes = md.serialize();
        let back = Metadata::deserialize(&bytes).expect("deserialize");
        assert_eq!(back.serialize(), bytes);
        assert!(back.is_read_only());
    }

    #[test]
    fn add_replaces_existing_tag() {
        let mut md = Metadata::new(1);
        md.add(1, b"a".to_vec()).expect("add");
        md.add(1, b"b".to_vec()).expect("add");
        assert_eq!(md.len(), 1);
        assert_eq!(md.find(1), Some(b"b".as_slice()));
    }

    #[test]
    fn add_rejected_once_read_only() {
        let md = sample_md();
        let bytes = md.serialize();
        let mut back = Metadata::deserialize(&bytes).expect("deserialize");
        assert!(matches!(back.add(99, vec![]), Err(GdpError::ReadOnly)));
    }

    #[test]
    fn validate_for_creation_rejects_missing_entries() {
        let mut md = Metadata::new(1);
        md.add(tag::EXTERNAL_ID, b"t".to_vec()).expect("add");
        assert!(md.validate_for_creation().is_err());
        assert!(sample_md().validate_for_creation().is_ok());
    }

    #[test]
    fn compute_name_is_deterministic_over_bytes() {
        let md = sample_md();
        let n1 = md.compute_name();
        let n2 = Metadata::deserialize(&md.serialize())
            .expect("deserialize")
            .compute_name();
        assert_eq!(n1, n2);
    }

    #[test]
    fn printable_name_round_trips() {
        let md = sample_md();
        let name = md.compute_name();
        let printed = name.printable();
        let back = LogName::from_printable(&printed).expect("parse");
        assert_eq!(name, back);
    }
}
