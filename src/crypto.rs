// SPDX-License-Identifier: AGPL-3.0-or-later

//! The crypto provider (§1: "treated as external collaborator and
//! specified only by named operations"). Everything else in this crate
//! reaches digests and signatures only through [`HashAlg`] / [`SignAlg`]
//! and the free functions below — never a hardcoded algorithm.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest as _, Sha256};

use crate::error::{GdpError, GdpResult};

/// Digest algorithm, stored in the first byte of a public-key metadata
/// entry (§6). Only one variant exists today, but the type keeps every
/// caller honest about deriving the algorithm from metadata rather than
/// assuming a default (§9 Open Questions, first bullet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashAlg {
    Sha256 = 1,
}

impl HashAlg {
    pub fn from_byte(b: u8) -> GdpResult<Self> {
        match b {
            1 => Ok(HashAlg::Sha256),
            _ => Err(GdpError::HashAlg),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn digest_len(self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
        }
    }
}

/// Signature algorithm, second byte of a public-key metadata entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignAlg {
    Ed25519 = 1,
}

impl SignAlg {
    pub fn from_byte(b: u8) -> GdpResult<Self> {
        match b {
            1 => Ok(SignAlg::Ed25519),
            _ => Err(GdpError::KeyType),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn key_bits(self) -> u16 {
        match self {
            SignAlg::Ed25519 => 256,
        }
    }
}

/// A 32-byte digest, fixed-size regardless of `HashAlg` today (all
/// supported algorithms happen to produce 32 bytes).
pub type Hash = [u8; 32];

/// Hash arbitrary bytes under the given algorithm.
pub fn hash(alg: HashAlg, data: &[u8]) -> Hash {
    match alg {
        HashAlg::Sha256 => {
            let mut h = Sha256::new();
            h.update(data);
            let out = h.finalize();
            let mut buf = [0u8; 32];
            buf.copy_from_slice(&out);
            buf
        },
    }
}

/// Hash several byte slices as if they were concatenated, without an
/// intermediate allocation — used for the canonical datum digest of §3,
/// which is built from many discontiguous fields.
pub fn hash_parts(alg: HashAlg, parts: &[&[u8]]) -> Hash {
    match alg {
        HashAlg::Sha256 => {
            let mut h = Sha256::new();
            for p in parts {
                h.update(p);
            }
            let out = h.finalize();
            let mut buf = [0u8; 32];
            buf.copy_from_slice(&out);
            buf
        },
    }
}

/// A key pair able to sign a digest, bound to a `SignAlg`.
#[derive(Debug)]
pub struct KeyPair {
    alg: SignAlg,
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        KeyPair {
            alg: SignAlg::Ed25519,
            signing: SigningKey::generate(rng),
        }
    }

    pub fn from_bytes(alg: SignAlg, bytes: &[u8]) -> GdpResult<Self> {
        match alg {
            SignAlg::Ed25519 => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| GdpError::CryptoError("bad ed25519 key length".into()))?;
                Ok(KeyPair {
                    alg,
                    signing: SigningKey::from_bytes(&arr),
                })
            },
        }
    }

    pub fn alg(&self) -> SignAlg {
        self.alg
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            alg: self.alg,
            verifying: self.signing.verifying_key(),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn sign(&self, digest: &Hash) -> Vec<u8> {
        let sig: Signature = self.signing.sign(digest);
        sig.to_bytes().to_vec()
    }
}

/// Public half of a key pair, stored inside a log's metadata block.
#[derive(Debug, Clone)]
pub struct PublicKey {
    alg: SignAlg,
    verifying: VerifyingKey,
}

impl PublicKey {
    pub fn alg(&self) -> SignAlg {
        self.alg
    }

    pub fn from_der_like_bytes(alg: SignAlg, bytes: &[u8]) -> GdpResult<Self> {
        match alg {
            SignAlg::Ed25519 => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| GdpError::KeyTooSmall)?;
                let verifying = VerifyingKey::from_bytes(&arr)
                    .map_err(|e| GdpError::CryptoError(e.to_string()))?;
                Ok(PublicKey { alg, verifying })
            },
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying.to_bytes()
    }

    pub fn verify(&self, digest: &Hash, sig: &[u8]) -> GdpResult<()> {
        let sig = Signature::from_slice(sig)
            .map_err(|e| GdpError::CryptoError(e.to_string()))?;
        self.verifying
            .verify(digest, &sig)
            .map_err(|_| GdpError::VrfyFail)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = hash(HashAlg::Sha256, b"hello");
        let b = hash(HashAlg::Sha256, b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_parts_matches_concatenation() {
        let whole = hash(HashAlg::Sha256, b"helloworld");
        let parts = hash_parts(HashAlg::Sha256, &[b"hello", b"world"]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = KeyPair::generate(&mut OsRng);
        let digest = hash(HashAlg::Sha256, b"datum bytes");
        let sig = kp.sign(&digest);
        kp.public_key().verify(&digest, &sig).expect("must verify");
    }

    #[test]
    fn verify_rejects_tampered_digest() {
        let kp = KeyPair::generate(&mut OsRng);
        let digest = hash(HashAlg::Sha256, b"datum bytes");
        let sig = kp.sign(&digest);
        let other = hash(HashAlg::Sha256, b"different bytes");
        assert!(kp.public_key().verify(&other, &sig).is_err());
    }
}
