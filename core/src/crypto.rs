//! Crypto kernel: BLAKE3, Keccak-256, Ed25519 (transaction signatures) and
//! BLS12-381 (consensus vote signatures, single and aggregate).

use crate::primitives::{Address, Hash256};
use blst::min_pk as bls;
use ed25519_dalek::Verifier;
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CryptoError {
    #[error("malformed public key or signature length")]
    Malformed,
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("aggregation input was empty")]
    EmptyAggregate,
}

/// BLAKE3-256 over arbitrary bytes.
pub fn blake3_hash(data: &[u8]) -> Hash256 {
    Hash256::from_bytes(*blake3::hash(data).as_bytes())
}

/// Keccak-256, kept for interop with the external VM collaborator and any
/// EVM-style address/topic hashing it may need.
pub fn keccak256(data: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash256::from_bytes(out)
}

/// Derives the 20-byte account address from a raw 32-byte Ed25519 public
/// key: the low 20 bytes of `BLAKE3(pubkey)`.
pub fn derive_address(public_key: &[u8; 32]) -> Address {
    let digest = blake3::hash(public_key);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[12..32]);
    Address::from_bytes(bytes)
}

/// Verifies a raw 64-byte Ed25519 signature over `message` with a raw
/// 32-byte public key. Returns `false` (never panics) on malformed input.
pub fn ed25519_verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key.verify(message, &sig).is_ok()
}

pub fn ed25519_sign(signing_key: &ed25519_dalek::SigningKey, message: &[u8]) -> [u8; 64] {
    use ed25519_dalek::Signer;
    signing_key.sign(message).to_bytes()
}

/// 48-byte compressed BLS12-381 G1 public key (min-pubkey-size variant).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsPublicKey(pub [u8; 48]);

/// 96-byte compressed BLS12-381 G2 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; 96]);

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsPublicKey(0x{}...)", hex::encode(&self.0[..4]))
    }
}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsSignature(0x{}...)", hex::encode(&self.0[..4]))
    }
}

/// Domain-separation tag for every BLS signature produced by this crate.
const BLS_DST: &[u8] = b"HOLON-BFT-BLS12381G2-SHA256-SSWU-RO_";

pub struct BlsKeypair {
    secret: bls::SecretKey,
    pub public: BlsPublicKey,
}

impl BlsKeypair {
    /// Derives a keypair deterministically from 32+ bytes of key material
    /// (e.g. a validator's seed). Used by tests and by node bootstrap code
    /// that manages its own secret storage outside this crate.
    pub fn from_ikm(ikm: &[u8]) -> Result<Self, CryptoError> {
        let sk = bls::SecretKey::key_gen(ikm, &[]).map_err(|_| CryptoError::Malformed)?;
        let pk = sk.sk_to_pk();
        Ok(Self {
            secret: sk,
            public: BlsPublicKey(pk.compress()),
        })
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let sig = self.secret.sign(message, BLS_DST, &[]);
        BlsSignature(sig.compress())
    }
}

/// Verifies a single BLS signature over `message`.
pub fn bls_verify(public_key: &BlsPublicKey, message: &[u8], signature: &BlsSignature) -> bool {
    let Ok(pk) = bls::PublicKey::deserialize(&public_key.0) else {
        return false;
    };
    let Ok(sig) = bls::Signature::deserialize(&signature.0) else {
        return false;
    };
    matches!(
        sig.verify(true, message, BLS_DST, &[], &pk, true),
        blst::BLST_ERROR::BLST_SUCCESS
    )
}

/// Aggregates signatures that all sign the *same* message (the BFT engine's
/// vote signatures always cover `(block_hash, view, phase)`), producing a
/// single 96-byte aggregate signature.
pub fn bls_aggregate(signatures: &[BlsSignature]) -> Result<BlsSignature, CryptoError> {
    if signatures.is_empty() {
        return Err(CryptoError::EmptyAggregate);
    }
    let parsed: Result<Vec<bls::Signature>, _> = signatures
        .iter()
        .map(|s| bls::Signature::deserialize(&s.0))
        .collect();
    let parsed = parsed.map_err(|_| CryptoError::Malformed)?;
    let refs: Vec<&bls::Signature> = parsed.iter().collect();
    let agg = bls::AggregateSignature::aggregate(&refs, true).map_err(|_| CryptoError::Malformed)?;
    Ok(BlsSignature(agg.to_signature().compress()))
}

/// Verifies an aggregate signature against the same message for every
/// signer in `public_keys`.
pub fn bls_aggregate_verify(
    public_keys: &[BlsPublicKey],
    message: &[u8],
    aggregate: &BlsSignature,
) -> bool {
    if public_keys.is_empty() {
        return false;
    }
    let Ok(sig) = bls::Signature::deserialize(&aggregate.0) else {
        return false;
    };
    let parsed: Result<Vec<bls::PublicKey>, _> = public_keys
        .iter()
        .map(|pk| bls::PublicKey::deserialize(&pk.0))
        .collect();
    let Ok(parsed) = parsed else {
        return false;
    };
    let refs: Vec<&bls::PublicKey> = parsed.iter().collect();
    let msgs: Vec<&[u8]> = std::iter::repeat(message).take(refs.len()).collect();
    matches!(
        sig.aggregate_verify(true, &msgs, BLS_DST, &refs, true),
        blst::BLST_ERROR::BLST_SUCCESS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_hash(b"abc"), blake3_hash(b"abc"));
        assert_ne!(blake3_hash(b"abc"), blake3_hash(b"abd"));
    }

    #[test]
    fn ed25519_sign_then_verify() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();
        let msg = b"signing payload";
        let sig = ed25519_sign(&signing_key, msg);
        assert!(ed25519_verify(&public, msg, &sig));
        assert!(!ed25519_verify(&public, b"tampered", &sig));
    }

    #[test]
    fn derive_address_is_deterministic_and_20_bytes() {
        let pk = [9u8; 32];
        let a1 = derive_address(&pk);
        let a2 = derive_address(&pk);
        assert_eq!(a1, a2);
        assert_eq!(a1.as_bytes().len(), 20);
    }

    #[test]
    fn bls_single_sign_verify() {
        let kp = BlsKeypair::from_ikm(&[1u8; 32]).unwrap();
        let msg = b"(block_hash, view, phase)";
        let sig = kp.sign(msg);
        assert!(bls_verify(&kp.public, msg, &sig));
        assert!(!bls_verify(&kp.public, b"other", &sig));
    }

    #[test]
    fn bls_aggregate_roundtrip() {
        let kp1 = BlsKeypair::from_ikm(&[1u8; 32]).unwrap();
        let kp2 = BlsKeypair::from_ikm(&[2u8; 32]).unwrap();
        let kp3 = BlsKeypair::from_ikm(&[3u8; 32]).unwrap();
        let msg = b"quorum message";
        let sigs = vec![kp1.sign(msg), kp2.sign(msg), kp3.sign(msg)];
        let agg = bls_aggregate(&sigs).unwrap();
        let pks = vec![kp1.public, kp2.public, kp3.public];
        assert!(bls_aggregate_verify(&pks, msg, &agg));
    }

    #[test]
    fn bls_aggregate_rejects_wrong_signer_set() {
        let kp1 = BlsKeypair::from_ikm(&[1u8; 32]).unwrap();
        let kp2 = BlsKeypair::from_ikm(&[2u8; 32]).unwrap();
        let kp_other = BlsKeypair::from_ikm(&[99u8; 32]).unwrap();
        let msg = b"quorum message";
        let sigs = vec![kp1.sign(msg), kp2.sign(msg)];
        let agg = bls_aggregate(&sigs).unwrap();
        let wrong_pks = vec![kp1.public, kp_other.public];
        assert!(!bls_aggregate_verify(&wrong_pks, msg, &agg));
    }
}
