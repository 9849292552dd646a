//! Validator set: an ordered, immutable snapshot of the
//! validators participating in consensus. New versions are produced by the
//! epoch manager (C8) and atomically swapped into the BFT engine (C9); the
//! set itself never looks back into consensus.

use crate::crypto::BlsPublicKey;
use crate::primitives::{Address, UInt256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub peer_id: [u8; 32],
    pub ed25519_pubkey: [u8; 32],
    #[serde(with = "bls_pubkey_serde")]
    pub bls_pubkey: BlsPublicKey,
    pub address: Address,
    pub stake: UInt256,
    pub index: usize,
}

/// `serde`'s built-in array support only covers lengths up to 32, so a
/// 48-byte BLS public key is serialized through a slice/`Vec` instead.
mod bls_pubkey_serde {
    use super::BlsPublicKey;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &BlsPublicKey, s: S) -> Result<S::Ok, S::Error> {
        v.0[..].serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BlsPublicKey, D::Error> {
        let bytes = Vec::<u8>::deserialize(d)?;
        let array: [u8; 48] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::invalid_length(v.len(), &"48 bytes"))?;
        Ok(BlsPublicKey(array))
    }
}

/// An ordered, immutable validator set snapshot, shared read-mostly across
/// the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<ValidatorInfo>) -> Self {
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validators(&self) -> &[ValidatorInfo] {
        &self.validators
    }

    pub fn get(&self, index: usize) -> Option<&ValidatorInfo> {
        self.validators.get(index)
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.validators.iter().position(|v| &v.address == address)
    }

    pub fn total_stake(&self) -> u128 {
        self.validators
            .iter()
            .map(|v| {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(&v.stake.as_bytes()[16..]);
                u128::from_be_bytes(buf)
            })
            .sum()
    }

    /// `⌊2n/3⌋ + 1`.
    pub fn quorum_threshold(&self) -> usize {
        (2 * self.validators.len()) / 3 + 1
    }

    /// `⌊(n-1)/3⌋`.
    pub fn max_faults(&self) -> usize {
        if self.validators.is_empty() {
            0
        } else {
            (self.validators.len() - 1) / 3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(i: usize, stake: u64) -> ValidatorInfo {
        ValidatorInfo {
            peer_id: [i as u8; 32],
            ed25519_pubkey: [i as u8; 32],
            bls_pubkey: BlsPublicKey([i as u8; 48]),
            address: Address::from_bytes([i as u8; 20]),
            stake: UInt256::from_u64(stake),
            index: i,
        }
    }

    #[test]
    fn quorum_and_max_faults_for_four_validators() {
        let set = ValidatorSet::new((0..4).map(|i| info(i, 100)).collect());
        assert_eq!(set.quorum_threshold(), 3);
        assert_eq!(set.max_faults(), 1);
    }

    #[test]
    fn quorum_for_single_validator() {
        let set = ValidatorSet::new(vec![info(0, 100)]);
        assert_eq!(set.quorum_threshold(), 1);
        assert_eq!(set.max_faults(), 0);
    }
}
