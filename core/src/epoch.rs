//! Epoch & validator-set manager (C8): rebuilds the validator set from
//! stake at epoch boundaries and hands the result to the BFT engine for an
//! atomic swap.

use crate::crypto::BlsPublicKey;
use crate::crypto::blake3_hash;
use crate::primitives::Address;
use crate::staking::StakingState;
use crate::validator_set::{ValidatorInfo, ValidatorSet};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Identity material a validator address must supply once (typically at
/// `ValidatorRegister` time) that survives epoch transitions
/// by address match rather than being re-derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorIdentity {
    pub ed25519_pubkey: [u8; 32],
    pub bls_pubkey: BlsPublicKey,
    pub p2p_endpoint: String,
}

impl ValidatorIdentity {
    pub fn peer_id(&self) -> [u8; 32] {
        *blake3_hash(&self.ed25519_pubkey).as_bytes()
    }
}

/// Maps validator address to its registered identity. Populated by the
/// executor when a `ValidatorRegister` transaction is applied; an interior
/// `Mutex` lets the executor share it with read-only consumers like the
/// epoch manager without a separate guard layer.
#[derive(Default)]
pub struct ValidatorIdentityRegistry {
    identities: Mutex<BTreeMap<Address, ValidatorIdentity>>,
}

impl ValidatorIdentityRegistry {
    pub fn insert(&self, addr: Address, identity: ValidatorIdentity) {
        self.identities.lock().insert(addr, identity);
    }

    pub fn get(&self, addr: &Address) -> Option<ValidatorIdentity> {
        self.identities.lock().get(addr).cloned()
    }
}

/// Event emitted by [`EpochManager::transition`], consumed by the BFT
/// engine's atomic validator-set swap and by peer-management glue.
#[derive(Debug, Clone)]
pub struct EpochTransition {
    pub epoch: u64,
    pub new_set: ValidatorSet,
}

pub struct EpochManager {
    epoch_length: u64,
    validator_set_size: usize,
}

impl EpochManager {
    pub fn new(epoch_length: u64, validator_set_size: usize) -> Self {
        Self {
            epoch_length,
            validator_set_size,
        }
    }

    /// `true` on exactly block numbers `≡ 0 (mod EpochLength)`, excluding
    /// genesis (the genesis validator set is seeded directly, not derived
    /// from a transition).
    pub fn is_epoch_boundary(&self, block_number: u64) -> bool {
        block_number != 0 && block_number % self.epoch_length == 0
    }

    /// Builds the next validator set: active validators sorted by
    /// `total_stake` descending, capped at `validator_set_size`, then
    /// re-sorted by address ascending for cross-node determinism, with
    /// sequential indices assigned after that final sort. Identities are
    /// transferred from `previous` for validators still present (matched
    /// by address); new validators resolve their identity from `registry`.
    pub fn transition(
        &self,
        epoch: u64,
        staking: &StakingState,
        registry: &ValidatorIdentityRegistry,
        previous: Option<&ValidatorSet>,
    ) -> EpochTransition {
        let mut active = staking.active_validators();
        active.sort_by(|a, b| b.total_stake().cmp(&a.total_stake()));
        active.truncate(self.validator_set_size);
        active.sort_by(|a, b| a.validator_address.cmp(&b.validator_address));

        let mut validators = Vec::with_capacity(active.len());
        for (index, stake_info) in active.into_iter().enumerate() {
            let addr = stake_info.validator_address;
            let identity = previous
                .and_then(|set| set.validators().iter().find(|v| v.address == addr))
                .map(|v| (v.peer_id, v.ed25519_pubkey, v.bls_pubkey))
                .or_else(|| {
                    registry
                        .get(&addr)
                        .map(|id| (id.peer_id(), id.ed25519_pubkey, id.bls_pubkey))
                });

            let Some((peer_id, ed25519_pubkey, bls_pubkey)) = identity else {
                // A validator with stake but no registered identity cannot
                // participate in BLS-signed consensus; it is dropped from
                // the set rather than included with dummy keys.
                continue;
            };

            validators.push(ValidatorInfo {
                peer_id,
                ed25519_pubkey,
                bls_pubkey,
                address: addr,
                stake: stake_info.total_stake(),
                index,
            });
        }

        // Re-index after any identity-less validators were skipped, so
        // indices stay contiguous for round-robin leader selection.
        for (i, v) in validators.iter_mut().enumerate() {
            v.index = i;
        }

        EpochTransition {
            epoch,
            new_set: ValidatorSet::new(validators),
        }
    }
}
