//! Chain parameters for **Holon** core.
//!
//! [`ChainParams`] centralises every chain-wide tunable. It is constructed
//! via the [`ChainParamsBuilder`] fluent builder: callers customise only
//! the fields they care about and keep sensible defaults otherwise.
//!
//! ```
//! use holon_core::config::ChainParams;
//!
//! let params = ChainParams::default();
//! assert_eq!(params.base_fee_change_denominator, 8);
//! ```

use crate::primitives::{Address, UInt256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime chain parameters shared across every subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainParams {
    pub chain_id: u64,
    pub block_time_ms: u64,
    pub block_gas_limit: u64,
    pub max_transactions_per_block: usize,
    pub min_gas_price: u64,
    pub transfer_gas_cost: u64,
    pub base_fee_change_denominator: u64,
    pub min_base_fee: u64,
    pub epoch_length: u64,
    pub validator_set_size: usize,
    pub min_validator_stake: UInt256,
    pub unbonding_period_blocks: u64,
    pub genesis_accounts: BTreeMap<Address, UInt256>,
    /// Default view-change deadline in milliseconds (see "Cancellation &
    /// timeouts").
    pub view_change_timeout_ms: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            block_time_ms: 2_000,
            block_gas_limit: 30_000_000,
            max_transactions_per_block: 5_000,
            min_gas_price: 1,
            transfer_gas_cost: 21_000,
            base_fee_change_denominator: 8,
            min_base_fee: 1,
            epoch_length: 100,
            validator_set_size: 100,
            min_validator_stake: UInt256::from_u64(100_000),
            unbonding_period_blocks: 200,
            genesis_accounts: BTreeMap::new(),
            view_change_timeout_ms: 2_000,
        }
    }
}

/// Fluent builder for [`ChainParams`].
pub struct ChainParamsBuilder {
    inner: ChainParams,
}

impl Default for ChainParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParamsBuilder {
    /// Starts a new builder pre-populated with [`ChainParams::default`].
    pub fn new() -> Self {
        Self {
            inner: ChainParams::default(),
        }
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.inner.chain_id = chain_id;
        self
    }

    pub fn block_gas_limit(mut self, limit: u64) -> Self {
        self.inner.block_gas_limit = limit;
        self
    }

    pub fn epoch_length(mut self, length: u64) -> Self {
        self.inner.epoch_length = length;
        self
    }

    pub fn validator_set_size(mut self, size: usize) -> Self {
        self.inner.validator_set_size = size;
        self
    }

    pub fn min_validator_stake(mut self, stake: UInt256) -> Self {
        self.inner.min_validator_stake = stake;
        self
    }

    pub fn unbonding_period_blocks(mut self, blocks: u64) -> Self {
        self.inner.unbonding_period_blocks = blocks;
        self
    }

    pub fn genesis_account(mut self, addr: Address, balance: UInt256) -> Self {
        self.inner.genesis_accounts.insert(addr, balance);
        self
    }

    pub fn view_change_timeout_ms(mut self, ms: u64) -> Self {
        self.inner.view_change_timeout_ms = ms;
        self
    }

    /// Consumes the builder returning an immutable configuration value.
    pub fn finish(self) -> ChainParams {
        self.inner
    }
}
