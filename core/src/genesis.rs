//! Genesis construction: the first block and the state it
//! seeds, built directly from [`ChainParams::genesis_accounts`] rather than
//! derived through the normal block builder.

use crate::block::{Block, BlockHeader};
use crate::config::ChainParams;
use crate::primitives::{Address, Hash256};
use crate::state::{AccountState, StateDb};

/// Builds the genesis block and a freshly seeded [`StateDb`]. The header's
/// `parent_hash` and `transactions_root`/`receipts_root` are all zero; its
/// `state_root` is the root of the seeded accounts, and `number` is 0.
pub fn create_genesis(params: &ChainParams) -> (Block, StateDb) {
    let state = StateDb::new();
    for (addr, balance) in &params.genesis_accounts {
        state.set_account(*addr, AccountState::new_eoa(*balance));
    }

    let header = BlockHeader {
        number: 0,
        parent_hash: Hash256::ZERO,
        state_root: state.compute_state_root(),
        transactions_root: Hash256::ZERO,
        receipts_root: Hash256::ZERO,
        timestamp_ms: 0,
        proposer: Address::ZERO,
        chain_id: params.chain_id,
        gas_used: 0,
        gas_limit: params.block_gas_limit,
        base_fee: params.min_base_fee,
        protocol_version: 1,
        extra_data: vec![],
    };

    let block = Block {
        header,
        transactions: vec![],
        receipts: vec![],
    };

    (block, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParamsBuilder;
    use crate::primitives::UInt256;

    #[test]
    fn genesis_seeds_accounts_and_zero_parent() {
        let addr = Address::from_bytes([1u8; 20]);
        let params = ChainParamsBuilder::new()
            .chain_id(31337)
            .genesis_account(addr, UInt256::from_u64(1_000_000))
            .finish();

        let (block, state) = create_genesis(&params);

        assert_eq!(block.header.number, 0);
        assert_eq!(block.header.parent_hash, Hash256::ZERO);
        assert!(block.transactions.is_empty());
        assert_eq!(
            state.get_account(&addr).unwrap().balance,
            UInt256::from_u64(1_000_000)
        );
        assert_eq!(block.header.state_root, state.compute_state_root());
    }

    #[test]
    fn empty_genesis_has_zero_state_root() {
        let params = ChainParamsBuilder::new().finish();
        let (block, _state) = create_genesis(&params);
        assert_eq!(block.header.state_root, Hash256::ZERO);
    }
}
