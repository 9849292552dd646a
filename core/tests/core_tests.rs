use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use holon_core::block::BlockHeader;
use holon_core::codec::Codec;
use holon_core::config::ChainParamsBuilder;
use holon_core::crypto::derive_address;
use holon_core::epoch::{EpochManager, ValidatorIdentityRegistry};
use holon_core::execution::{BlockApplier, BlockBuilder};
use holon_core::genesis::create_genesis;
use holon_core::mempool::Mempool;
use holon_core::primitives::{Address, Hash256, UInt256};
use holon_core::staking::{SlashReason, StakingState};
use holon_core::transaction::{Transaction, TransactionType};
use holon_core::vm::NullVm;

fn transfer(
    key: &SigningKey,
    nonce: u64,
    to: Address,
    value: u64,
    gas_price: u64,
    chain_id: u64,
) -> Transaction {
    let mut tx = Transaction {
        tx_type: TransactionType::Transfer,
        nonce,
        sender: Address::ZERO,
        to,
        value: UInt256::from_u64(value),
        gas_limit: 21_000,
        gas_price,
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        data: vec![],
        priority: 0,
        chain_id,
        signature: vec![],
        sender_public_key: vec![],
    };
    tx.sign(key);
    tx
}

/// Genesis seeds a funded sender, the sender submits a transfer through the
/// mempool, the block builder produces a block against the live state, and a
/// second node replaying that block via the applier against a freshly seeded,
/// identical genesis state converges on the same roots.
#[test]
fn genesis_through_block_apply_round_trip() {
    let key = SigningKey::generate(&mut OsRng);
    let sender = derive_address(&key.verifying_key().to_bytes());
    let recipient = Address::from_bytes([9u8; 20]);

    let params = ChainParamsBuilder::new()
        .chain_id(31337)
        .genesis_account(sender, UInt256::from_u64(1_000_000_000_000))
        .finish();

    let (genesis_block, proposer_state) = create_genesis(&params);
    let mempool = Mempool::new(params.chain_id, 1_000);
    let tx = transfer(&key, 0, recipient, 5_000, 1, params.chain_id);
    assert!(mempool.add(tx.clone(), 1));

    let staking = StakingState::new(params.min_validator_stake, params.unbonding_period_blocks);
    let identities = ValidatorIdentityRegistry::default();
    let vm = NullVm;

    let builder = BlockBuilder::new(&params);
    let built = builder.build(
        &genesis_block.header,
        mempool.get_pending(10),
        &proposer_state,
        &staking,
        &identities,
        &vm,
        Address::from_bytes([7u8; 20]),
        genesis_block.header.timestamp_ms + 1,
    );
    assert_eq!(built.transactions.len(), 1);
    let confirmed_hashes: Vec<Hash256> = built.transactions.iter().map(|t| t.tx_hash()).collect();
    mempool.remove_confirmed(confirmed_hashes.iter());
    assert_eq!(mempool.count(), 0);

    // Replay the exact same block against an independently-seeded follower
    // state; applying must reproduce identical roots or fail loudly.
    let (follower_genesis, follower_state) = create_genesis(&params);
    let applier = BlockApplier::new(&params);
    let follower_staking =
        StakingState::new(params.min_validator_stake, params.unbonding_period_blocks);
    let follower_identities = ValidatorIdentityRegistry::default();
    applier
        .apply(
            &built,
            &follower_genesis.header,
            &follower_state,
            &follower_staking,
            &follower_identities,
            &vm,
        )
        .expect("follower must accept a block the builder itself produced");

    assert_eq!(follower_state.compute_state_root(), proposer_state.compute_state_root());
    assert_eq!(follower_state.compute_state_root(), built.header.state_root);
}

/// A block with a tampered state root is rejected rather than silently
/// diverging the follower's view of the chain.
#[test]
fn applier_rejects_forged_block() {
    let key = SigningKey::generate(&mut OsRng);
    let sender = derive_address(&key.verifying_key().to_bytes());

    let params = ChainParamsBuilder::new()
        .chain_id(31337)
        .genesis_account(sender, UInt256::from_u64(1_000_000_000_000))
        .finish();

    let (genesis_block, state) = create_genesis(&params);
    let tx = transfer(&key, 0, Address::from_bytes([3u8; 20]), 10, 1, params.chain_id);

    let staking = StakingState::new(params.min_validator_stake, params.unbonding_period_blocks);
    let identities = ValidatorIdentityRegistry::default();
    let vm = NullVm;

    let builder = BlockBuilder::new(&params);
    let mut block = builder.build(
        &genesis_block.header,
        vec![tx],
        &state,
        &staking,
        &identities,
        &vm,
        Address::ZERO,
        genesis_block.header.timestamp_ms + 1,
    );
    block.header.state_root = Hash256::from_bytes([0xFFu8; 32]);

    let (follower_genesis, follower_state) = create_genesis(&params);
    let follower_staking =
        StakingState::new(params.min_validator_stake, params.unbonding_period_blocks);
    let follower_identities = ValidatorIdentityRegistry::default();
    let applier = BlockApplier::new(&params);
    assert!(applier
        .apply(
            &block,
            &follower_genesis.header,
            &follower_state,
            &follower_staking,
            &follower_identities,
            &vm,
        )
        .is_err());
}

/// A header round-trips through the canonical codec byte-for-byte.
#[test]
fn header_codec_round_trip() {
    let params = ChainParamsBuilder::new().chain_id(7).finish();
    let (genesis_block, _state) = create_genesis(&params);
    let bytes = genesis_block.header.to_canonical_bytes();
    let decoded = BlockHeader::from_canonical_bytes(&bytes).expect("decode");
    assert_eq!(genesis_block.header, decoded);
}

/// A validator registered, staked, and slashed for double-signing falls out
/// of the next epoch's validator set because it no longer has enough stake.
#[test]
fn double_sign_slash_excludes_validator_from_next_epoch() {
    let staking = StakingState::new(UInt256::from_u64(100_000), 10);
    let registry = ValidatorIdentityRegistry::default();
    let addr = Address::from_bytes([4u8; 20]);

    staking
        .register_validator(addr, UInt256::from_u64(200_000), 0, "127.0.0.1:9000".into())
        .unwrap();
    registry.insert(
        addr,
        holon_core::epoch::ValidatorIdentity {
            ed25519_pubkey: [1u8; 32],
            bls_pubkey: holon_core::crypto::BlsPublicKey([1u8; 48]),
            p2p_endpoint: "127.0.0.1:9000".into(),
        },
    );

    let manager = EpochManager::new(100, 10);
    let before = manager.transition(1, &staking, &registry, None);
    assert_eq!(before.new_set.len(), 1);

    staking
        .apply_slash(addr, SlashReason::DoubleSign, 50, "equivocated".into(), 1_000)
        .unwrap();

    let after = manager.transition(2, &staking, &registry, Some(&before.new_set));
    assert_eq!(after.new_set.len(), 0);
}
