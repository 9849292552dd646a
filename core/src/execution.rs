//! Validator + executor + fee model (C6): builds and applies blocks
//! deterministically against the state database.

use crate::codec::{Reader, Writer};
use crate::config::ChainParams;
use crate::epoch::{ValidatorIdentity, ValidatorIdentityRegistry};
use crate::error::{ChainError, ValidationError};
use crate::fees::{effective_gas_price, next_base_fee, tip};
use crate::primitives::{Address, UInt256};
use crate::state::{AccountState, AccountType, StateDb};
use crate::staking::StakingState;
use crate::transaction::{
    intrinsic_cost, receipts_root, transactions_root, Receipt, Transaction, TransactionType,
};
use crate::vm::{GasMeter, VmCollaborator, VmContext};
use crate::block::{Block, BlockHeader};

use tracing::{debug, info, warn};

/// Stateful checks, run in order against current account state.
pub struct Validator<'a> {
    pub params: &'a ChainParams,
}

impl<'a> Validator<'a> {
    pub fn new(params: &'a ChainParams) -> Self {
        Self { params }
    }

    /// Runs checks 1–9 in order. Checks 2–4 (signature shape) are delegated
    /// to [`Transaction::verify_signature_shape`], already run by the
    /// mempool on admission; re-checked here so a block applier that skips
    /// the mempool still enforces them.
    pub fn validate(
        &self,
        tx: &Transaction,
        state: &StateDb,
        base_fee: u64,
    ) -> Result<u64, ValidationError> {
        tx.verify_signature_shape(self.params.chain_id)?;

        let sender = state
            .get_account(&tx.sender)
            .ok_or(ValidationError::UnknownSender)?;

        if sender.nonce == u64::MAX {
            return Err(ValidationError::NonceExhausted);
        }
        if tx.nonce != sender.nonce {
            return Err(ValidationError::NonceMismatch {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }

        let intrinsic = intrinsic_cost(tx.tx_type, tx.data.len());
        if tx.gas_limit < intrinsic {
            return Err(ValidationError::GasLimitTooLow);
        }

        let price = effective_gas_price(tx, base_fee);
        if price < base_fee {
            return Err(ValidationError::UnderpricedForBlock);
        }

        let max_cost = UInt256::from_u64(tx.gas_limit)
            .checked_mul_u64(price)
            .and_then(|gas_cost| gas_cost.checked_add(tx.value))
            .ok_or(ValidationError::InsufficientFunds)?;
        if sender.balance < max_cost {
            return Err(ValidationError::InsufficientFunds);
        }

        Ok(price)
    }
}

/// Parses the `data` payload of a `ValidatorRegister` transaction: a
/// 48-byte BLS public key followed by a length-prefixed UTF-8 p2p endpoint.
fn parse_validator_register_data(data: &[u8]) -> Option<(crate::crypto::BlsPublicKey, String)> {
    if data.len() < 48 {
        return None;
    }
    let mut bls_bytes = [0u8; 48];
    bls_bytes.copy_from_slice(&data[..48]);
    let mut r = Reader::new(&data[48..]);
    let endpoint = r.read_string().ok()?;
    Some((crate::crypto::BlsPublicKey(bls_bytes), endpoint))
}

pub fn encode_validator_register_data(bls_pubkey: &crate::crypto::BlsPublicKey, endpoint: &str) -> Vec<u8> {
    let mut out = bls_pubkey.0.to_vec();
    let mut w = Writer::new();
    w.write_string(endpoint);
    out.extend_from_slice(w.as_bytes());
    out
}

/// Everything the executor needs beyond the transaction itself.
pub struct ExecutionContext<'a> {
    pub state: &'a StateDb,
    pub staking: &'a StakingState,
    pub identities: &'a ValidatorIdentityRegistry,
    pub vm: &'a dyn VmCollaborator,
    pub base_fee: u64,
    pub proposer: Address,
    pub block_number: u64,
    pub block_ts_ms: u64,
    pub chain_id: u64,
}

/// Executes a single transaction inside a snapshot, following the four-step
/// recipe: debit, dispatch, refund, emit receipt.
pub fn execute_transaction(ctx: &ExecutionContext, tx: &Transaction) -> Receipt {
    let mut snapshot = ctx.state.snapshot();
    let effective_price = effective_gas_price(tx, ctx.base_fee);

    let mut sender_account = snapshot
        .get_account(&tx.sender)
        .expect("validator already checked sender exists");

    let gas_cost = UInt256::from_u64(tx.gas_limit)
        .checked_mul_u64(effective_price)
        .expect("validator already bounded this multiplication");
    let total_debit = gas_cost
        .checked_add(tx.value)
        .expect("validator already bounded this addition");

    sender_account.balance = sender_account
        .balance
        .checked_sub(total_debit)
        .expect("validator already confirmed sufficient balance");
    sender_account.nonce += 1;
    snapshot.set_account(tx.sender, sender_account.clone());

    let intrinsic = intrinsic_cost(tx.tx_type, tx.data.len());
    let dispatch_result = dispatch(ctx, &mut snapshot, tx, intrinsic);

    let (success, gas_used, logs, error_code) = match dispatch_result {
        Ok((used, logs)) => (true, used.max(intrinsic), logs, None),
        Err((used, code)) => (false, used.max(intrinsic), vec![], Some(code)),
    };
    let gas_used = gas_used.min(tx.gas_limit);

    let refund = UInt256::from_u64(tx.gas_limit - gas_used)
        .checked_mul_u64(effective_price)
        .unwrap_or(UInt256::ZERO);
    let mut sender_account = snapshot
        .get_account(&tx.sender)
        .expect("sender account exists post-dispatch");
    sender_account.balance = sender_account
        .balance
        .checked_add(refund)
        .expect("refund cannot overflow: it is bounded by the earlier debit");
    snapshot.set_account(tx.sender, sender_account);

    let tip_amount = tip(effective_price, ctx.base_fee);
    if tip_amount > 0 && !ctx.proposer.is_zero() {
        let mut proposer_account = snapshot
            .get_account(&ctx.proposer)
            .unwrap_or_else(|| AccountState::new_eoa(UInt256::ZERO));
        let tip_total = UInt256::from_u64(gas_used)
            .checked_mul_u64(tip_amount)
            .unwrap_or(UInt256::ZERO);
        proposer_account.balance = proposer_account
            .balance
            .checked_add(tip_total)
            .unwrap_or(proposer_account.balance);
        snapshot.set_account(ctx.proposer, proposer_account);
    }
    // The base-fee portion of gas_used * base_fee is implicitly burned: it
    // was already debited from the sender above and is never credited to
    // any account.

    snapshot.commit();

    debug!(tx_hash = ?tx.tx_hash(), success, gas_used, "applied transaction");

    Receipt {
        tx_hash: tx.tx_hash(),
        success,
        gas_used,
        effective_gas_price: effective_price,
        logs,
        error_code,
    }
}

type DispatchOk = (u64, Vec<crate::transaction::EventLog>);
type DispatchErr = (u64, String);

fn dispatch(
    ctx: &ExecutionContext,
    snapshot: &mut crate::state::StateSnapshot,
    tx: &Transaction,
    intrinsic: u64,
) -> Result<DispatchOk, DispatchErr> {
    match tx.tx_type {
        TransactionType::Transfer => {
            let mut recipient = snapshot
                .get_account(&tx.to)
                .unwrap_or_else(|| AccountState::new_eoa(UInt256::ZERO));
            recipient.balance = recipient
                .balance
                .checked_add(tx.value)
                .ok_or_else(|| (intrinsic, "recipient balance overflow".to_string()))?;
            snapshot.set_account(tx.to, recipient);
            Ok((intrinsic, vec![]))
        }
        TransactionType::StakeDeposit => {
            ctx.staking
                .add_stake(tx.sender, tx.value)
                .map_err(|e| (intrinsic, e.to_string()))?;
            Ok((intrinsic, vec![]))
        }
        TransactionType::StakeWithdraw => {
            ctx.staking
                .initiate_unstake(tx.sender, tx.value, ctx.block_number)
                .map_err(|e| (intrinsic, e.to_string()))?;
            Ok((intrinsic, vec![]))
        }
        TransactionType::ValidatorRegister => {
            let (bls_pubkey, endpoint) = parse_validator_register_data(&tx.data)
                .ok_or_else(|| (intrinsic, "malformed validator register payload".to_string()))?;
            ctx.staking
                .register_validator(tx.sender, tx.value, ctx.block_number, endpoint.clone())
                .map_err(|e| (intrinsic, e.to_string()))?;
            let mut ed25519_pubkey = [0u8; 32];
            ed25519_pubkey.copy_from_slice(&tx.sender_public_key);
            ctx.identities.insert(
                tx.sender,
                ValidatorIdentity {
                    ed25519_pubkey,
                    bls_pubkey,
                    p2p_endpoint: endpoint,
                },
            );
            Ok((intrinsic, vec![]))
        }
        TransactionType::ContractDeploy => {
            let mut meter = GasMeter::new(tx.gas_limit.saturating_sub(intrinsic));
            let contract_addr = derive_contract_address(&tx.sender, tx.nonce);
            let vm_ctx = VmContext {
                caller: tx.sender,
                contract_addr,
                value: tx.value,
                block_ts_ms: ctx.block_ts_ms,
                block_number: ctx.block_number,
                chain_id: ctx.chain_id,
                gas_meter: &mut meter,
                state_view: snapshot,
            };
            let outcome = ctx.vm.call(&tx.data, &[], vm_ctx);
            if outcome.success {
                snapshot.set_account(
                    contract_addr,
                    AccountState {
                        balance: UInt256::ZERO,
                        nonce: 0,
                        account_type: AccountType::Contract,
                        storage_root: crate::primitives::Hash256::ZERO,
                        code_hash: crate::crypto::blake3_hash(&tx.data),
                    },
                );
                Ok((intrinsic + outcome.gas_used, outcome.logs))
            } else {
                Err((
                    intrinsic + outcome.gas_used,
                    outcome.error.unwrap_or_else(|| "deploy reverted".to_string()),
                ))
            }
        }
        TransactionType::ContractCall => {
            let mut meter = GasMeter::new(tx.gas_limit.saturating_sub(intrinsic));
            let code_hash = snapshot
                .get_account(&tx.to)
                .map(|a| a.code_hash)
                .unwrap_or(crate::primitives::Hash256::ZERO);
            if code_hash.is_zero() {
                return Err((intrinsic, "call target is not a contract".to_string()));
            }
            let vm_ctx = VmContext {
                caller: tx.sender,
                contract_addr: tx.to,
                value: tx.value,
                block_ts_ms: ctx.block_ts_ms,
                block_number: ctx.block_number,
                chain_id: ctx.chain_id,
                gas_meter: &mut meter,
                state_view: snapshot,
            };
            let outcome = ctx.vm.call(&[], &tx.data, vm_ctx);
            if outcome.success {
                Ok((intrinsic + outcome.gas_used, outcome.logs))
            } else {
                Err((
                    intrinsic + outcome.gas_used,
                    outcome.error.unwrap_or_else(|| "call reverted".to_string()),
                ))
            }
        }
    }
}

fn derive_contract_address(sender: &Address, nonce: u64) -> Address {
    let mut buf = Vec::with_capacity(20 + 8);
    buf.extend_from_slice(sender.as_bytes());
    buf.extend_from_slice(&nonce.to_le_bytes());
    let digest = crate::crypto::blake3_hash(&buf);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[12..32]);
    Address::from_bytes(bytes)
}

/// Builds candidate blocks from mempool contents.
pub struct BlockBuilder<'a> {
    pub params: &'a ChainParams,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(params: &'a ChainParams) -> Self {
        Self { params }
    }

    /// Iterates `candidates` (already mempool-ordered by priority fee desc,
    /// arrival asc), skips any that would exceed the per-block transaction
    /// count or gas limit, executes the rest against `state`, and seals a
    /// final header whose `timestamp_ms` is strictly greater than the
    /// parent's.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        parent: &BlockHeader,
        candidates: Vec<Transaction>,
        state: &StateDb,
        staking: &StakingState,
        identities: &ValidatorIdentityRegistry,
        vm: &dyn VmCollaborator,
        proposer: Address,
        now_ms: u64,
    ) -> Block {
        let base_fee = next_base_fee(
            parent.base_fee,
            parent.gas_used,
            parent.gas_limit,
            self.params.base_fee_change_denominator,
            self.params.min_base_fee,
        );
        let validator = Validator::new(self.params);
        let timestamp_ms = now_ms.max(parent.timestamp_ms + 1);

        let mut included = Vec::new();
        let mut receipts = Vec::new();
        let mut gas_used_total = 0u64;

        let ctx = ExecutionContext {
            state,
            staking,
            identities,
            vm,
            base_fee,
            proposer,
            block_number: parent.number + 1,
            block_ts_ms: timestamp_ms,
            chain_id: self.params.chain_id,
        };

        for tx in candidates {
            if included.len() >= self.params.max_transactions_per_block {
                break;
            }
            if gas_used_total + tx.gas_limit > self.params.block_gas_limit {
                continue;
            }
            if validator.validate(&tx, state, base_fee).is_err() {
                continue;
            }
            let receipt = execute_transaction(&ctx, &tx);
            gas_used_total += receipt.gas_used;
            receipts.push(receipt);
            included.push(tx);
        }

        let state_root = state.compute_state_root();
        let header = BlockHeader {
            number: parent.number + 1,
            parent_hash: parent.block_hash(),
            state_root,
            transactions_root: transactions_root(&included),
            receipts_root: receipts_root(&receipts),
            timestamp_ms,
            proposer,
            chain_id: self.params.chain_id,
            gas_used: gas_used_total,
            gas_limit: self.params.block_gas_limit,
            base_fee,
            protocol_version: 1,
            extra_data: vec![],
        };

        info!(
            number = header.number,
            tx_count = included.len(),
            gas_used = gas_used_total,
            "built block"
        );

        Block {
            header,
            transactions: included,
            receipts,
        }
    }
}

/// Replays a remote finalized block exactly and confirms every root,
/// refusing the block on any mismatch.
pub struct BlockApplier<'a> {
    pub params: &'a ChainParams,
}

impl<'a> BlockApplier<'a> {
    pub fn new(params: &'a ChainParams) -> Self {
        Self { params }
    }

    pub fn apply(
        &self,
        block: &Block,
        parent: &BlockHeader,
        state: &StateDb,
        staking: &StakingState,
        identities: &ValidatorIdentityRegistry,
        vm: &dyn VmCollaborator,
    ) -> Result<(), ChainError> {
        if block.header.parent_hash != parent.block_hash() {
            return Err(ChainError::BadParentHash);
        }
        if block.header.number != parent.number + 1 {
            return Err(ChainError::BadBlockNumber);
        }
        if block.header.gas_used > block.header.gas_limit {
            return Err(ChainError::GasOverLimit);
        }

        let validator = Validator::new(self.params);
        let ctx = ExecutionContext {
            state,
            staking,
            identities,
            vm,
            base_fee: block.header.base_fee,
            proposer: block.header.proposer,
            block_number: block.header.number,
            block_ts_ms: block.header.timestamp_ms,
            chain_id: self.params.chain_id,
        };

        // Validated and executed one at a time, in block order: each
        // execution commits to `state` before the next transaction's nonce
        // is checked, matching how the builder produced them.
        let mut local_receipts = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            validator
                .validate(tx, state, block.header.base_fee)
                .map_err(ChainError::InvalidTransaction)?;
            local_receipts.push(execute_transaction(&ctx, tx));
        }

        if transactions_root(&block.transactions) != block.header.transactions_root {
            warn!(number = block.header.number, "transactions root mismatch");
            return Err(ChainError::TransactionsRootMismatch);
        }
        if receipts_root(&local_receipts) != block.header.receipts_root {
            warn!(number = block.header.number, "receipts root mismatch");
            return Err(ChainError::ReceiptsRootMismatch);
        }
        if local_receipts != block.receipts {
            warn!(number = block.header.number, "receipt contents diverge from proposer");
            return Err(ChainError::ReceiptsRootMismatch);
        }

        let state_root = state.compute_state_root();
        if state_root != block.header.state_root {
            warn!(number = block.header.number, "state root mismatch");
            return Err(ChainError::StateRootMismatch);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParamsBuilder;
    use crate::vm::NullVm;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn genesis_header(chain_id: u64, gas_limit: u64) -> BlockHeader {
        BlockHeader {
            number: 0,
            parent_hash: crate::primitives::Hash256::ZERO,
            state_root: crate::primitives::Hash256::ZERO,
            transactions_root: crate::primitives::Hash256::ZERO,
            receipts_root: crate::primitives::Hash256::ZERO,
            timestamp_ms: 1,
            proposer: Address::ZERO,
            chain_id,
            gas_used: 0,
            gas_limit,
            base_fee: 1,
            protocol_version: 1,
            extra_data: vec![],
        }
    }

    fn funded_sender(state: &StateDb, balance: u64) -> (SigningKey, Address) {
        let key = SigningKey::generate(&mut OsRng);
        let addr = crate::crypto::derive_address(&key.verifying_key().to_bytes());
        state.set_account(addr, AccountState::new_eoa(UInt256::from_u64(balance)));
        (key, addr)
    }

    fn transfer(key: &SigningKey, nonce: u64, to: Address, value: u64, gas_price: u64, chain_id: u64) -> Transaction {
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

    #[test]
    fn transfer_updates_balances_and_nonce() {
        let params = ChainParamsBuilder::new().chain_id(31337).finish();
        let state = StateDb::new();
        let (key, sender) = funded_sender(&state, 1_000_000_000_000);
        let recipient = Address::from_bytes([9u8; 20]);
        let tx = transfer(&key, 0, recipient, 1_000, 1, 31337);

        let staking = StakingState::new(UInt256::from_u64(1), 10);
        let identities = ValidatorIdentityRegistry::default();
        let vm = NullVm;
        let ctx = ExecutionContext {
            state: &state,
            staking: &staking,
            identities: &identities,
            vm: &vm,
            base_fee: 1,
            proposer: Address::ZERO,
            block_number: 1,
            block_ts_ms: 1,
            chain_id: 31337,
        };
        let receipt = execute_transaction(&ctx, &tx);
        assert!(receipt.success);

        let post_sender = state.get_account(&sender).unwrap();
        assert_eq!(post_sender.nonce, 1);
        assert_eq!(
            post_sender.balance,
            UInt256::from_u64(1_000_000_000_000 - 1_000 - 21_000)
        );
        assert_eq!(state.get_account(&recipient).unwrap().balance, UInt256::from_u64(1_000));

        let _ = params;
    }

    #[test]
    fn wrong_chain_id_fails_validation() {
        let params = ChainParamsBuilder::new().chain_id(31337).finish();
        let state = StateDb::new();
        let (key, _sender) = funded_sender(&state, 1_000_000);
        let tx = transfer(&key, 0, Address::from_bytes([1u8; 20]), 10, 1, 1);
        let validator = Validator::new(&params);
        assert_eq!(
            validator.validate(&tx, &state, 1),
            Err(ValidationError::WrongChain)
        );
    }

    #[test]
    fn gas_limit_one_below_intrinsic_rejected() {
        let params = ChainParamsBuilder::new().chain_id(31337).finish();
        let state = StateDb::new();
        let (key, _sender) = funded_sender(&state, 1_000_000);
        let mut tx = transfer(&key, 0, Address::from_bytes([1u8; 20]), 10, 1, 31337);
        tx.gas_limit = 20_999;
        tx.sign(&key);
        let validator = Validator::new(&params);
        assert_eq!(
            validator.validate(&tx, &state, 1),
            Err(ValidationError::GasLimitTooLow)
        );
    }

    #[test]
    fn gas_limit_exactly_intrinsic_accepted() {
        let params = ChainParamsBuilder::new().chain_id(31337).finish();
        let state = StateDb::new();
        let (key, _sender) = funded_sender(&state, 1_000_000);
        let tx = transfer(&key, 0, Address::from_bytes([1u8; 20]), 10, 1, 31337);
        let validator = Validator::new(&params);
        assert!(validator.validate(&tx, &state, 1).is_ok());
    }

    #[test]
    fn builder_seals_header_with_matching_state_root() {
        let params = ChainParamsBuilder::new().chain_id(31337).finish();
        let state = StateDb::new();
        let (key, _sender) = funded_sender(&state, 1_000_000_000_000);
        let tx = transfer(&key, 0, Address::from_bytes([2u8; 20]), 1_000, 1, 31337);

        let staking = StakingState::new(UInt256::from_u64(1), 10);
        let identities = ValidatorIdentityRegistry::default();
        let vm = NullVm;
        let builder = BlockBuilder::new(&params);
        let parent = genesis_header(31337, params.block_gas_limit);
        let block = builder.build(
            &parent,
            vec![tx],
            &state,
            &staking,
            &identities,
            &vm,
            Address::from_bytes([7u8; 20]),
            2,
        );

        assert_eq!(block.header.number, 1);
        assert_eq!(block.header.state_root, state.compute_state_root());
        assert_eq!(block.transactions.len(), 1);
    }

    #[test]
    fn applier_detects_state_root_mismatch() {
        let params = ChainParamsBuilder::new().chain_id(31337).finish();
        let state = StateDb::new();
        let (key, sender) = funded_sender(&state, 1_000_000_000_000);
        let tx = transfer(&key, 0, Address::from_bytes([2u8; 20]), 1_000, 1, 31337);

        let parent = genesis_header(31337, params.block_gas_limit);
        let mut header = BlockHeader {
            number: 1,
            parent_hash: parent.block_hash(),
            state_root: crate::primitives::Hash256::from_bytes([0xAAu8; 32]),
            transactions_root: transactions_root(std::slice::from_ref(&tx)),
            receipts_root: crate::primitives::Hash256::ZERO,
            timestamp_ms: 2,
            proposer: Address::ZERO,
            chain_id: 31337,
            gas_used: 21_000,
            gas_limit: params.block_gas_limit,
            base_fee: 1,
            protocol_version: 1,
            extra_data: vec![],
        };

        // A Transfer's receipt depends only on the transaction and the block
        // context, not on the sender's exact balance, so previewing `tx`
        // against a differently-funded copy of the same account yields the
        // same receipt the real `apply` call below will compute.
        let receipt = {
            let staking = StakingState::new(UInt256::from_u64(1), 10);
            let identities = ValidatorIdentityRegistry::default();
            let vm = NullVm;
            let preview_db = StateDb::new();
            preview_db.set_account(sender, AccountState::new_eoa(UInt256::from_u64(1_000_000_000_000)));
            let ctx = ExecutionContext {
                state: &preview_db,
                staking: &staking,
                identities: &identities,
                vm: &vm,
                base_fee: 1,
                proposer: Address::ZERO,
                block_number: 1,
                block_ts_ms: 2,
                chain_id: 31337,
            };
            execute_transaction(&ctx, &tx)
        };
        header.receipts_root = receipts_root(std::slice::from_ref(&receipt));

        let block = Block {
            header,
            transactions: vec![tx],
            receipts: vec![receipt],
        };

        let staking = StakingState::new(UInt256::from_u64(1), 10);
        let identities = ValidatorIdentityRegistry::default();
        let vm = NullVm;
        let applier = BlockApplier::new(&params);
        let result = applier.apply(&block, &parent, &state, &staking, &identities, &vm);
        assert_eq!(result, Err(ChainError::StateRootMismatch));
    }
}
