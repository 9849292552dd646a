//! EIP-1559-style fee model: base-fee adjustment between blocks and
//! per-transaction effective gas price / tip / burn split.

use crate::transaction::Transaction;

/// Computes the next block's base fee from the parent's `(base_fee,
/// gas_used, gas_limit)`. `gas_target = gas_limit / 2`.
pub fn next_base_fee(
    parent_base_fee: u64,
    parent_gas_used: u64,
    parent_gas_limit: u64,
    base_fee_change_denominator: u64,
    min_base_fee: u64,
) -> u64 {
    if parent_gas_limit == 0 {
        return parent_base_fee.max(min_base_fee);
    }
    let gas_target = parent_gas_limit / 2;
    if gas_target == 0 {
        return parent_base_fee.max(min_base_fee);
    }

    if parent_gas_used == gas_target {
        return parent_base_fee.max(min_base_fee);
    }

    if parent_gas_used > gas_target {
        let gas_used_delta = parent_gas_used - gas_target;
        let delta = ((parent_base_fee as u128 * gas_used_delta as u128)
            / gas_target as u128
            / base_fee_change_denominator as u128)
            .max(1) as u64;
        parent_base_fee.saturating_add(delta).max(min_base_fee)
    } else {
        let gas_used_delta = gas_target - parent_gas_used;
        let delta = ((parent_base_fee as u128 * gas_used_delta as u128)
            / gas_target as u128
            / base_fee_change_denominator as u128) as u64;
        parent_base_fee.saturating_sub(delta).max(min_base_fee)
    }
}

/// `effective_gas_price = min(max_fee_per_gas, base_fee + max_priority_fee_per_gas)`
/// when 1559 fields are present, else the legacy `gas_price`.
pub fn effective_gas_price(tx: &Transaction, base_fee: u64) -> u64 {
    match (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
        (Some(max_fee), Some(max_priority)) => {
            max_fee.min(base_fee.saturating_add(max_priority))
        }
        _ => tx.gas_price,
    }
}

/// `tip = effective_gas_price - base_fee`, credited to the proposer; the
/// remaining `base_fee` portion is burned. Saturates at zero rather than
/// underflowing when `effective_gas_price < base_fee` (the validator
/// rejects such transactions before execution, but this keeps the function
/// total).
pub fn tip(effective_gas_price: u64, base_fee: u64) -> u64 {
    effective_gas_price.saturating_sub(base_fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Address, UInt256};
    use crate::transaction::TransactionType;

    fn legacy_tx(gas_price: u64) -> Transaction {
        Transaction {
            tx_type: TransactionType::Transfer,
            nonce: 0,
            sender: Address::ZERO,
            to: Address::ZERO,
            value: UInt256::ZERO,
            gas_limit: 21_000,
            gas_price,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            data: vec![],
            priority: 0,
            chain_id: 1,
            signature: vec![],
            sender_public_key: vec![],
        }
    }

    #[test]
    fn base_fee_unchanged_at_target_usage() {
        let next = next_base_fee(1_000, 15_000_000, 30_000_000, 8, 1);
        assert_eq!(next, 1_000);
    }

    #[test]
    fn base_fee_rises_above_target() {
        let next = next_base_fee(1_000, 30_000_000, 30_000_000, 8, 1);
        assert!(next > 1_000);
    }

    #[test]
    fn base_fee_falls_below_target() {
        let next = next_base_fee(1_000, 0, 30_000_000, 8, 1);
        assert!(next < 1_000);
    }

    #[test]
    fn base_fee_never_drops_below_minimum() {
        let next = next_base_fee(1, 0, 30_000_000, 8, 1);
        assert_eq!(next, 1);
    }

    #[test]
    fn effective_price_legacy_tx_uses_gas_price() {
        let tx = legacy_tx(5);
        assert_eq!(effective_gas_price(&tx, 1), 5);
    }

    #[test]
    fn effective_price_1559_is_capped_by_max_fee() {
        let mut tx = legacy_tx(0);
        tx.max_fee_per_gas = Some(10);
        tx.max_priority_fee_per_gas = Some(100);
        assert_eq!(effective_gas_price(&tx, 5), 10);
    }

    #[test]
    fn tip_is_effective_minus_base() {
        assert_eq!(tip(10, 3), 7);
        assert_eq!(tip(2, 3), 0);
    }
}
