//! Mempool (C5): holds pending transactions with deterministic ordered
//! admission and eviction. Exclusive guard per mutation; snapshot reads
//! under a shared guard.

use crate::primitives::Hash256;
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Entry {
    tx: Transaction,
    received_ts: u64,
    effective_priority_fee: u64,
}

/// Ordering key: effective-priority-fee descending, then arrival ascending,
/// then tx-hash ascending as a final deterministic tiebreaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderKey {
    neg_fee: std::cmp::Reverse<u64>,
    received_ts: u64,
    tx_hash: Hash256,
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.neg_fee
            .cmp(&other.neg_fee)
            .then(self.received_ts.cmp(&other.received_ts))
            .then(self.tx_hash.cmp(&other.tx_hash))
    }
}

#[derive(Default)]
struct Inner {
    by_hash: BTreeMap<Hash256, Entry>,
    order: std::collections::BTreeSet<(OrderKey, Hash256)>,
}

pub struct Mempool {
    inner: RwLock<Inner>,
    chain_id: u64,
    capacity: usize,
}

impl Mempool {
    pub fn new(chain_id: u64, capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            chain_id,
            capacity,
        }
    }

    /// Computes the effective priority fee used for ordering: the tip above
    /// base fee when 1559 fields are present, else the legacy gas price.
    fn effective_priority_fee(tx: &Transaction) -> u64 {
        match (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
            (Some(_), Some(priority)) => priority,
            _ => tx.gas_price,
        }
    }

    /// Admits `tx` if it passes signature-shape validation and isn't
    /// already present. Returns `true` on admission, `false` on duplicate
    /// or when the pool is full. Full validation (balance, nonce) is the
    /// executor's job, not the mempool's.
    pub fn add(&self, tx: Transaction, received_ts: u64) -> bool {
        if tx.verify_signature_shape(self.chain_id).is_err() {
            return false;
        }
        let hash = tx.tx_hash();
        let mut inner = self.inner.write();
        if inner.by_hash.contains_key(&hash) {
            return false;
        }
        if inner.by_hash.len() >= self.capacity {
            return false;
        }
        let key = OrderKey {
            neg_fee: std::cmp::Reverse(Self::effective_priority_fee(&tx)),
            received_ts,
            tx_hash: hash,
        };
        inner.order.insert((key, hash));
        inner.by_hash.insert(
            hash,
            Entry {
                tx,
                received_ts,
                effective_priority_fee: key.neg_fee.0,
            },
        );
        true
    }

    /// Returns up to `limit` pending transactions ordered by
    /// effective-priority-fee descending, then arrival ascending.
    pub fn get_pending(&self, limit: usize) -> Vec<Transaction> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .take(limit)
            .filter_map(|(_, hash)| inner.by_hash.get(hash).map(|e| e.tx.clone()))
            .collect()
    }

    /// Evicts the given transaction hashes (typically the contents of a
    /// just-finalized block).
    pub fn remove_confirmed<'a>(&self, hashes: impl IntoIterator<Item = &'a Hash256>) {
        let mut inner = self.inner.write();
        for hash in hashes {
            if let Some(entry) = inner.by_hash.remove(hash) {
                let key = OrderKey {
                    neg_fee: std::cmp::Reverse(entry.effective_priority_fee),
                    received_ts: entry.received_ts,
                    tx_hash: *hash,
                };
                inner.order.remove(&(key, *hash));
            }
        }
    }

    pub fn count(&self) -> usize {
        self.inner.read().by_hash.len()
    }
}
