//! State database: accounts and per-account storage, with the
//! state-root algorithm and scoped transactional mutation used by the
//! executor.

use crate::merkle::merkle_root;
use crate::primitives::{Address, Hash256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::primitives::UInt256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Eoa,
    Contract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: UInt256,
    pub nonce: u64,
    pub account_type: AccountType,
    pub storage_root: Hash256,
    pub code_hash: Hash256,
}

impl AccountState {
    pub fn new_eoa(balance: UInt256) -> Self {
        Self {
            balance,
            nonce: 0,
            account_type: AccountType::Eoa,
            storage_root: Hash256::ZERO,
            code_hash: Hash256::ZERO,
        }
    }

    /// BLAKE3 leaf hashed into the state root: `addr || balance_BE ||
    /// nonce_LE64 || account_type || storage_root || code_hash`.
    fn leaf_hash(&self, addr: &Address) -> Hash256 {
        let mut buf = Vec::with_capacity(20 + 32 + 8 + 1 + 32 + 32);
        buf.extend_from_slice(addr.as_bytes());
        buf.extend_from_slice(self.balance.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.push(match self.account_type {
            AccountType::Eoa => 0,
            AccountType::Contract => 1,
        });
        buf.extend_from_slice(self.storage_root.as_bytes());
        buf.extend_from_slice(self.code_hash.as_bytes());
        Hash256::from_bytes(*blake3::hash(&buf).as_bytes())
    }
}

type StorageKey = (Address, Hash256);

#[derive(Default)]
struct Maps {
    accounts: BTreeMap<Address, AccountState>,
    storage: BTreeMap<StorageKey, Vec<u8>>,
}

/// In-memory, sorted-map account and storage database. Protected by a
/// single exclusive guard across an entire block apply, with readers
/// blocked during apply.
pub struct StateDb {
    maps: RwLock<Maps>,
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDb {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    pub fn get_account(&self, addr: &Address) -> Option<AccountState> {
        self.maps.read().accounts.get(addr).cloned()
    }

    pub fn set_account(&self, addr: Address, account: AccountState) {
        self.maps.write().accounts.insert(addr, account);
    }

    pub fn get_storage(&self, addr: &Address, key: &Hash256) -> Option<Vec<u8>> {
        self.maps.read().storage.get(&(*addr, *key)).cloned()
    }

    pub fn set_storage(&self, addr: Address, key: Hash256, value: Vec<u8>) {
        self.maps.write().storage.insert((addr, key), value);
        self.recompute_storage_root(&addr);
    }

    pub fn delete_storage(&self, addr: Address, key: Hash256) {
        self.maps.write().storage.remove(&(addr, key));
        self.recompute_storage_root(&addr);
    }

    fn recompute_storage_root(&self, addr: &Address) {
        let mut maps = self.maps.write();
        let leaves: Vec<Hash256> = maps
            .storage
            .iter()
            .filter(|((a, _), _)| a == addr)
            .map(|((_, key), value)| {
                let mut buf = Vec::with_capacity(32 + value.len());
                buf.extend_from_slice(key.as_bytes());
                buf.extend_from_slice(value);
                Hash256::from_bytes(*blake3::hash(&buf).as_bytes())
            })
            .collect();
        let root = merkle_root(&leaves);
        if let Some(account) = maps.accounts.get_mut(addr) {
            account.storage_root = root;
        }
    }

    /// Computes the Merkle state root: sort all `(addr, AccountState)` pairs
    /// ascending by address (the `BTreeMap` already is), hash each into a
    /// leaf, and take the Merkle root of the sorted leaves.
    pub fn compute_state_root(&self) -> Hash256 {
        let maps = self.maps.read();
        let leaves: Vec<Hash256> = maps
            .accounts
            .iter()
            .map(|(addr, account)| account.leaf_hash(addr))
            .collect();
        merkle_root(&leaves)
    }

    /// Begins a scoped, copy-on-write overlay for transactional mutation.
    pub fn snapshot(&self) -> StateSnapshot<'_> {
        let maps = self.maps.read();
        StateSnapshot {
            db: self,
            base_accounts: maps.accounts.clone(),
            overlay_accounts: BTreeMap::new(),
            overlay_storage: BTreeMap::new(),
            deleted_storage: Vec::new(),
        }
    }
}

/// A scoped mutation overlay returned by [`StateDb::snapshot`]. Reads first
/// check the overlay, then fall back to the base snapshot taken at
/// construction time. No write is visible to other readers of the `StateDb`
/// until [`StateSnapshot::commit`].
pub struct StateSnapshot<'a> {
    db: &'a StateDb,
    base_accounts: BTreeMap<Address, AccountState>,
    overlay_accounts: BTreeMap<Address, AccountState>,
    overlay_storage: BTreeMap<StorageKey, Vec<u8>>,
    deleted_storage: Vec<StorageKey>,
}

impl<'a> StateSnapshot<'a> {
    pub fn get_account(&self, addr: &Address) -> Option<AccountState> {
        self.overlay_accounts
            .get(addr)
            .cloned()
            .or_else(|| self.base_accounts.get(addr).cloned())
    }

    pub fn set_account(&mut self, addr: Address, account: AccountState) {
        self.overlay_accounts.insert(addr, account);
    }

    pub fn get_storage(&self, addr: &Address, key: &Hash256) -> Option<Vec<u8>> {
        let k = (*addr, *key);
        if self.deleted_storage.contains(&k) {
            return None;
        }
        self.overlay_storage
            .get(&k)
            .cloned()
            .or_else(|| self.db.get_storage(addr, key))
    }

    pub fn set_storage(&mut self, addr: Address, key: Hash256, value: Vec<u8>) {
        self.deleted_storage.retain(|k| k != &(addr, key));
        self.overlay_storage.insert((addr, key), value);
    }

    pub fn delete_storage(&mut self, addr: Address, key: Hash256) {
        self.overlay_storage.remove(&(addr, key));
        self.deleted_storage.push((addr, key));
    }

    /// Merges the overlay into the base `StateDb` under its write guard.
    pub fn commit(self) {
        for (addr, account) in self.overlay_accounts {
            self.db.set_account(addr, account);
        }
        for (addr, key) in self.deleted_storage {
            self.db.delete_storage(addr, key);
        }
        for ((addr, key), value) in self.overlay_storage {
            self.db.set_storage(addr, key, value);
        }
    }

    /// Drops the overlay; the base `StateDb` is left untouched.
    pub fn rollback(self) {
        drop(self);
    }
}
