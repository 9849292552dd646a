//! BLAKE3 Merkle root over an ordered list of 32-byte leaves, shared by the
//! state root, transaction/receipt roots, and account storage
//! roots. Padding rule: empty list roots to zero; a single item is its own
//! root; an odd level promotes its last hash once rather than duplicating
//! it implicitly.

use crate::primitives::Hash256;

pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }
    if leaves.len() == 1 {
        return leaves[0];
    }

    let mut level: Vec<Hash256> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i < level.len() {
            if i + 1 < level.len() {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(level[i].as_bytes());
                buf[32..].copy_from_slice(level[i + 1].as_bytes());
                next.push(Hash256::from_bytes(*blake3::hash(&buf).as_bytes()));
            } else {
                next.push(level[i]);
            }
            i += 2;
        }
        level = next;
    }
    level[0]
}
