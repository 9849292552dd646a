//! Block header/body and codec.

use crate::codec::{Codec, CodecResult, Reader, Writer};
use crate::crypto::blake3_hash;
use crate::primitives::{Address, Hash256};
use crate::transaction::{Receipt, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: Hash256,
    pub state_root: Hash256,
    pub transactions_root: Hash256,
    pub receipts_root: Hash256,
    pub timestamp_ms: u64,
    pub proposer: Address,
    pub chain_id: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee: u64,
    pub protocol_version: u32,
    pub extra_data: Vec<u8>,
}

impl Codec for BlockHeader {
    fn encode(&self, w: &mut Writer) {
        w.write_u64(self.number);
        w.write_hash(&self.parent_hash);
        w.write_hash(&self.state_root);
        w.write_hash(&self.transactions_root);
        w.write_hash(&self.receipts_root);
        w.write_u64(self.timestamp_ms);
        w.write_address(&self.proposer);
        w.write_u64(self.chain_id);
        w.write_u64(self.gas_used);
        w.write_u64(self.gas_limit);
        w.write_u64(self.base_fee);
        w.write_u32(self.protocol_version);
        w.write_bytes(&self.extra_data);
    }

    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(BlockHeader {
            number: r.read_u64()?,
            parent_hash: r.read_hash()?,
            state_root: r.read_hash()?,
            transactions_root: r.read_hash()?,
            receipts_root: r.read_hash()?,
            timestamp_ms: r.read_u64()?,
            proposer: r.read_address()?,
            chain_id: r.read_u64()?,
            gas_used: r.read_u64()?,
            gas_limit: r.read_u64()?,
            base_fee: r.read_u64()?,
            protocol_version: r.read_u32()?,
            extra_data: r.read_bytes()?,
        })
    }
}

impl BlockHeader {
    pub fn block_hash(&self) -> Hash256 {
        blake3_hash(&self.to_canonical_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}

impl Block {
    pub fn block_hash(&self) -> Hash256 {
        self.header.block_hash()
    }
}
